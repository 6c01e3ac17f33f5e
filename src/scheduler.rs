//! Drives probe cadence: batched sends, timeout sweeps and shutdown.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval, interval_at};

use crate::icmp::{Family, FailureReason, IcmpConn, ProbeOutcome};
use crate::receive::Receiver;
use crate::sink::{Report, Reports};
use crate::state::CorrelationState;
use crate::target::TargetSet;
use crate::transmit::send_ping;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    ShuttingDown,
    Stopped,
}

pub struct ProbeScheduler<C> {
    period: Duration,
    timeout: Duration,
    targets: Arc<TargetSet>,
    state: Arc<CorrelationState>,
    conns: HashMap<Family, Arc<C>>,
    pool: Arc<Semaphore>,
    reports: Reports,
    phase: watch::Sender<SchedulerState>,
}

impl<C: IcmpConn + 'static> ProbeScheduler<C> {
    /// `conns` holds one open connection per enabled family.
    pub fn new(
        period: Duration,
        timeout: Duration,
        targets: Arc<TargetSet>,
        conns: impl IntoIterator<Item = Arc<C>>,
        reports: Reports,
    ) -> Self {
        let conns: HashMap<Family, Arc<C>> = conns.into_iter().map(|c| (c.family(), c)).collect();
        let pool_size = Self::pool_size(targets.len(), timeout);
        log::debug!("Send pool admits {} concurrent requests", pool_size);

        Self {
            period,
            timeout,
            targets,
            state: Arc::new(CorrelationState::new()),
            conns,
            pool: Arc::new(Semaphore::new(pool_size)),
            reports,
            phase: watch::Sender::new(SchedulerState::Running),
        }
    }

    /// Enough permits for a whole timeout window of rounds to be in flight.
    pub fn pool_size(targets: usize, timeout: Duration) -> usize {
        (targets * timeout.as_secs() as usize).max(1)
    }

    /// Follows the scheduler through `run` until it has stopped.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.phase.subscribe()
    }

    #[cfg(test)]
    pub fn correlation(&self) -> Arc<CorrelationState> {
        Arc::clone(&self.state)
    }

    /// Runs until `shutdown` resolves, then tears everything down.
    pub async fn run<F: Future<Output = ()>>(self, shutdown: F) -> SchedulerState {
        let receivers: Vec<JoinHandle<()>> = self
            .conns
            .values()
            .map(|conn| {
                let receiver = Receiver::new(Arc::clone(conn), Arc::clone(&self.state), self.reports.clone());
                tokio::task::spawn_blocking(move || receiver.run())
            })
            .collect();

        let mut send_tick = interval(self.period);
        send_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep_tick = interval_at(tokio::time::Instant::now() + self.timeout, self.timeout);
        sweep_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut batches = JoinSet::new();
        tokio::pin!(shutdown);

        log::info!(
            "Probing {} targets every {:?} (timeout {:?})",
            self.targets.len(),
            self.period,
            self.timeout
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = send_tick.tick() => {
                    batches.spawn(self.batch().dispatch());
                }
                _ = sweep_tick.tick() => self.sweep().await,
                Some(done) = batches.join_next(), if !batches.is_empty() => {
                    if let Err(e) = done {
                        if !e.is_cancelled() {
                            log::error!("Send batch failed: {}", e);
                        }
                    }
                }
            }
        }

        self.phase.send_replace(SchedulerState::ShuttingDown);
        log::info!("Shutting down");

        batches.shutdown().await;
        for conn in self.conns.values() {
            conn.close();
        }
        for receiver in receivers {
            if let Err(e) = receiver.await {
                log::error!("Receiver task failed: {}", e);
            }
        }

        let dropped = self.state.clear();
        if dropped > 0 {
            log::info!("Discarded {} in-flight probes", dropped);
        }

        self.phase.send_replace(SchedulerState::Stopped);
        SchedulerState::Stopped
    }

    fn batch(&self) -> SendBatch<C> {
        SendBatch {
            targets: Arc::clone(&self.targets),
            conns: self.conns.clone(),
            state: Arc::clone(&self.state),
            pool: Arc::clone(&self.pool),
            timeout: self.timeout,
        }
    }

    async fn sweep(&self) {
        let expired = self.state.sweep(self.timeout, Instant::now());
        log::trace!("Sweep expired {}, {} still in flight", expired.len(), self.state.len());
        for addr in expired {
            log::debug!("Timed out waiting for {}", addr);
            let report = Report::new(addr, ProbeOutcome::failure(FailureReason::TimedOut));
            if self.reports.send(report).await.is_err() {
                log::warn!("Report queue closed, dropping timeouts");
                break;
            }
        }
    }
}

/// Everything one send round needs, detached from the scheduler.
struct SendBatch<C> {
    targets: Arc<TargetSet>,
    conns: HashMap<Family, Arc<C>>,
    state: Arc<CorrelationState>,
    pool: Arc<Semaphore>,
    timeout: Duration,
}

impl<C: IcmpConn + 'static> SendBatch<C> {
    /// One round: a fresh sequence and a pooled send per target. Each send
    /// registers itself as soon as it is written.
    async fn dispatch(self) {
        let mut batch = JoinSet::new();
        for target in self.targets.iter() {
            let Some(conn) = self.conns.get(&target.family()) else {
                log::debug!("No {} socket for {}, skipping", target.family(), target.addr);
                continue;
            };
            let sequence = self.state.next_sequence();
            let Ok(permit) = Arc::clone(&self.pool).acquire_owned().await else {
                return;
            };

            let conn = Arc::clone(conn);
            let state = Arc::clone(&self.state);
            let addr = target.addr;
            let timeout = self.timeout;
            batch.spawn(async move {
                let _permit = permit;
                send_ping(conn.as_ref(), &state, addr, sequence, timeout)
            });
        }

        while let Some(done) = batch.join_next().await {
            match done {
                Ok(Ok(sent)) => log::trace!("Sent {} to {}", sent.sequence, sent.target),
                Ok(Err(e)) => log::error!("Send unsuccessful: {:#}", e),
                Err(e) if e.is_cancelled() => {}
                Err(e) => log::error!("Send task failed: {}", e),
            }
        }
    }
}
