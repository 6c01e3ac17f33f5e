//! Delivery of classified probe outcomes to a [`ResultSink`].
//!
//! The receivers and the scheduler push [`Report`]s into one bounded queue;
//! a single reporter task enriches them with target details and publishes.

use chrono::{DateTime, Utc};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::icmp::{FailureReason, ProbeOutcome};
use crate::stats::PingStatistics;
use crate::target::TargetSet;
use crate::utils::{format_time, milliseconds};

/// A classified outcome waiting to be published.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Report {
    pub addr: IpAddr,
    pub outcome: ProbeOutcome,
    pub at: DateTime<Utc>,
}

impl Report {
    pub fn new(addr: IpAddr, outcome: ProbeOutcome) -> Self {
        Self {
            addr,
            outcome,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Latency { rtt_ms: f64 },
    Error { reason: FailureReason },
}

/// Event shape handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeEvent {
    pub name: String,
    pub addr: IpAddr,
    pub tags: Vec<String>,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

pub trait ResultSink: Send + 'static {
    fn publish(&mut self, event: &ProbeEvent);
}

/// Sender half of the report queue.
pub type Reports = mpsc::Sender<Report>;

/// Starts the reporter task. It runs until every [`Reports`] sender is
/// dropped, then hands the sink back.
pub fn spawn_reporter<S: ResultSink>(
    targets: Arc<TargetSet>,
    mut sink: S,
    capacity: usize,
) -> (Reports, JoinHandle<S>) {
    let (tx, mut rx) = mpsc::channel::<Report>(capacity);
    let handle = tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            if let Some(event) = to_event(&targets, &report) {
                sink.publish(&event);
            }
        }
        log::debug!("Report queue closed");
        sink
    });
    (tx, handle)
}

fn to_event(targets: &TargetSet, report: &Report) -> Option<ProbeEvent> {
    let Some(target) = targets.get(&report.addr) else {
        log::error!("No details for {} in targets", report.addr);
        return None;
    };
    let kind = match report.outcome {
        ProbeOutcome::Success { rtt } => EventKind::Latency {
            rtt_ms: milliseconds(rtt),
        },
        ProbeOutcome::Failure { reason } => EventKind::Error { reason },
    };
    Some(ProbeEvent {
        name: target.name.clone(),
        addr: target.addr,
        tags: target.tags.clone(),
        kind,
        timestamp: report.at,
    })
}

/// Prints every event and keeps per-target statistics.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    stats: Vec<(String, IpAddr, PingStatistics)>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn stats_for(&mut self, name: &str, addr: IpAddr) -> &mut PingStatistics {
        let index = match self.stats.iter().position(|(_, a, _)| *a == addr) {
            Some(index) => index,
            None => {
                self.stats.push((name.to_string(), addr, PingStatistics::new()));
                self.stats.len() - 1
            }
        };
        &mut self.stats[index].2
    }

    pub fn format_event(event: &ProbeEvent) -> String {
        let tags = if event.tags.is_empty() {
            String::new()
        } else {
            format!(" tags=[{}]", event.tags.join(","))
        };
        let target = if event.name == event.addr.to_string() {
            event.name.clone()
        } else {
            format!("{} [{}]", event.name, event.addr)
        };
        match &event.kind {
            EventKind::Latency { rtt_ms } => format!(
                "{} reply from {}: time={}{}",
                event.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                target,
                format_time(*rtt_ms),
                tags
            ),
            EventKind::Error { reason } => format!(
                "{} no reply from {}: {}{}",
                event.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                target,
                reason,
                tags
            ),
        }
    }

    pub fn format_summary(&self) -> String {
        self.stats
            .iter()
            .map(|(name, addr, stats)| stats.format_summary(&format!("{} ({})", name, addr)))
            .collect::<Vec<_>>()
            .join("")
    }

    #[cfg(test)]
    pub fn stats(&self, addr: &IpAddr) -> Option<&PingStatistics> {
        self.stats.iter().find(|(_, a, _)| a == addr).map(|(_, _, s)| s)
    }
}

impl ResultSink for ConsoleSink {
    fn publish(&mut self, event: &ProbeEvent) {
        println!("{}", Self::format_event(event));
        let stats = self.stats_for(&event.name, event.addr);
        stats.record_sent();
        match event.kind {
            EventKind::Latency { rtt_ms } => stats.record_received(rtt_ms),
            EventKind::Error { reason } => stats.record_lost(reason),
        }
    }
}

/// Collects every published event.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub events: Vec<ProbeEvent>,
}

#[cfg(test)]
impl ResultSink for MemorySink {
    fn publish(&mut self, event: &ProbeEvent) {
        self.events.push(event.clone());
    }
}

/// Rounds a duration for log output.
pub fn display_rtt(rtt: Duration) -> String {
    format_time(milliseconds(rtt))
}
