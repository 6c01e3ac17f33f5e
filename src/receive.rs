use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use crate::icmp::{FailureReason, IcmpConn, IcmpMessage, ProbeOutcome, decode};
use crate::sink::{Report, Reports, display_rtt};
use crate::state::CorrelationState;

const RECV_BUFFER_SIZE: usize = 1500;

/// Reads one socket until it is closed, turning our replies and the ICMP
/// errors caused by our probes into [`Report`]s.
pub struct Receiver<C: ?Sized> {
    conn: Arc<C>,
    state: Arc<CorrelationState>,
    reports: Reports,
}

impl<C: IcmpConn + ?Sized> Receiver<C> {
    pub fn new(conn: Arc<C>, state: Arc<CorrelationState>, reports: Reports) -> Self {
        Self { conn, state, reports }
    }

    /// Blocking read loop; run it on a blocking thread.
    pub fn run(self) {
        let family = self.conn.family();
        log::info!("Receiving {} replies (identifier {})", family, self.conn.identifier());

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        while !self.conn.is_closed() {
            let (n, peer) = match self.conn.recv_from(&mut buf) {
                Ok(read) => read,
                Err(_) if self.conn.is_closed() => break,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    log::trace!("No {} datagram before the read timeout", family);
                    continue;
                }
                Err(e) => {
                    log::error!("Couldn't read from {} socket: {}", family, e);
                    continue;
                }
            };
            if n == 0 {
                continue;
            }
            let received_at = Instant::now();

            if let Some(report) = self.classify(&buf[..n], peer, received_at) {
                if self.reports.blocking_send(report).is_err() {
                    log::warn!("Report queue closed, stopping {} receiver", family);
                    break;
                }
            }
        }
        log::info!("{} receiver stopped", family);
    }

    /// Decodes one datagram and resolves it against the in-flight probes.
    pub fn classify(&self, datagram: &[u8], peer: Option<IpAddr>, received_at: Instant) -> Option<Report> {
        let family = self.conn.family();
        let message = match decode(family, datagram, self.conn.includes_ip_header()) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Couldn't parse {} datagram from {:?}: {}", family, peer, e);
                return None;
            }
        };
        let identifier = self.conn.identifier();

        let (embedded, reason) = match message {
            IcmpMessage::EchoReply { identifier: id, sequence } => {
                if id != identifier {
                    log::debug!("Echo reply from {:?} not from me (identifier {})", peer, id);
                    return None;
                }
                let Some((target, rtt)) = self.state.claim(sequence, received_at) else {
                    log::debug!("Unmatched echo reply {} from {:?}", sequence, peer);
                    return None;
                };
                // Events are keyed by the probed target; the replying peer may differ.
                if let Some(source) = peer.filter(|source| *source != target) {
                    log::debug!("Reply {} came from {} but was sent to {}", sequence, source, target);
                }
                log::debug!("Reply {} for {}: time={}", sequence, target, display_rtt(rtt));
                return Some(Report::new(target, ProbeOutcome::Success { rtt }));
            }
            IcmpMessage::DestinationUnreachable(embedded) => (embedded, FailureReason::DestinationUnreachable),
            IcmpMessage::TimeExceeded(embedded) => (embedded, FailureReason::TimeExceeded),
            IcmpMessage::PacketTooBig(embedded) => (embedded, FailureReason::PacketTooBig),
            IcmpMessage::Unrecognized { icmp_type, code } => {
                log::trace!("Ignoring ICMP type {} code {} from {:?}", icmp_type, code, peer);
                return None;
            }
        };

        if !embedded.is_echo_request(family) || embedded.identifier != identifier {
            log::debug!(
                "{} from {:?} about {} is not for one of my probes",
                reason,
                peer,
                embedded.destination
            );
            return None;
        }
        if self.state.claim(embedded.sequence, received_at).is_none() {
            log::debug!("Unmatched {} for sequence {}", reason, embedded.sequence);
            return None;
        }
        log::debug!("{} for {} (seq {})", reason, embedded.destination, embedded.sequence);
        Some(Report::new(embedded.destination, ProbeOutcome::failure(reason)))
    }
}
