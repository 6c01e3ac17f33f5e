use anyhow::Context;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::icmp::{IcmpConn, IcmpPacket};
use crate::state::CorrelationState;

/// A successfully written echo request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentProbe {
    pub target: IpAddr,
    pub sequence: u16,
    pub sent_at: Instant,
}

/// Writes one echo request to `target` and registers it with `state`.
///
/// The record is made just before the write so that a reply arriving before
/// this function returns still finds it; a failed write removes it again, so
/// an error never leaves a probe behind to time out.
pub fn send_ping<C: IcmpConn + ?Sized>(
    conn: &C,
    state: &CorrelationState,
    target: IpAddr,
    sequence: u16,
    timeout: Duration,
) -> anyhow::Result<SentProbe> {
    let mut packet = IcmpPacket::new_echo_request(conn.identifier(), sequence, conn.family());
    let bytes = packet
        .to_bytes()
        .with_context(|| format!("Failed to serialize echo request {} for {}", sequence, target))?;

    let sent_at = Instant::now();
    state.record(sequence, target, sent_at);

    log::debug!("Sending echo request {} to {}: {} bytes", sequence, target, bytes.len());
    if let Err(e) = conn.send_to(&bytes, target) {
        state.remove(sequence);
        return Err(e).with_context(|| format!("Failed to send echo request {} to {}", sequence, target));
    }

    // Shared by every probe on this socket; the sweep enforces the real timeout.
    if let Err(e) = conn.set_read_timeout(timeout) {
        log::debug!("Failed to set read timeout on {} socket: {}", conn.family(), e);
    }

    Ok(SentProbe {
        target,
        sequence,
        sent_at,
    })
}
