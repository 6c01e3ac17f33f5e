pub mod packet;
pub mod socket;

pub use packet::*;
pub use socket::*;

use std::net::IpAddr;
use std::time::Duration;

/// Address family of a target and of the socket that probes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    V4,
    V6,
}

impl Family {
    pub fn of(addr: &IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => Family::V4,
            IpAddr::V6(_) => Family::V6,
        }
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Family::V4 => write!(f, "IPv4"),
            Family::V6 => write!(f, "IPv6"),
        }
    }
}

/// Why a probe did not produce a latency sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    TimedOut,
    DestinationUnreachable,
    TimeExceeded,
    PacketTooBig,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::TimedOut => write!(f, "Timed out"),
            FailureReason::DestinationUnreachable => write!(f, "Destination Unreachable"),
            FailureReason::TimeExceeded => write!(f, "Time Exceeded"),
            FailureReason::PacketTooBig => write!(f, "Packet Too Big"),
        }
    }
}

impl std::error::Error for FailureReason {}

/// Classified result of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success { rtt: Duration },
    Failure { reason: FailureReason },
}

impl ProbeOutcome {
    pub fn failure(reason: FailureReason) -> Self {
        ProbeOutcome::Failure { reason }
    }

    #[cfg(test)]
    pub fn is_success(&self) -> bool {
        matches!(self, ProbeOutcome::Success { .. })
    }
}
