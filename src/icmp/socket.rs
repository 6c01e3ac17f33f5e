use anyhow::Context;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::icmp::Family;

/// The socket operations the probe engine needs. Implemented by
/// [`IcmpSocket`]; tests script their own connection.
pub trait IcmpConn: Send + Sync {
    fn family(&self) -> Family;

    /// Echo identifier replies on this connection carry.
    fn identifier(&self) -> u16;

    /// Whether received datagrams start with the IP header.
    fn includes_ip_header(&self) -> bool;

    fn send_to(&self, packet: &[u8], target: IpAddr) -> io::Result<usize>;

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)>;

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

pub struct IcmpSocket {
    socket: Socket,
    family: Family,
    privileged: bool,
    identifier: u16,
    closed: AtomicBool,
}

impl IcmpSocket {
    /// Opens a raw (privileged) or datagram ping socket for `family`, bound
    /// to `source` or the unspecified address.
    pub fn open(
        family: Family,
        privileged: bool,
        source: Option<IpAddr>,
        process_id: u16,
        read_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let (domain, protocol) = match family {
            Family::V4 => (Domain::IPV4, Protocol::ICMPV4),
            Family::V6 => (Domain::IPV6, Protocol::ICMPV6),
        };
        let ty = if privileged { Type::RAW } else { Type::DGRAM };

        let socket = Socket::new(domain, ty, Some(protocol)).with_context(|| {
            if privileged {
                format!("Failed to create raw {} socket. Elevated privileges may be required.", family)
            } else {
                format!(
                    "Failed to create {} ping socket. Check net.ipv4.ping_group_range or use --privileged.",
                    family
                )
            }
        })?;

        let local = source.unwrap_or(match family {
            Family::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Family::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        });
        if Family::of(&local) != family {
            return Err(anyhow::anyhow!("source address {} is not {}", local, family));
        }
        socket
            .bind(&SocketAddr::new(local, 0).into())
            .with_context(|| format!("Failed to bind {} socket to {}", family, local))?;
        socket.set_read_timeout(Some(read_timeout))?;

        // Datagram ping sockets get their echo identifier from the local port.
        let identifier = if privileged {
            process_id
        } else {
            socket
                .local_addr()?
                .as_socket()
                .map(|addr| addr.port())
                .filter(|port| *port != 0)
                .unwrap_or(process_id)
        };

        log::debug!(
            "Opened {} {} socket on {} (identifier {})",
            if privileged { "raw" } else { "datagram" },
            family,
            local,
            identifier
        );

        Ok(Self {
            socket,
            family,
            privileged,
            identifier,
            closed: AtomicBool::new(false),
        })
    }
}

impl IcmpConn for IcmpSocket {
    fn family(&self) -> Family {
        self.family
    }

    fn identifier(&self) -> u16 {
        self.identifier
    }

    fn includes_ip_header(&self) -> bool {
        self.privileged && self.family == Family::V4
    }

    fn send_to(&self, packet: &[u8], target: IpAddr) -> io::Result<usize> {
        let addr: SockAddr = SocketAddr::new(target, 0).into();
        self.socket.send_to(packet, &addr)
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)> {
        // SAFETY: an initialized buffer is a valid `[MaybeUninit<u8>]`, and the
        // kernel only writes initialized bytes into it.
        let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
        let (n, peer) = self.socket.recv_from(uninit)?;
        Ok((n, peer.as_socket().map(|addr| addr.ip())))
    }

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        self.socket.set_read_timeout(Some(timeout))
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            // Unblocks a pending read where the platform supports it; the read
            // timeout covers the rest.
            if let Err(e) = self.socket.shutdown(Shutdown::Both) {
                log::debug!("Shutdown of {} socket: {}", self.family, e);
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Whether this process may open raw ICMP sockets of the given family.
pub fn check_raw_socket_privileges(family: Family) -> bool {
    IcmpSocket::open(family, true, None, 0, Duration::from_secs(1)).is_ok()
}
