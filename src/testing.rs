//! In-memory [`IcmpConn`] for exercising the engine without sockets.

use std::collections::VecDeque;
use std::io;
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::icmp::{Family, ICMP_ECHO_REPLY, ICMPV6_ECHO_REPLY, IcmpConn, compute_checksum};

pub struct ScriptedConn {
    family: Family,
    identifier: u16,
    with_ip_header: bool,
    auto_reply: AtomicBool,
    fail_sends: AtomicBool,
    closed: AtomicBool,
    sent: Mutex<Vec<(Vec<u8>, IpAddr)>>,
    inbox: Mutex<VecDeque<io::Result<(Vec<u8>, Option<IpAddr>)>>>,
    read_timeout: Mutex<Option<Duration>>,
}

impl ScriptedConn {
    pub fn new(family: Family, identifier: u16) -> Self {
        Self {
            family,
            identifier,
            with_ip_header: false,
            auto_reply: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            inbox: Mutex::new(VecDeque::new()),
            read_timeout: Mutex::new(None),
        }
    }

    pub fn with_ip_header(mut self) -> Self {
        self.with_ip_header = true;
        self
    }

    /// Answer every echo request with a matching reply from its target.
    pub fn auto_reply(&self, on: bool) {
        self.auto_reply.store(on, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, on: bool) {
        self.fail_sends.store(on, Ordering::SeqCst);
    }

    pub fn push(&self, datagram: Vec<u8>, peer: IpAddr) {
        self.inbox.lock().unwrap().push_back(Ok((datagram, Some(peer))));
    }

    pub fn push_error(&self, kind: io::ErrorKind) {
        self.inbox.lock().unwrap().push_back(Err(io::Error::from(kind)));
    }

    pub fn pending(&self) -> usize {
        self.inbox.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<(Vec<u8>, IpAddr)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        *self.read_timeout.lock().unwrap()
    }
}

impl IcmpConn for ScriptedConn {
    fn family(&self) -> Family {
        self.family
    }

    fn identifier(&self) -> u16 {
        self.identifier
    }

    fn includes_ip_header(&self) -> bool {
        self.with_ip_header
    }

    fn send_to(&self, packet: &[u8], target: IpAddr) -> io::Result<usize> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(io::Error::from(io::ErrorKind::PermissionDenied));
        }
        self.sent.lock().unwrap().push((packet.to_vec(), target));
        if self.auto_reply.load(Ordering::SeqCst) {
            let mut reply = packet.to_vec();
            reply[0] = match self.family {
                Family::V4 => ICMP_ECHO_REPLY,
                Family::V6 => ICMPV6_ECHO_REPLY,
            };
            reply[2..4].copy_from_slice(&[0, 0]);
            let checksum = compute_checksum(&reply);
            reply[2..4].copy_from_slice(&checksum.to_be_bytes());
            self.push(reply, target);
        }
        Ok(packet.len())
    }

    fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, Option<IpAddr>)> {
        let next = self.inbox.lock().unwrap().pop_front();
        match next {
            Some(Ok((datagram, peer))) => {
                let n = datagram.len().min(buf.len());
                buf[..n].copy_from_slice(&datagram[..n]);
                Ok((n, peer))
            }
            Some(Err(e)) => Err(e),
            None => {
                std::thread::sleep(Duration::from_millis(2));
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
        }
    }

    fn set_read_timeout(&self, timeout: Duration) -> io::Result<()> {
        *self.read_timeout.lock().unwrap() = Some(timeout);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
