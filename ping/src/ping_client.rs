use std::{
    net::Ipv4Addr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use anyhow::Result;
use common::ICMPSocket;

/// Blocking datagram endpoint a ping session sends requests and reads
/// replies on.
pub trait PingTransport {
    fn send_to(&mut self, packet: &[u8], dst_addr: Ipv4Addr) -> Result<usize>;

    /// Reads one datagram into `buf`. Returns `Ok(None)` when nothing arrived
    /// within `timeout`; any other failure is an error.
    fn recv(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>>;
}

/// Source of wall clock time and of the pacing sleep.
pub trait Clock {
    /// Seconds since the UNIX epoch
    fn now(&self) -> f64;
    fn sleep(&mut self, duration: Duration);
}

impl PingTransport for ICMPSocket {
    fn send_to(&mut self, packet: &[u8], dst_addr: Ipv4Addr) -> Result<usize> {
        ICMPSocket::send_to(self, packet, dst_addr)
    }

    fn recv(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>> {
        self.recv_timeout(buf, timeout)
    }
}

impl<T: PingTransport + ?Sized> PingTransport for &mut T {
    fn send_to(&mut self, packet: &[u8], dst_addr: Ipv4Addr) -> Result<usize> {
        (**self).send_to(packet, dst_addr)
    }

    fn recv(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>> {
        (**self).recv(buf, timeout)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|since_epoch| since_epoch.as_secs_f64())
            .unwrap_or(0.0)
    }

    fn sleep(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn system_clock_advances() {
        let mut clock = SystemClock;
        let before = clock.now();
        assert!(before > 0.0);
        clock.sleep(Duration::from_millis(5));
        assert!(clock.now() >= before + 0.004);
    }
}
