use std::{
    fmt,
    fs::File,
    io::{self, BufWriter, Read, Write},
    marker::PhantomData,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs},
    path::Path,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::debug;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

pub use logging_macro::Logging;

// Strong type for the raw ICMPv4 socket
pub struct ICMPSocket {
    socket: Socket,
    /// Read timeout currently configured on the socket
    read_timeout: Option<Duration>,
}

impl ICMPSocket {
    /// Opens a blocking raw socket for IPv4 / ICMP. This normally needs
    /// root or CAP_NET_RAW.
    pub fn new(bind_interface: Option<&str>) -> Result<ICMPSocket> {
        let socket =
            Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
                .context(
                    "failed to open raw ICMP socket (are you running as \
                     root or with CAP_NET_RAW?)",
                )?;

        let socket = match bind_interface {
            Some(bi) => bind_to_device(socket, bi)?,
            None => socket,
        };

        Ok(ICMPSocket {
            socket,
            read_timeout: None,
        })
    }

    pub fn send_to(&mut self, packet: &[u8], addr: Ipv4Addr) -> Result<usize> {
        // The port is ignored for raw sockets
        let addr = SockAddr::from(SocketAddr::V4(SocketAddrV4::new(addr, 0)));
        let sent = self.socket.send_to(packet, &addr)?;
        Ok(sent)
    }

    /// Blocks until a datagram arrives or `timeout` expires. A timeout is
    /// reported as `Ok(None)`, every other socket error is returned as is.
    pub fn recv_timeout(
        &mut self,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<Option<usize>> {
        if self.read_timeout != Some(timeout) {
            self.socket.set_read_timeout(Some(timeout))?;
            self.read_timeout = Some(timeout);
        }
        match self.socket.read(buf) {
            Ok(n) => Ok(Some(n)),
            // Unix reports an expired SO_RCVTIMEO as EAGAIN, Windows as
            // WSAETIMEDOUT
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(anyhow!(e).context("error receiving ICMP packet")),
        }
    }
}

pub fn bind_to_device(
    socket: Socket,
    bind_interface: &str,
) -> Result<Socket, std::io::Error> {
    // Socket2 bind_device does not have nice error types, so we have to handle
    // the libc errors. In case, we get an error when binding, map it into a
    // more friendly std::io::Error
    if let Err(err) = socket.bind_device(Some(bind_interface.as_bytes())) {
        return if matches!(err.raw_os_error(), Some(libc::ENODEV)) {
            let error_msg = format!(
                "error binding to device (`{}`): {}",
                bind_interface, err
            );
            Err(std::io::Error::new(std::io::ErrorKind::Other, error_msg))
        } else {
            let error_msg = format!("unexpected error binding device: {}", err);
            Err(std::io::Error::new(std::io::ErrorKind::Other, error_msg))
        };
    }

    Ok(socket)
}

/// Resolve `host` to the first IPv4 address it maps to. Dotted quads are
/// returned without a lookup.
pub fn resolve_ipv4(host: &str) -> Result<Ipv4Addr> {
    if let Ok(addr) = host.parse::<Ipv4Addr>() {
        return Ok(addr);
    }
    let addr = (host, 0)
        .to_socket_addrs()
        .with_context(|| format!("could not resolve host `{}`", host))?
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(*v4.ip()),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| anyhow!("host `{}` has no IPv4 address", host))?;
    debug!("resolved {} to {}", host, addr);
    Ok(addr)
}

/// A record that can be written as a CSV row. Usually derived with
/// `#[derive(Logging)]`, which also provides the `Display` used for the row.
pub trait Logging {
    fn header(&self) -> String;
}

/// Writes records of type `T` to a CSV file, header first.
pub struct Logger<T> {
    writer: BufWriter<File>,
    header_written: bool,
    _record: PhantomData<T>,
}

impl<T> Logger<T>
where
    T: Logging + fmt::Display,
{
    pub fn new(file_name: impl AsRef<Path>) -> Result<Self> {
        let file_name = file_name.as_ref();
        let file = File::create(file_name).with_context(|| {
            format!("failed to create log file {}", file_name.display())
        })?;
        Ok(Self {
            writer: BufWriter::new(file),
            header_written: false,
            _record: PhantomData,
        })
    }

    pub fn log(&mut self, record: &T) -> Result<()> {
        if !self.header_written {
            self.writer.write_all(record.header().as_bytes())?;
            self.header_written = true;
        }
        write!(self.writer, "{}", record)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Running statistics over a stream of samples. Samples are not kept; the
/// variance is tracked with Welford's method.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    sum: f64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
    samples: usize,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mean: {:.2} variance: {:.2} standard deviation: {:.2} min: {:.2} \
             max: {:.2} samples: {}",
            self.mean(),
            self.variance(),
            self.standard_deviation(),
            self.min(),
            self.max(),
            self.samples()
        )
    }
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arithmetic mean, 0.0 without samples.
    pub fn mean(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.sum / self.samples as f64
    }

    /// Population variance, 0.0 without samples.
    pub fn variance(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.m2 / self.samples as f64
    }

    pub fn standard_deviation(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }

    pub fn update(&mut self, value: f64) {
        self.samples += 1;
        self.sum += value;
        if self.samples == 1 {
            self.mean = value;
            self.m2 = 0.0;
            self.min = value;
            self.max = value;
        } else {
            let old_mean = self.mean;
            self.mean = old_mean + (value - old_mean) / self.samples as f64;
            self.m2 += (value - old_mean) * (value - self.mean);
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stats_test() {
        let mut stats = Statistics::new();
        for value in 1..=10 {
            stats.update(value as f64);
        }

        assert_eq!(stats.mean(), 5.5);
        assert_eq!(stats.variance(), 8.25);
        assert_eq!(stats.standard_deviation().round(), 3.0);
        assert_eq!(stats.min(), 1.0);
        assert_eq!(stats.max(), 10.0);
        assert_eq!(stats.samples(), 10);
    }

    #[test]
    fn stats_empty_reports_zero() {
        let stats = Statistics::new();
        assert!(stats.is_empty());
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.variance(), 0.0);
        assert_eq!(stats.min(), 0.0);
        assert_eq!(stats.max(), 0.0);
    }

    #[test]
    fn stats_order_independent() {
        let mut forward = Statistics::new();
        let mut backward = Statistics::new();
        let values = [3.0, 1.0, 2.0, 8.5, 0.25];
        values.iter().for_each(|v| forward.update(*v));
        values.iter().rev().for_each(|v| backward.update(*v));

        assert_eq!(forward.min(), backward.min());
        assert_eq!(forward.max(), backward.max());
        assert!((forward.mean() - backward.mean()).abs() < 1e-12);
        assert!((forward.variance() - backward.variance()).abs() < 1e-9);
    }

    #[test]
    fn resolve_dotted_quad() {
        let addr = resolve_ipv4("10.1.2.3").unwrap();
        assert_eq!(addr, Ipv4Addr::new(10, 1, 2, 3));
    }

    #[test]
    fn resolve_unknown_host_fails() {
        assert!(resolve_ipv4("no-such-host.invalid").is_err());
    }

    #[derive(Logging)]
    struct Row {
        seq: u16,
        rtt: f64,
        host: String,
    }

    #[test]
    fn logger_writes_header_once() {
        let path = std::env::temp_dir()
            .join(format!("common-logger-{}.csv", std::process::id()));
        let mut logger = Logger::new(&path).unwrap();
        logger
            .log(&Row {
                seq: 0,
                rtt: 1.5,
                host: "10.0.0.1".to_string(),
            })
            .unwrap();
        logger
            .log(&Row {
                seq: 1,
                rtt: 2.0,
                host: "10.0.0.1".to_string(),
            })
            .unwrap();
        logger.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(contents, "seq,rtt,host\n0,1.5,10.0.0.1\n1,2,10.0.0.1\n");
    }
}
