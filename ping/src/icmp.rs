use std::{net::Ipv4Addr, time::Duration};

use anyhow::Result;
use common::Logger;
use log::{debug, warn};

use crate::{
    logger::PingResult,
    packet::{
        self, DecodeError, ICMP_DEST_UNREACHABLE, ICMP_ECHO_REPLY,
        ICMP_ECHO_REQUEST, IPV4_MIN_HEADER_LEN, TIMESTAMP_LEN,
    },
    ping_client::{Clock, PingTransport},
    stats::{SessionStats, Summary},
};

/// How long a round waits for each receive
pub const ROUND_TIMEOUT: Duration = Duration::from_secs(1);
/// Target spacing between two requests
pub const ROUND_INTERVAL: Duration = Duration::from_secs(1);

const RECV_BUF_LEN: usize = 1500;

/// A reply matched to this session.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Sequence number carried by the reply
    pub sequence: u16,
    /// Send time echoed back in the payload
    pub send_time: f64,
    pub recv_time: f64,
    pub rtt_ms: f64,
    pub ttl: u8,
    /// Size of the ICMP message
    pub size: usize,
    pub src_addr: Ipv4Addr,
}

/// How a single round ended. Fatal transport errors are not an outcome, they
/// end the session through `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    Matched(Sample),
    Timeout,
    Unreachable { code: u8, src_addr: Ipv4Addr },
    Malformed(DecodeError),
    /// Traffic that belongs to someone else or our own request seen twice
    Discarded,
}

impl RoundOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RoundOutcome::Matched(_) => "matched",
            RoundOutcome::Timeout => "timeout",
            RoundOutcome::Unreachable { .. } => "unreachable",
            RoundOutcome::Malformed(_) => "malformed",
            RoundOutcome::Discarded => "discarded",
        }
    }
}

pub struct ICMPClient<T, C> {
    /// Raw ICMP endpoint
    transport: T,
    clock: C,
    /// Destination IP address
    dst_addr: Ipv4Addr,
    /// Identifier of ICMP packets, fixed for the session
    identifier: u16,
    /// Number of rounds to run
    count: u16,
    stats: SessionStats,
    /// Optional CSV log with one row per round
    logger: Option<Logger<PingResult>>,
    buf: [u8; RECV_BUF_LEN],
}

impl<T, C> ICMPClient<T, C>
where
    T: PingTransport,
    C: Clock,
{
    pub fn new(
        transport: T,
        clock: C,
        dst_addr: Ipv4Addr,
        identifier: u16,
        count: u16,
        logger: Option<Logger<PingResult>>,
    ) -> Self {
        ICMPClient {
            transport,
            clock,
            dst_addr,
            identifier,
            count,
            stats: SessionStats::new(count),
            logger,
            buf: [0u8; RECV_BUF_LEN],
        }
    }

    /// Runs all rounds and returns the summary. Stops at the first transport
    /// error.
    pub fn run(&mut self) -> Result<Summary> {
        println!(
            "PING {}: {} data bytes, id {}",
            self.dst_addr, TIMESTAMP_LEN, self.identifier
        );

        for sequence in 0..self.count {
            let (send_time, outcome) = self.round(sequence)?;
            self.report(sequence, send_time, &outcome)?;
            self.stats.record(&outcome);
            self.pace(send_time);
        }

        if let Some(logger) = self.logger.as_mut() {
            logger.flush()?;
        }
        Ok(self.stats.finalize())
    }

    /// Sends the request for `sequence` and waits for its answer. Returns the
    /// local send time with the outcome.
    pub fn round(&mut self, sequence: u16) -> Result<(f64, RoundOutcome)> {
        let packet = packet::encode_echo_request(
            self.identifier,
            sequence,
            self.clock.now(),
        );
        debug!("sending echo request id {} seq {}", self.identifier, sequence);
        self.transport.send_to(&packet, self.dst_addr)?;
        let send_time = self.clock.now();

        let outcome = self.await_reply(sequence)?;
        Ok((send_time, outcome))
    }

    fn await_reply(&mut self, sequence: u16) -> Result<RoundOutcome> {
        let (mut len, mut recv_time) = match self.receive()? {
            Some(received) => received,
            None => return Ok(RoundOutcome::Timeout),
        };

        // A raw socket also sees our own outgoing request (always on
        // loopback). Skip it and give the reply one more receive.
        if is_echo_request(&self.buf[..len]) {
            debug!("seq {}: skipping own echo request", sequence);
            (len, recv_time) = match self.receive()? {
                Some(received) => received,
                None => return Ok(RoundOutcome::Timeout),
            };
        }

        Ok(classify(&self.buf[..len], recv_time, self.identifier, sequence))
    }

    fn receive(&mut self) -> Result<Option<(usize, f64)>> {
        let len = self.transport.recv(&mut self.buf, ROUND_TIMEOUT)?;
        Ok(len.map(|len| (len, self.clock.now())))
    }

    fn report(
        &mut self,
        sequence: u16,
        send_time: f64,
        outcome: &RoundOutcome,
    ) -> Result<()> {
        match outcome {
            RoundOutcome::Matched(sample) => println!(
                "{} bytes from {}: icmp_seq={} ttl={} time={:.3} ms",
                sample.size,
                sample.src_addr,
                sample.sequence,
                sample.ttl,
                sample.rtt_ms
            ),
            RoundOutcome::Timeout => {
                println!("Request timeout for icmp_seq {}", sequence)
            }
            RoundOutcome::Unreachable { code, src_addr } => println!(
                "From {} icmp_seq={} {}",
                src_addr,
                sequence,
                packet::unreachable_reason(*code)
            ),
            RoundOutcome::Malformed(err) => {
                warn!("icmp_seq {}: malformed reply: {}", sequence, err)
            }
            RoundOutcome::Discarded => {
                debug!("icmp_seq {}: nothing for this session", sequence)
            }
        }

        if let Some(logger) = self.logger.as_mut() {
            logger.log(&PingResult::new(
                sequence,
                self.identifier,
                self.dst_addr,
                send_time,
                outcome,
            ))?;
        }
        Ok(())
    }

    fn pace(&mut self, send_time: f64) {
        let delay = pacing_delay(self.clock.now() - send_time);
        if !delay.is_zero() {
            self.clock.sleep(delay);
        }
    }
}

/// Time left until the next request is due, given the seconds elapsed since
/// the current one was sent. Never negative and never above the interval.
pub fn pacing_delay(elapsed: f64) -> Duration {
    let interval = ROUND_INTERVAL.as_secs_f64();
    if elapsed.is_nan() || elapsed >= interval {
        return Duration::ZERO;
    }
    Duration::from_secs_f64((interval - elapsed).min(interval))
}

fn is_echo_request(buffer: &[u8]) -> bool {
    matches!(
        packet::decode_ip_and_icmp(buffer),
        Ok(datagram) if datagram.header.icmp_type == ICMP_ECHO_REQUEST
    )
}

/// Classifies a received datagram for the session `identifier`.
/// Destination Unreachable is reported whatever identifier it carries;
/// everything else must carry ours.
pub fn classify(
    buffer: &[u8],
    recv_time: f64,
    identifier: u16,
    sequence: u16,
) -> RoundOutcome {
    let datagram = match packet::decode_ip_and_icmp(buffer) {
        Ok(datagram) => datagram,
        Err(err) => return RoundOutcome::Malformed(err),
    };
    let header = datagram.header;
    if datagram.ip.header_len > IPV4_MIN_HEADER_LEN {
        debug!(
            "skipped {} bytes of IP options",
            datagram.ip.header_len - IPV4_MIN_HEADER_LEN
        );
    }
    if !packet::verify(datagram.message) {
        warn!(
            "bad checksum {:#06x} on ICMP type {} from {}",
            header.checksum, header.icmp_type, datagram.ip.source
        );
    }

    match header.icmp_type {
        ICMP_DEST_UNREACHABLE => RoundOutcome::Unreachable {
            code: header.code,
            src_addr: datagram.ip.source,
        },
        _ if header.identifier != identifier => {
            debug!(
                "ignoring ICMP type {} with id {} (ours is {})",
                header.icmp_type, header.identifier, identifier
            );
            RoundOutcome::Discarded
        }
        ICMP_ECHO_REPLY => {
            if header.sequence != sequence {
                debug!(
                    "reply seq {} arrived during round {}",
                    header.sequence, sequence
                );
            }
            match packet::decode_timestamp(datagram.payload) {
                Ok(send_time) => RoundOutcome::Matched(Sample {
                    sequence: header.sequence,
                    send_time,
                    recv_time,
                    rtt_ms: (recv_time - send_time) * 1000.0,
                    ttl: datagram.ip.ttl,
                    size: datagram.message.len(),
                    src_addr: datagram.ip.source,
                }),
                Err(err) => RoundOutcome::Malformed(err),
            }
        }
        other => {
            debug!("ignoring ICMP type {} with our id", other);
            RoundOutcome::Discarded
        }
    }
}
