use std::net::Ipv4Addr;

use common::Logging;

use crate::icmp::RoundOutcome;

/// One CSV row per round. Rounds without a matched reply have a NaN rtt and
/// zero ttl, size and receive time.
#[derive(Debug, Logging, Clone)]
pub struct PingResult {
    pub seq: u16,
    pub identifier: u16,
    pub outcome: &'static str,
    pub rtt: f64,
    pub ttl: u8,
    pub size: usize,
    pub send_timestamp: f64,
    pub recv_timestamp: f64,
    pub src_addr: String,
    pub dst_addr: String,
}

impl PingResult {
    pub fn new(
        seq: u16,
        identifier: u16,
        dst_addr: Ipv4Addr,
        send_time: f64,
        outcome: &RoundOutcome,
    ) -> Self {
        let mut result = PingResult {
            seq,
            identifier,
            outcome: outcome.label(),
            rtt: f64::NAN,
            ttl: 0,
            size: 0,
            send_timestamp: send_time,
            recv_timestamp: 0.0,
            src_addr: String::new(),
            dst_addr: dst_addr.to_string(),
        };
        match outcome {
            RoundOutcome::Matched(sample) => {
                result.seq = sample.sequence;
                result.rtt = sample.rtt_ms;
                result.ttl = sample.ttl;
                result.size = sample.size;
                result.send_timestamp = sample.send_time;
                result.recv_timestamp = sample.recv_time;
                result.src_addr = sample.src_addr.to_string();
            }
            RoundOutcome::Unreachable { src_addr, .. } => {
                result.src_addr = src_addr.to_string();
            }
            _ => {}
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::icmp::Sample;

    #[test]
    fn csv_header() {
        let result = PingResult::new(
            0,
            1,
            Ipv4Addr::LOCALHOST,
            10.0,
            &RoundOutcome::Timeout,
        );
        assert_eq!(
            result.header(),
            "seq,identifier,outcome,rtt,ttl,size,send_timestamp,\
             recv_timestamp,src_addr,dst_addr\n"
        );
    }

    #[test]
    fn timeout_row() {
        let result = PingResult::new(
            4,
            99,
            Ipv4Addr::new(192, 0, 2, 7),
            10.5,
            &RoundOutcome::Timeout,
        );
        assert_eq!(
            result.to_string(),
            "4,99,timeout,NaN,0,0,10.5,0,,192.0.2.7\n"
        );
    }

    #[test]
    fn matched_row() {
        let outcome = RoundOutcome::Matched(Sample {
            sequence: 2,
            send_time: 100.0,
            recv_time: 100.25,
            rtt_ms: 250.0,
            ttl: 57,
            size: 16,
            src_addr: Ipv4Addr::new(192, 0, 2, 7),
        });
        let dst_addr = Ipv4Addr::new(192, 0, 2, 7);
        let result = PingResult::new(2, 99, dst_addr, 100.0, &outcome);
        assert_eq!(
            result.to_string(),
            "2,99,matched,250,57,16,100,100.25,192.0.2.7,192.0.2.7\n"
        );
    }
}
