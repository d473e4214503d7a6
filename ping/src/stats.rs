use std::fmt;

use common::Statistics;

use crate::icmp::RoundOutcome;

/// Per session counters. Only matched replies feed the RTT statistics and
/// only timeouts count as loss. Unreachable and malformed rounds are tallied
/// as errors; like discarded rounds they still count as transmitted.
#[derive(Debug, Clone)]
pub struct SessionStats {
    rtt: Statistics,
    rounds: u16,
    timeouts: u32,
    unreachable: u32,
    malformed: u32,
}

impl SessionStats {
    pub fn new(rounds: u16) -> Self {
        Self {
            rtt: Statistics::new(),
            rounds,
            timeouts: 0,
            unreachable: 0,
            malformed: 0,
        }
    }

    pub fn record(&mut self, outcome: &RoundOutcome) {
        match outcome {
            RoundOutcome::Matched(sample) => self.rtt.update(sample.rtt_ms),
            RoundOutcome::Timeout => self.timeouts += 1,
            RoundOutcome::Unreachable { .. } => self.unreachable += 1,
            RoundOutcome::Malformed(_) => self.malformed += 1,
            RoundOutcome::Discarded => {}
        }
    }

    pub fn finalize(&self) -> Summary {
        let loss_rate = if self.rounds == 0 {
            0.0
        } else {
            f64::from(self.timeouts) / f64::from(self.rounds) * 100.0
        };
        Summary {
            min: self.rtt.min(),
            max: self.rtt.max(),
            avg: self.rtt.mean(),
            mdev: self.rtt.standard_deviation(),
            loss_rate,
            transmitted: self.rounds,
            received: self.rtt.samples(),
            errors: self.unreachable + self.malformed,
        }
    }
}

/// Final figures of a session. RTTs are in milliseconds and all zero when no
/// reply was matched.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub mdev: f64,
    /// Percent of rounds that timed out
    pub loss_rate: f64,
    pub transmitted: u16,
    pub received: usize,
    pub errors: u32,
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packets transmitted, {} received, ",
            self.transmitted, self.received
        )?;
        if self.errors > 0 {
            write!(f, "{} errors, ", self.errors)?;
        }
        write!(
            f,
            "{:.1}% packet loss, rtt min/avg/max/mdev = \
             {:.3}/{:.3}/{:.3}/{:.3} ms",
            self.loss_rate, self.min, self.avg, self.max, self.mdev
        )
    }
}
