//! Throughput figures printed after each round

use std::{fmt::Display, time::Duration};

/// The measurement of one timed round
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunResult {
    pub elapsed: Duration,
    pub record_count: u64,
    pub records_per_second: f64,
}

impl RunResult {
    pub fn new(record_count: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let records_per_second = if secs > 0.0 {
            record_count as f64 / secs
        } else {
            0.0
        };
        Self {
            elapsed,
            record_count,
            records_per_second,
        }
    }
}

impl Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{:.6} = {:.6} records/second",
            self.record_count,
            self.elapsed.as_secs_f64(),
            self.records_per_second
        )
    }
}

/// The arithmetic mean of records/second over the rounds that ran
pub fn mean_records_per_second(results: &[RunResult]) -> Option<f64> {
    if results.is_empty() {
        return None;
    }
    let sum: f64 = results.iter().map(|r| r.records_per_second).sum();
    Some(sum / results.len() as f64)
}

/// What a multi-round write run produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    /// One result per completed round, in order
    pub rounds: Vec<RunResult>,
    /// The run stopped because a round was declined
    pub aborted: bool,
}

impl Summary {
    pub fn mean(&self) -> Option<f64> {
        mean_records_per_second(&self.rounds)
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.mean() {
            Some(mean) => {
                let sum: f64 = self.rounds.iter().map(|r| r.records_per_second).sum();
                write!(
                    f,
                    "avg test: {sum:.6}/{rounds} = {mean:.6} records/second",
                    rounds = self.rounds.len()
                )
            }
            None => write!(f, "avg test: no completed rounds"),
        }
    }
}
