//! Benchmark tool: per-behaviour timings of local work and of waiting for
//! consensus.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

use crate::types::RoundId;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Timings of one behaviour run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkRecord {
    pub behaviour: String,
    pub round: RoundId,
    pub period: u64,
    /// Time spent computing the vote.
    pub local_ms: u128,
    /// Time spent waiting for the round to end after voting.
    pub consensus_ms: u128,
    pub voted: bool,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregated timings per behaviour.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BehaviourSummary {
    pub runs: usize,
    pub votes: usize,
    pub total_local_ms: u128,
    pub total_consensus_ms: u128,
}

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

/// Running measurement of one behaviour; split in two phases.
#[derive(Debug)]
pub struct Measurement {
    behaviour: &'static str,
    round: RoundId,
    period: u64,
    started: Instant,
    local: Option<Duration>,
}

impl Measurement {
    /// End the local phase; consensus time is counted from here.
    pub fn local_done(&mut self) {
        if self.local.is_none() {
            self.local = Some(self.started.elapsed());
        }
    }
}

#[derive(Debug, Default)]
pub struct BenchmarkTool {
    records: Vec<BenchmarkRecord>,
}

impl BenchmarkTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, behaviour: &'static str, round: RoundId, period: u64) -> Measurement {
        Measurement {
            behaviour,
            round,
            period,
            started: Instant::now(),
            local: None,
        }
    }

    /// Close `measurement` and keep its record.
    pub fn finish(&mut self, measurement: Measurement, voted: bool) -> &BenchmarkRecord {
        let total = measurement.started.elapsed();
        let local = measurement.local.unwrap_or(total);
        let record = BenchmarkRecord {
            behaviour: measurement.behaviour.to_string(),
            round: measurement.round,
            period: measurement.period,
            local_ms: local.as_millis(),
            consensus_ms: total.saturating_sub(local).as_millis(),
            voted,
            recorded_at: Utc::now(),
        };
        info!(
            behaviour = %record.behaviour,
            period = record.period,
            local_ms = record.local_ms as u64,
            consensus_ms = record.consensus_ms as u64,
            voted,
            "Behaviour benchmark"
        );
        self.records.push(record);
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[BenchmarkRecord] {
        &self.records
    }

    pub fn summary(&self, behaviour: &str) -> BehaviourSummary {
        self.records
            .iter()
            .filter(|r| r.behaviour == behaviour)
            .fold(BehaviourSummary::default(), |mut acc, r| {
                acc.runs += 1;
                acc.votes += usize::from(r.voted);
                acc.total_local_ms += r.local_ms;
                acc.total_consensus_ms += r.consensus_ms;
                acc
            })
    }

    /// Records as a JSON array.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.records)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_records_phases() {
        let mut tool = BenchmarkTool::new();
        let mut m = tool.start("api_check", RoundId::ApiCheck, 3);
        std::thread::sleep(Duration::from_millis(5));
        m.local_done();
        let record = tool.finish(m, true).clone();
        assert_eq!(record.behaviour, "api_check");
        assert_eq!(record.period, 3);
        assert!(record.local_ms >= 5);
        assert!(record.voted);
        assert_eq!(tool.records().len(), 1);
    }

    #[test]
    fn test_local_defaults_to_total() {
        let mut tool = BenchmarkTool::new();
        let m = tool.start("decision_making", RoundId::DecisionMaking, 0);
        let record = tool.finish(m, false);
        assert_eq!(record.consensus_ms, 0);
    }

    #[test]
    fn test_summary_and_json() {
        let mut tool = BenchmarkTool::new();
        for voted in [true, false, true] {
            let m = tool.start("tx_preparation", RoundId::TxPreparation, 0);
            tool.finish(m, voted);
        }
        let m = tool.start("api_check", RoundId::ApiCheck, 0);
        tool.finish(m, true);

        let summary = tool.summary("tx_preparation");
        assert_eq!(summary.runs, 3);
        assert_eq!(summary.votes, 2);

        let json = tool.to_json().unwrap();
        assert!(json.contains("\"round\": \"tx_preparation\""));

        tool.clear();
        assert!(tool.records().is_empty());
    }
}
