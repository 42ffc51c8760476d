//! BehaviourScheduler: drives one replica through a period.
//!
//! For each active round: look up its behaviour, run it to a vote, cast
//! the vote, then wait for the round to end. A behaviour still running
//! when its round ends (another quorum or a timeout) is dropped; the next
//! round starts from the new view.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::benchmark::BenchmarkTool;
use crate::behaviours::{BehaviourContext, BehaviourRegistry};
use crate::consensus::collector::VoteOutcome;
use crate::consensus::network::{ConsensusClient, RoundView};
use crate::consensus::store::SynchronizedData;
use crate::contracts::ContractApi;
use crate::strategy::StrategyEngine;
use crate::types::{ParticipantId, RoundId, SwappingError};

/// Rounds one `run_period` call drives before yielding back to the caller.
pub const MAX_ROUNDS_PER_RUN: usize = 32;

// ---------------------------------------------------------------------------
// Period report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PeriodReport {
    pub period: u64,
    /// Last round observed; terminal when the period completed.
    pub final_round: RoundId,
    pub rounds_run: usize,
    pub votes_cast: usize,
    pub data: SynchronizedData,
}

impl PeriodReport {
    pub fn completed(&self) -> bool {
        self.final_round.is_final()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct BehaviourScheduler {
    sender: ParticipantId,
    registry: BehaviourRegistry,
    engine: StrategyEngine,
    contracts: Arc<dyn ContractApi>,
    consensus: Arc<dyn ConsensusClient>,
    benchmark: BenchmarkTool,
    max_rounds: usize,
}

impl BehaviourScheduler {
    pub fn new(
        sender: ParticipantId,
        engine: StrategyEngine,
        contracts: Arc<dyn ContractApi>,
        consensus: Arc<dyn ConsensusClient>,
    ) -> Self {
        Self {
            sender,
            registry: BehaviourRegistry::swapping(),
            engine,
            contracts,
            consensus,
            benchmark: BenchmarkTool::new(),
            max_rounds: MAX_ROUNDS_PER_RUN,
        }
    }

    pub fn with_registry(mut self, registry: BehaviourRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn sender(&self) -> &ParticipantId {
        &self.sender
    }

    pub fn benchmark(&self) -> &BenchmarkTool {
        &self.benchmark
    }

    /// Run rounds of the current period until it reaches a terminal round.
    ///
    /// Stops early when another replica already opened the next period,
    /// or after `max_rounds` rounds; the period then stays open and a later
    /// call resumes it.
    pub async fn run_period(&mut self) -> Result<PeriodReport, SwappingError> {
        let mut view = self.consensus.current_view();
        let period = view.period;
        let mut rounds_run = 0;
        let mut votes_cast = 0;

        info!(sender = %self.sender, period, round = %view.round, "Period started");

        while !view.round.is_final() && view.period == period {
            if rounds_run >= self.max_rounds {
                warn!(
                    sender = %self.sender,
                    period,
                    round = %view.round,
                    rounds_run,
                    "Round budget exhausted, period left open"
                );
                break;
            }
            let (next, voted) = self.run_round(&view).await?;
            rounds_run += 1;
            votes_cast += usize::from(voted);
            view = next;
        }

        let report = PeriodReport {
            period,
            final_round: view.round,
            rounds_run,
            votes_cast,
            data: view.data,
        };
        info!(
            sender = %self.sender,
            period,
            final_round = %report.final_round,
            rounds = rounds_run,
            votes = votes_cast,
            "Period report"
        );
        Ok(report)
    }

    /// Run the behaviour of `view.round`, vote, and wait for the round to
    /// end. Returns the view that replaced it and whether a vote was cast.
    pub async fn run_round(&mut self, view: &RoundView) -> Result<(RoundView, bool), SwappingError> {
        let behaviour = self.registry.get(view.round)?;
        let mut measurement = self.benchmark.start(behaviour.name(), view.round, view.period);
        debug!(sender = %self.sender, behaviour = behaviour.name(), round_seq = view.round_seq, "Behaviour started");

        let ctx = BehaviourContext {
            sender: &self.sender,
            view,
            engine: &self.engine,
            contracts: self.contracts.as_ref(),
        };

        let produced = tokio::select! {
            biased;
            decided = self.consensus.await_round_decision(view.round_seq) => {
                let next = decided?;
                debug!(
                    sender = %self.sender,
                    behaviour = behaviour.name(),
                    "Round ended before the behaviour finished, work discarded"
                );
                measurement.local_done();
                self.benchmark.finish(measurement, false);
                return Ok((next, false));
            }
            payload = behaviour.run(&ctx) => payload,
        };
        measurement.local_done();

        let voted = match produced {
            Ok(payload) => {
                match self
                    .consensus
                    .cast_vote(&self.sender, view.round_seq, payload)
                    .await
                {
                    Ok(VoteOutcome::Accepted) => {
                        debug!(sender = %self.sender, round = %view.round, "Vote accepted");
                        true
                    }
                    Ok(outcome) => {
                        debug!(sender = %self.sender, round = %view.round, ?outcome, "Vote not counted");
                        false
                    }
                    Err(e) => {
                        error!(sender = %self.sender, round = %view.round, error = %e, "Casting vote failed");
                        true
                    }
                }
            }
            Err(e) => {
                warn!(
                    sender = %self.sender,
                    behaviour = behaviour.name(),
                    error = %e,
                    "Behaviour failed, no vote cast"
                );
                false
            }
        };

        let next = self.consensus.await_round_decision(view.round_seq).await?;
        self.benchmark.finish(measurement, voted);
        Ok((next, voted))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
