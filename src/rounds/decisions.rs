//! Per-round `end_block`: turn the current vote log into the next data
//! version and event.
//!
//! Pure given its inputs, so every replica that observed the same votes
//! computes the same outcome.

use serde_json::Value;
use tracing::{info, warn};

use super::collection_key;
use crate::consensus::collector::ThresholdCollector;
use crate::consensus::store::{encode_amounts, keys, SynchronizedData};
use crate::types::{Event, Payload, RoundId, StrategyAction, StrategyPlan, SwappingError};

/// What a round's vote log decides at the end of a block.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOutcome {
    /// Not enough votes yet, but quorum is still reachable.
    Pending,
    NoMajority,
    Decided { data: SynchronizedData, event: Event },
}

/// Event the StrategyEvaluation round emits for an agreed plan.
pub fn strategy_event(strategy: &str) -> Event {
    match StrategyPlan::from_canonical(strategy) {
        Ok(plan) => match plan.action {
            StrategyAction::Enter | StrategyAction::SwapBack => Event::DoneEnter,
            StrategyAction::Wait | StrategyAction::Exit => Event::Done,
        },
        Err(e) => {
            warn!(error = %e, "Agreed strategy is unusable, ending period");
            Event::Done
        }
    }
}

pub fn end_block(
    round: RoundId,
    data: &SynchronizedData,
    collector: &ThresholdCollector,
) -> Result<BlockOutcome, SwappingError> {
    let key = collection_key(round).ok_or_else(|| {
        SwappingError::Consensus(format!("round {round} does not collect votes"))
    })?;

    let Some(payload) = collector.threshold_payload() else {
        return Ok(if collector.is_majority_possible() {
            BlockOutcome::Pending
        } else {
            BlockOutcome::NoMajority
        });
    };

    let collection = serde_json::to_value(collector.collection())
        .map_err(|e| SwappingError::Data(format!("collection {key}: {e}")))?;

    let (updates, event): (Vec<(&str, Value)>, Event) = match (round, payload) {
        (RoundId::StrategyEvaluation, Payload::StrategyEvaluation { strategy }) => (
            vec![(keys::MOST_VOTED_STRATEGY, Value::String(strategy.clone()))],
            strategy_event(strategy),
        ),
        (RoundId::ApiCheck, Payload::ApiCheck { strategy, amounts }) => (
            vec![
                (keys::MOST_VOTED_STRATEGY, Value::String(strategy.clone())),
                (keys::AMOUNTS, encode_amounts(amounts)),
            ],
            Event::Done,
        ),
        (RoundId::DecisionMaking, Payload::DecisionMaking { event }) => (Vec::new(), *event),
        (
            RoundId::TxPreparation,
            Payload::TxPreparation {
                tx_submitter,
                tx_hash,
            },
        ) => (
            vec![
                (keys::TX_SUBMITTER, Value::String(tx_submitter.clone())),
                (keys::MOST_VOTED_TX_HASH, Value::String(tx_hash.clone())),
            ],
            Event::Done,
        ),
        (round, payload) => {
            return Err(SwappingError::Consensus(format!(
                "payload for {} reached quorum in {round}",
                payload.round()
            )))
        }
    };

    info!(
        round = %round,
        event = %event,
        votes = collector.votes_received(),
        "Round reached threshold"
    );

    let data = data.update(updates.into_iter().chain([(key, collection)]));
    Ok(BlockOutcome::Decided { data, event })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
