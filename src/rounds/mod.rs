//! RoundStateMachine.
//!
//! The static transition table, the per-round decision step
//! ([`decisions::end_block`]) and the [`machine::RoundStateMachine`] that
//! applies them to incoming votes.

pub mod decisions;
pub mod machine;

use crate::consensus::store::{keys, SynchronizedData};
use crate::types::{Event, RoundId, SwappingError};

pub const INITIAL_ROUND: RoundId = RoundId::StrategyEvaluation;

/// Every `(round, event) -> next round` edge. Pairs not listed are invalid.
pub const TRANSITIONS: &[(RoundId, Event, RoundId)] = &[
    (RoundId::StrategyEvaluation, Event::NoMajority, RoundId::StrategyEvaluation),
    (RoundId::StrategyEvaluation, Event::RoundTimeout, RoundId::StrategyEvaluation),
    (RoundId::StrategyEvaluation, Event::Done, RoundId::FinishedStrategyEvaluation),
    (RoundId::StrategyEvaluation, Event::DoneEnter, RoundId::ApiCheck),
    (RoundId::ApiCheck, Event::NoMajority, RoundId::ApiCheck),
    (RoundId::ApiCheck, Event::RoundTimeout, RoundId::ApiCheck),
    (RoundId::ApiCheck, Event::Done, RoundId::DecisionMaking),
    (RoundId::DecisionMaking, Event::NoMajority, RoundId::DecisionMaking),
    (RoundId::DecisionMaking, Event::RoundTimeout, RoundId::DecisionMaking),
    (RoundId::DecisionMaking, Event::Done, RoundId::FinishedDecisionMaking),
    (RoundId::DecisionMaking, Event::Error, RoundId::FinishedDecisionMaking),
    (RoundId::DecisionMaking, Event::Transact, RoundId::TxPreparation),
    (RoundId::TxPreparation, Event::NoMajority, RoundId::TxPreparation),
    (RoundId::TxPreparation, Event::RoundTimeout, RoundId::TxPreparation),
    (RoundId::TxPreparation, Event::Done, RoundId::FinishedTxPreparation),
];

/// Look up the next round for `event` fired in `round`.
pub fn transition(round: RoundId, event: Event) -> Result<RoundId, SwappingError> {
    TRANSITIONS
        .iter()
        .find(|(from, on, _)| *from == round && *on == event)
        .map(|(_, _, to)| *to)
        .ok_or(SwappingError::InvalidTransition { round, event })
}

/// Key the round records its vote collection under.
pub fn collection_key(round: RoundId) -> Option<&'static str> {
    match round {
        RoundId::StrategyEvaluation => Some(keys::PARTICIPANT_TO_STRATEGY),
        RoundId::ApiCheck => Some(keys::PARTICIPANT_TO_PRICE_ROUND),
        RoundId::DecisionMaking => Some(keys::PARTICIPANT_TO_DECISION_ROUND),
        RoundId::TxPreparation => Some(keys::PARTICIPANT_TO_TX_ROUND),
        _ => None,
    }
}

/// Keys that must be set in the data a round is entered with.
pub fn post_conditions(round: RoundId) -> &'static [&'static str] {
    match round {
        RoundId::FinishedTxPreparation => &[keys::MOST_VOTED_TX_HASH],
        _ => &[],
    }
}

pub fn check_post_conditions(round: RoundId, data: &SynchronizedData) -> Result<(), SwappingError> {
    match post_conditions(round)
        .iter()
        .find(|key| data.get(key).is_none())
    {
        Some(key) => Err(SwappingError::PostCondition {
            round,
            key: key.to_string(),
        }),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
