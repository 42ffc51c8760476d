//! Round behaviours.
//!
//! Each round has one [`Behaviour`] producing this replica's vote for it.
//! Behaviours are looked up by round id in a [`BehaviourRegistry`]; they
//! hold no state between runs, everything they need arrives through the
//! [`BehaviourContext`].

pub mod swapping;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::consensus::network::RoundView;
use crate::contracts::ContractApi;
use crate::strategy::StrategyEngine;
use crate::types::{ParticipantId, Payload, RoundId, SwappingError};

pub use swapping::{
    ApiCheckBehaviour, DecisionMakingBehaviour, StrategyEvaluationBehaviour,
    TxPreparationBehaviour,
};

/// Everything a behaviour may read while computing its vote.
pub struct BehaviourContext<'a> {
    pub sender: &'a ParticipantId,
    pub view: &'a RoundView,
    pub engine: &'a StrategyEngine,
    pub contracts: &'a dyn ContractApi,
}

#[async_trait]
pub trait Behaviour: Send + Sync {
    fn matching_round(&self) -> RoundId;

    /// Stable identifier, used for benchmarking and as the tx submitter.
    fn name(&self) -> &'static str;

    /// Compute this replica's vote. An error means no vote is cast for
    /// this round instance.
    async fn run(&self, ctx: &BehaviourContext<'_>) -> Result<Payload, SwappingError>;
}

/// Behaviours keyed by the round they serve.
#[derive(Default)]
pub struct BehaviourRegistry {
    behaviours: HashMap<RoundId, Box<dyn Behaviour>>,
}

impl BehaviourRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four swapping behaviours.
    pub fn swapping() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(StrategyEvaluationBehaviour));
        registry.register(Box::new(ApiCheckBehaviour));
        registry.register(Box::new(DecisionMakingBehaviour));
        registry.register(Box::new(TxPreparationBehaviour));
        registry
    }

    /// Register `behaviour`, replacing any other for the same round.
    pub fn register(&mut self, behaviour: Box<dyn Behaviour>) {
        self.behaviours.insert(behaviour.matching_round(), behaviour);
    }

    pub fn get(&self, round: RoundId) -> Result<&dyn Behaviour, SwappingError> {
        self.behaviours
            .get(&round)
            .map(|b| &**b)
            .ok_or(SwappingError::MissingBehaviour(round))
    }

    pub fn len(&self) -> usize {
        self.behaviours.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviours.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapping_registry_covers_active_rounds() {
        let registry = BehaviourRegistry::swapping();
        assert_eq!(registry.len(), 4);
        for round in RoundId::ALL {
            let found = registry.get(*round);
            if round.is_final() {
                assert!(matches!(found, Err(SwappingError::MissingBehaviour(_))));
            } else {
                assert_eq!(found.unwrap().matching_round(), *round);
            }
        }
    }
}
