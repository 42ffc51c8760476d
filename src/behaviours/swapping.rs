//! The four swapping behaviours.

use async_trait::async_trait;
use tracing::{error, info};

use super::{Behaviour, BehaviourContext};
use crate::strategy::{decide, SwapRoute};
use crate::tx::{SettlementPayload, TxBatchBuilder};
use crate::types::{Event, Payload, RoundId, StrategyPlan, SwappingError};

fn agreed_plan(ctx: &BehaviourContext<'_>) -> Result<StrategyPlan, SwappingError> {
    let strategy = ctx.view.data.most_voted_strategy().ok_or_else(|| {
        SwappingError::Data("most_voted_strategy is not set".to_string())
    })?;
    StrategyPlan::from_canonical(strategy)
}

/// Toggles the agreed plan, or synthesizes the default one.
pub struct StrategyEvaluationBehaviour;

#[async_trait]
impl Behaviour for StrategyEvaluationBehaviour {
    fn matching_round(&self) -> RoundId {
        RoundId::StrategyEvaluation
    }

    fn name(&self) -> &'static str {
        "strategy_evaluation"
    }

    async fn run(&self, ctx: &BehaviourContext<'_>) -> Result<Payload, SwappingError> {
        let plan = ctx.engine.evaluate(
            ctx.view.data.most_voted_strategy(),
            ctx.view.period,
            ctx.view.timestamp,
        );
        Ok(Payload::StrategyEvaluation {
            strategy: plan.to_canonical()?,
        })
    }
}

/// Prices the agreed plan and records the round-trip amount trail.
pub struct ApiCheckBehaviour;

#[async_trait]
impl Behaviour for ApiCheckBehaviour {
    fn matching_round(&self) -> RoundId {
        RoundId::ApiCheck
    }

    fn name(&self) -> &'static str {
        "api_check"
    }

    async fn run(&self, ctx: &BehaviourContext<'_>) -> Result<Payload, SwappingError> {
        let plan = agreed_plan(ctx)?;
        let safe = ctx.view.data.safe_contract_address();

        let check = ctx.engine.price_check(ctx.contracts, plan, safe).await;
        let amounts = ctx.engine.round_trip(ctx.contracts, &check).await;
        info!(
            prices = ?check.prices,
            trail = amounts.len(),
            "Price check complete"
        );

        Ok(Payload::ApiCheck {
            strategy: check.plan.to_canonical()?,
            amounts,
        })
    }
}

/// Votes `transact` or `done` from the agreed amount trail.
pub struct DecisionMakingBehaviour;

#[async_trait]
impl Behaviour for DecisionMakingBehaviour {
    fn matching_round(&self) -> RoundId {
        RoundId::DecisionMaking
    }

    fn name(&self) -> &'static str {
        "decision_making"
    }

    async fn run(&self, ctx: &BehaviourContext<'_>) -> Result<Payload, SwappingError> {
        let event = match ctx.view.data.amounts() {
            Ok(amounts) => decide(&amounts, ctx.engine.params().decision_mode),
            Err(e) => {
                error!(error = %e, "Amount trail unreadable");
                Event::Error
            }
        };
        Ok(Payload::DecisionMaking { event })
    }
}

/// Builds the multisend batch for the agreed swap and votes its
/// settlement payload.
pub struct TxPreparationBehaviour;

#[async_trait]
impl Behaviour for TxPreparationBehaviour {
    fn matching_round(&self) -> RoundId {
        RoundId::TxPreparation
    }

    fn name(&self) -> &'static str {
        "tx_preparation"
    }

    async fn run(&self, ctx: &BehaviourContext<'_>) -> Result<Payload, SwappingError> {
        let plan = agreed_plan(ctx)?;
        let route = SwapRoute::from_plan(&plan)?;
        info!(
            amount_in = %route.amount_in,
            amount_out_min = %route.amount_out_min,
            reverse = route.reverse,
            "Preparing swap"
        );

        let builder = TxBatchBuilder::new(
            ctx.contracts,
            ctx.engine.params(),
            ctx.view.data.safe_contract_address(),
        );
        let batch = builder
            .build_swap_batch(&route, plan.token_base.address, ctx.view.timestamp)
            .await?;
        info!(safe_tx_hash = ?batch.safe_tx_hash, legs = batch.legs.len(), "Safe transaction hash");

        Ok(Payload::TxPreparation {
            tx_submitter: self.name().to_string(),
            tx_hash: SettlementPayload::from_batch(&batch).encode(),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
