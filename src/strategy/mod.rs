//! Strategy engine: action toggling, token selection, pricing and the
//! transact/done decision.

pub mod decision;
pub mod pricing;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::config::{Params, TokenCandidate};
use crate::types::{SafeTxGas, StrategyAction, StrategyPlan, TokenLeg};

pub use decision::{decide, ENTRY_EXIT_RATIO};
pub use pricing::{PriceCheck, SwapRoute};

/// Minimum output accepted on a swap back, in base units, for a fresh plan.
const DEFAULT_MIN_AFTER_SWAP_BACK: u64 = 100;
/// Expected output of the entry swap, in base units, for a fresh plan.
const DEFAULT_AMOUNT_AFTER_SWAP: u64 = 1_000;

/// Produces and updates the strategy plan. Stateless between calls: every
/// input arrives through the plan, the period and the consensus timestamp.
#[derive(Debug, Clone)]
pub struct StrategyEngine {
    params: Params,
}

impl StrategyEngine {
    pub fn new(params: Params) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Next plan from the previously agreed one.
    ///
    /// A missing or unusable previous plan is replaced by
    /// [`default_plan`](Self::default_plan). Otherwise the action toggles
    /// (`enter` <-> `swap_back`). Entering picks the traded token from the
    /// candidate set.
    pub fn evaluate(&self, previous: Option<&str>, period: u64, timestamp: i64) -> StrategyPlan {
        let mut plan = match previous.map(StrategyPlan::from_canonical) {
            None => {
                info!("No previous strategy, starting from the default plan");
                self.default_plan(timestamp)
            }
            Some(Err(e)) => {
                warn!(error = %e, "Previous strategy unusable, starting from the default plan");
                self.default_plan(timestamp)
            }
            Some(Ok(mut plan)) => {
                plan.action = plan.action.toggled();
                match plan.validate() {
                    Ok(()) => plan,
                    Err(e) => {
                        warn!(error = %e, "Toggled strategy incomplete, starting from the default plan");
                        self.default_plan(timestamp)
                    }
                }
            }
        };

        match plan.action {
            StrategyAction::Enter => {
                if let Some(token) = self.select_token(period, timestamp) {
                    plan.token_a.ticker = Some(token.ticker.clone());
                    plan.token_a.address = token.address;
                }
                plan.token_a.amount_received = None;
                info!(
                    base = plan.token_base.label(),
                    token = plan.token_a.label(),
                    "Strategy update: moving into pair"
                );
            }
            StrategyAction::SwapBack => info!(
                token = plan.token_a.label(),
                base = plan.token_base.label(),
                "Strategy update: swapping back"
            ),
            StrategyAction::Exit => info!(
                base = plan.token_base.label(),
                token = plan.token_a.label(),
                "Strategy update: moving out of pair"
            ),
            StrategyAction::Wait => info!("Current strategy is still optimal, waiting"),
        }

        plan
    }

    /// Reproducible pick from the candidate set. Every replica derives the
    /// same seed from the shared period and consensus timestamp.
    pub fn select_token(&self, period: u64, timestamp: i64) -> Option<&TokenCandidate> {
        let seed = self.params.selection_seed ^ period.rotate_left(32) ^ timestamp as u64;
        let mut rng = StdRng::seed_from_u64(seed);
        self.params.candidate_tokens.choose(&mut rng)
    }

    /// Fresh `enter` plan built from the rebalancing parameters.
    pub fn default_plan(&self, timestamp: i64) -> StrategyPlan {
        let rebalancing = &self.params.rebalancing;
        let leg = |ticker: Option<&str>, address| TokenLeg {
            ticker: ticker.map(str::to_string),
            address,
            set_allowance: rebalancing.max_allowance,
            remove_allowance: Default::default(),
            amount_in_max: None,
            amount_after_swap: None,
            amount_min_after_swap_back: None,
            amount_received: None,
            amount_received_after_exit: None,
            is_native: false,
        };

        let mut token_base = leg(
            Some(rebalancing.token_base_ticker.as_str()),
            rebalancing.token_base_address,
        );
        token_base.amount_in_max = Some(rebalancing.default_max_allowance);
        token_base.amount_min_after_swap_back = Some(DEFAULT_MIN_AFTER_SWAP_BACK.into());

        let mut token_a = leg(
            Some(rebalancing.token_a_ticker.as_str()),
            rebalancing.token_a_address,
        );
        token_a.amount_after_swap = Some(DEFAULT_AMOUNT_AFTER_SWAP.into());
        token_a.amount_received_after_exit = Some(Default::default());

        StrategyPlan {
            action: StrategyAction::Enter,
            chain: rebalancing.chain.clone(),
            deadline: timestamp + rebalancing.deadline,
            safe_nonce: 0,
            safe_tx_gas: SafeTxGas::default(),
            token_base,
            token_a,
            token_lp: leg(None, rebalancing.lp_token_address),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
