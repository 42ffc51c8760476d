//! Swap direction and AMM pricing.
//!
//! Quotes fail soft: any RPC error, empty result or zero amount yields an
//! empty amount list, which callers read as "no usable price".

use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use tracing::{debug, error, info};

use super::StrategyEngine;
use crate::contracts::ContractApi;
use crate::types::{StrategyAction, StrategyPlan, SwappingError};

/// Source, destination and amounts of the swap a plan describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRoute {
    pub source: Address,
    pub destination: Address,
    pub amount_in: U256,
    pub amount_out_min: U256,
    /// True when swapping `token_a` back into `token_base`.
    pub reverse: bool,
}

impl SwapRoute {
    /// Route for executing `plan`.
    ///
    /// A swap back only runs in reverse once pricing confirmed a `token_a`
    /// balance (`amount_received` is set); otherwise the entry direction
    /// is used.
    pub fn from_plan(plan: &StrategyPlan) -> Result<Self, SwappingError> {
        let reverse =
            plan.action == StrategyAction::SwapBack && plan.token_a.amount_received.is_some();
        let missing = |field: &str| SwappingError::MalformedStrategy(format!("missing {field}"));

        if reverse {
            Ok(Self {
                source: plan.token_a.address,
                destination: plan.token_base.address,
                amount_in: plan
                    .token_a
                    .amount_received
                    .ok_or_else(|| missing("token_a.amount_received"))?,
                amount_out_min: plan
                    .token_base
                    .amount_min_after_swap_back
                    .ok_or_else(|| missing("token_base.amount_min_after_swap_back"))?,
                reverse,
            })
        } else {
            Ok(Self {
                source: plan.token_base.address,
                destination: plan.token_a.address,
                amount_in: plan
                    .token_base
                    .amount_in_max
                    .ok_or_else(|| missing("token_base.amount_in_max"))?,
                amount_out_min: plan
                    .token_a
                    .amount_after_swap
                    .ok_or_else(|| missing("token_a.amount_after_swap"))?,
                reverse,
            })
        }
    }

    pub fn path(&self) -> Vec<Address> {
        vec![self.source, self.destination]
    }
}

/// Outcome of pricing a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceCheck {
    /// The plan with the quoted output written into it.
    pub plan: StrategyPlan,
    /// `[amounts[0] / amount_in, amounts[1] / amounts[0]]`, empty when no
    /// usable quote was obtained.
    pub prices: Vec<Decimal>,
    pub amounts_out: Vec<U256>,
    pub source: Address,
    pub destination: Address,
    pub amount_in: U256,
    pub reverse: bool,
}

impl PriceCheck {
    pub fn has_price(&self) -> bool {
        !self.amounts_out.is_empty()
    }
}

/// `amount / 10^scale` as a decimal, `None` if it does not fit.
pub fn to_decimal(amount: U256, scale: u32) -> Option<Decimal> {
    if amount.bits() > 96 {
        return None;
    }
    Decimal::try_from_i128_with_scale(amount.as_u128() as i128, scale).ok()
}

fn ratio(numerator: U256, denominator: U256) -> Option<Decimal> {
    to_decimal(numerator, 0)?.checked_div(to_decimal(denominator, 0)?)
}

impl StrategyEngine {
    /// Router quote for `amount_in` along `path`, or an empty list.
    pub async fn quote(
        &self,
        contracts: &dyn ContractApi,
        amount_in: U256,
        path: Vec<Address>,
    ) -> Vec<U256> {
        let hops = path.len();
        match contracts
            .get_amounts_out(self.params.router_address, amount_in, path)
            .await
        {
            Err(e) => {
                error!(error = %e, "Getting the swap price failed");
                Vec::new()
            }
            Ok(amounts) if amounts.len() != hops => {
                error!(
                    expected = hops,
                    received = amounts.len(),
                    "Getting amounts out failed"
                );
                Vec::new()
            }
            Ok(amounts) => match amounts.iter().position(|a| a.is_zero()) {
                Some(index) => {
                    error!(index, "Found zero amount in quote");
                    Vec::new()
                }
                None => {
                    debug!(?amounts, "Amounts out");
                    amounts
                }
            },
        }
    }

    /// Price the plan's swap and record the quoted output in the plan.
    ///
    /// A swap back first checks that `safe` holds `token_a`; without a
    /// balance the prior entry has not settled, so the entry direction is
    /// priced and the swap-back leg stays untouched.
    pub async fn price_check(
        &self,
        contracts: &dyn ContractApi,
        plan: StrategyPlan,
        safe: Address,
    ) -> PriceCheck {
        let mut plan = plan;
        let mut reverse = false;

        if plan.action == StrategyAction::SwapBack {
            match contracts.get_balance(plan.token_a.address, safe).await {
                Ok(balance) if !balance.token.is_zero() => {
                    info!(token = plan.token_a.label(), balance = %balance.token, "Swap back balance found");
                    plan.token_a.amount_received = plan.token_a.amount_after_swap;
                    reverse = plan.token_a.amount_received.is_some();
                }
                Ok(_) => info!(
                    token = plan.token_a.label(),
                    "No balance to swap back yet, pricing entry direction"
                ),
                Err(e) => error!(error = %e, "Could not read the safe balance"),
            }
        }

        let (source, destination, amount_in) = match (reverse, plan.token_a.amount_received) {
            (true, Some(received)) => (plan.token_a.address, plan.token_base.address, received),
            _ => (
                plan.token_base.address,
                plan.token_a.address,
                self.params.rebalancing.default_max_allowance,
            ),
        };

        let amounts_out = self
            .quote(contracts, amount_in, vec![source, destination])
            .await;

        let prices: Option<Vec<Decimal>> = match amounts_out.as_slice() {
            [first, second] => ratio(*first, amount_in)
                .zip(ratio(*second, *first))
                .map(|(p1, p2)| vec![p1, p2]),
            _ => None,
        };

        let Some(prices) = prices else {
            return PriceCheck {
                plan,
                prices: Vec::new(),
                amounts_out: Vec::new(),
                source,
                destination,
                amount_in,
                reverse,
            };
        };

        let received = amounts_out[1];
        if reverse {
            plan.token_base.amount_min_after_swap_back = Some(received);
        } else {
            plan.token_a.amount_after_swap = Some(received);
        }
        info!(?prices, reverse, "Prices computed");

        PriceCheck {
            plan,
            prices,
            amounts_out,
            source,
            destination,
            amount_in,
            reverse,
        }
    }

    /// Quote the output of `check` back into its source token. Returns the
    /// amount trail `[x0, x1, y0, y1]`, shortened when a leg fails.
    pub async fn round_trip(&self, contracts: &dyn ContractApi, check: &PriceCheck) -> Vec<U256> {
        if !check.has_price() {
            return Vec::new();
        }
        let mut trail = check.amounts_out.clone();
        let back = self
            .quote(
                contracts,
                check.amounts_out[1],
                vec![check.destination, check.source],
            )
            .await;
        trail.extend(back);
        trail
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
