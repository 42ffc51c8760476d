//! Transact/done decision over the agreed amount trail.

use ethers::types::U256;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, info};

use super::pricing::to_decimal;
use crate::types::{DecisionMode, Event};

/// Exit/entry value ratio above which the swap is worth transacting.
pub const ENTRY_EXIT_RATIO: Decimal = dec!(1.05);

/// Base-unit decimals of the traded tokens.
const TOKEN_DECIMALS: u32 = 18;

/// Number of entries in a complete round-trip trail.
const TRAIL_LEN: usize = 4;

/// `Transact` iff exit value / entry value exceeds [`ENTRY_EXIT_RATIO`].
///
/// Needs the full four-entry trail; anything shorter, a zero entry value
/// or an amount too large to convert yields `Done`. In
/// [`DecisionMode::Legacy`] the exit value is read from the entry slot,
/// so the ratio is always 1.
pub fn decide(amounts: &[U256], mode: DecisionMode) -> Event {
    if amounts.len() != TRAIL_LEN {
        debug!(len = amounts.len(), "Amount trail incomplete");
        return Event::Done;
    }

    let exit_index = match mode {
        DecisionMode::Ratio => TRAIL_LEN - 1,
        DecisionMode::Legacy => 0,
    };

    let (Some(initial), Some(final_amount)) = (
        to_decimal(amounts[0], TOKEN_DECIMALS),
        to_decimal(amounts[exit_index], TOKEN_DECIMALS),
    ) else {
        debug!("Amount trail does not fit a decimal");
        return Event::Done;
    };

    let Some(ratio) = final_amount.checked_div(initial) else {
        return Event::Done;
    };

    let event = if ratio > ENTRY_EXIT_RATIO {
        Event::Transact
    } else {
        Event::Done
    };
    info!(%initial, final_amount = %final_amount, %ratio, ?mode, %event, "Decision made");
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trail(values: [u64; 4]) -> Vec<U256> {
        values.into_iter().map(U256::from).collect()
    }

    #[test]
    fn test_golden_cases() {
        assert_eq!(decide(&trail([100, 0, 0, 106]), DecisionMode::Ratio), Event::Transact);
        assert_eq!(decide(&trail([100, 0, 0, 100]), DecisionMode::Ratio), Event::Done);
    }

    #[test]
    fn test_boundary_is_exclusive() {
        assert_eq!(decide(&trail([100, 0, 0, 105]), DecisionMode::Ratio), Event::Done);
    }

    #[test]
    fn test_incomplete_trail() {
        assert_eq!(decide(&[], DecisionMode::Ratio), Event::Done);
        assert_eq!(decide(&trail([100, 0, 0, 106])[..2], DecisionMode::Ratio), Event::Done);
    }

    #[test]
    fn test_zero_entry_value() {
        assert_eq!(decide(&trail([0, 1, 1, 500]), DecisionMode::Ratio), Event::Done);
    }

    #[test]
    fn test_legacy_mode_never_transacts() {
        assert_eq!(decide(&trail([100, 0, 0, 106]), DecisionMode::Legacy), Event::Done);
        assert_eq!(decide(&trail([1, 0, 0, 1_000_000]), DecisionMode::Legacy), Event::Done);
    }

    #[test]
    fn test_oversized_amounts() {
        let amounts = vec![U256::one(), U256::zero(), U256::zero(), U256::MAX];
        assert_eq!(decide(&amounts, DecisionMode::Ratio), Event::Done);
    }

    #[test]
    fn test_wei_scale_amounts() {
        let entry = U256::exp10(18);
        let exit = U256::from(2u64) * U256::exp10(18);
        let amounts = vec![entry, U256::one(), U256::one(), exit];
        assert_eq!(decide(&amounts, DecisionMode::Ratio), Event::Transact);
    }
}
