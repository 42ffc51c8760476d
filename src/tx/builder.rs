//! TxBatchBuilder: assembles wrap, approval and swap legs into one
//! multisend call and hashes the Safe transaction executing it.

use ethers::types::{Address, Bytes, H256, U256};
use tracing::{debug, error, info, warn};

use crate::config::Params;
use crate::contracts::ContractApi;
use crate::strategy::SwapRoute;
use crate::types::{Operation, SwappingError, TxLeg};

/// Seconds a swap stays executable after the consensus timestamp.
pub const SWAP_DEADLINE_SECS: u64 = 120;

/// Percentage of the native balance converted when wrapping.
const WRAP_PERCENT: u64 = 80;

/// An assembled batch ready for signing.
#[derive(Debug, Clone, PartialEq)]
pub struct TxBatch {
    /// Legs in execution order.
    pub legs: Vec<TxLeg>,
    pub multisend_data: Bytes,
    pub safe_tx_hash: H256,
    /// Target of the Safe transaction (the multisend contract).
    pub to: Address,
    pub operation: Operation,
}

pub struct TxBatchBuilder<'a> {
    contracts: &'a dyn ContractApi,
    params: &'a Params,
    safe: Address,
}

impl<'a> TxBatchBuilder<'a> {
    pub fn new(contracts: &'a dyn ContractApi, params: &'a Params, safe: Address) -> Self {
        Self {
            contracts,
            params,
            safe,
        }
    }

    /// Native balance of the safe, zero when it cannot be read.
    pub async fn native_balance(&self, token: Address) -> U256 {
        match self.contracts.get_balance(token, self.safe).await {
            Ok(balance) => balance.native,
            Err(e) => {
                error!(error = %e, "Could not read the native balance, skipping wrap");
                U256::zero()
            }
        }
    }

    /// Wrap 80% of `native_balance` when it reaches the configured floor.
    /// `None` when below the floor or when the deposit call fails.
    pub async fn build_native_wrap(&self, native_balance: U256) -> Option<TxLeg> {
        if native_balance < self.params.min_native_balance {
            debug!(
                balance = %native_balance,
                floor = %self.params.min_native_balance,
                "Native balance below floor, no wrap"
            );
            return None;
        }

        let Some(scaled) = native_balance.checked_mul(U256::from(WRAP_PERCENT)) else {
            warn!(balance = %native_balance, "Native balance out of range, no wrap");
            return None;
        };
        let amount = scaled / U256::from(100u64);
        let wrapper = self.params.native_wrapper_address;
        match self.contracts.build_deposit_tx(wrapper).await {
            Ok(data) => {
                info!(amount = %amount, "Wrapping native balance");
                Some(TxLeg::call(wrapper, amount, data))
            }
            Err(e) => {
                error!(error = %e, "Could not build deposit tx");
                None
            }
        }
    }

    pub async fn build_approval(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<TxLeg, SwappingError> {
        let data = self
            .contracts
            .build_approval_tx(token, spender, amount)
            .await
            .map_err(|e| SwappingError::contract("build_approval_tx", e))?;
        Ok(TxLeg::call(token, U256::zero(), data))
    }

    /// Swap leg through the router. The router rejects it after `deadline`.
    pub async fn build_swap(
        &self,
        route: &SwapRoute,
        recipient: Address,
        deadline: u64,
    ) -> Result<TxLeg, SwappingError> {
        let router = self.params.router_address;
        let data = self
            .contracts
            .build_swap_tx(
                router,
                route.amount_in,
                route.amount_out_min,
                route.path(),
                recipient,
                deadline,
            )
            .await
            .map_err(|e| SwappingError::contract("build_swap_tx", e))?;
        Ok(TxLeg::call(router, U256::zero(), data))
    }

    /// Multisend calldata executing `legs` in the given order.
    pub async fn assemble_multisend(&self, legs: &[TxLeg]) -> Result<Bytes, SwappingError> {
        self.contracts
            .get_multisend_data(self.params.multisend_address, legs.to_vec())
            .await
            .map_err(|e| SwappingError::contract("get_multisend_data", e))
    }

    /// Safe hash of a delegate call to the multisend contract, `None` when
    /// the Safe binding does not answer.
    pub async fn compute_safe_tx_hash(&self, data: &Bytes) -> Option<H256> {
        match self
            .contracts
            .get_safe_tx_hash(
                self.safe,
                self.params.multisend_address,
                U256::zero(),
                data.clone(),
                Operation::DelegateCall,
                U256::zero(),
            )
            .await
        {
            Ok(hash) => Some(hash),
            Err(e) => {
                error!(error = %e, "Failed to get safe transaction hash");
                None
            }
        }
    }

    /// Full batch for `route`: optional wrap, approval of the source token,
    /// then the swap, with the deadline anchored at `timestamp`.
    pub async fn build_swap_batch(
        &self,
        route: &SwapRoute,
        base_token: Address,
        timestamp: i64,
    ) -> Result<TxBatch, SwappingError> {
        let mut legs = Vec::with_capacity(3);

        let native = self.native_balance(base_token).await;
        if let Some(wrap) = self.build_native_wrap(native).await {
            legs.push(wrap);
        }

        legs.push(
            self.build_approval(route.source, self.params.router_address, route.amount_in)
                .await?,
        );

        let deadline = u64::try_from(timestamp)
            .map_err(|_| SwappingError::Data(format!("negative timestamp {timestamp}")))?
            + SWAP_DEADLINE_SECS;
        legs.push(self.build_swap(route, self.safe, deadline).await?);

        info!(legs = legs.len(), reverse = route.reverse, "Prepared multisend legs");

        let multisend_data = self.assemble_multisend(&legs).await?;
        let safe_tx_hash = self
            .compute_safe_tx_hash(&multisend_data)
            .await
            .ok_or(SwappingError::SafeTxHashUnavailable)?;

        Ok(TxBatch {
            legs,
            multisend_data,
            safe_tx_hash,
            to: self.params.multisend_address,
            operation: Operation::DelegateCall,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
