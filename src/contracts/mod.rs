//! Contract-call layer.
//!
//! Defines the `ContractApi` trait: the logical requests the rounds make
//! against the chain (balances, AMM quotes, calldata builders, multisend
//! packing, Safe transaction hashing). The signing/RPC side lives behind
//! this trait; `offline` provides a deterministic in-process backend.

pub mod offline;

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};

use crate::types::{Operation, TxLeg};

/// Failure of a single contract call. Callers treat every variant as
/// "no usable result" and degrade, never as fatal for the round.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractError {
    #[error("unexpected response from {callable}: {message}")]
    UnexpectedResponse { callable: String, message: String },

    #[error("contract call {0} is unavailable")]
    Unavailable(String),
}

/// Token and native balances of an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    pub token: U256,
    pub native: U256,
}

/// Abstraction over the contract bindings the agent consumes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContractApi: Send + Sync {
    /// ERC-20 balance of `account` for `token`, plus its native balance.
    async fn get_balance(&self, token: Address, account: Address) -> Result<Balance, ContractError>;

    /// Router quote: amounts along `path` for an exact `amount_in`.
    async fn get_amounts_out(
        &self,
        router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> Result<Vec<U256>, ContractError>;

    /// Calldata wrapping native currency at `wrapper`.
    async fn build_deposit_tx(&self, wrapper: Address) -> Result<Bytes, ContractError>;

    /// Calldata approving `spender` for `amount` of `token`.
    async fn build_approval_tx(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<Bytes, ContractError>;

    /// Calldata for an exact-input router swap.
    async fn build_swap_tx(
        &self,
        router: Address,
        amount_in: U256,
        amount_out_min: U256,
        path: Vec<Address>,
        to: Address,
        deadline: u64,
    ) -> Result<Bytes, ContractError>;

    /// Calldata executing `legs` atomically, in order, through `multisend`.
    async fn get_multisend_data(
        &self,
        multisend: Address,
        legs: Vec<TxLeg>,
    ) -> Result<Bytes, ContractError>;

    /// Hash of the Safe transaction the custodians must sign.
    async fn get_safe_tx_hash(
        &self,
        safe: Address,
        to: Address,
        value: U256,
        data: Bytes,
        operation: Operation,
        safe_tx_gas: U256,
    ) -> Result<H256, ContractError>;
}
