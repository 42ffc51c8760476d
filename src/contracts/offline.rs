//! Deterministic in-process contract backend.
//!
//! Answers every `ContractApi` request without an RPC endpoint: quotes
//! come from constant-product pools with a 0.3% fee, balances come from
//! configuration, and calldata and Safe hashes are produced with the same
//! ABI encoding the deployed contracts expect. Used for paper runs and
//! integration tests.

use async_trait::async_trait;
use ethers::abi::{encode, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{id, keccak256};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::{Balance, ContractApi, ContractError};
use crate::config::AppConfig;
use crate::types::{Operation, TxLeg};

const DOMAIN_TYPEHASH: &str = "EIP712Domain(uint256 chainId,address verifyingContract)";
const SAFE_TX_TYPEHASH: &str = "SafeTx(address to,uint256 value,bytes data,uint8 operation,uint256 safeTxGas,uint256 baseGas,uint256 gasPrice,address gasToken,address refundReceiver,uint256 nonce)";

/// A two-token constant-product pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    pub token0: Address,
    pub token1: Address,
    pub reserve0: U256,
    pub reserve1: U256,
}

impl Pool {
    /// Reserves ordered as `(reserve_in, reserve_out)` for a hop, if this
    /// pool trades the pair.
    fn reserves_for(&self, from: Address, to: Address) -> Option<(U256, U256)> {
        if self.token0 == from && self.token1 == to {
            Some((self.reserve0, self.reserve1))
        } else if self.token1 == from && self.token0 == to {
            Some((self.reserve1, self.reserve0))
        } else {
            None
        }
    }
}

/// Uniswap-v2 style output amount for an exact input, fee 0.3%.
pub fn amm_amount_out(amount_in: U256, reserve_in: U256, reserve_out: U256) -> U256 {
    if amount_in.is_zero() || reserve_in.is_zero() || reserve_out.is_zero() {
        return U256::zero();
    }
    let amount_in_with_fee = amount_in.saturating_mul(U256::from(997u64));
    let numerator = amount_in_with_fee.saturating_mul(reserve_out);
    let denominator = reserve_in
        .saturating_mul(U256::from(1000u64))
        .saturating_add(amount_in_with_fee);
    numerator / denominator
}

/// Pack legs in the MultiSend wire format:
/// `operation(1) ‖ to(20) ‖ value(32) ‖ data length(32) ‖ data` per leg.
pub fn pack_multisend(legs: &[TxLeg]) -> Vec<u8> {
    let mut packed = Vec::new();
    for leg in legs {
        packed.push(leg.operation.as_u8());
        packed.extend_from_slice(leg.to.as_bytes());
        packed.extend_from_slice(&u256_bytes(leg.value));
        packed.extend_from_slice(&u256_bytes(U256::from(leg.data.len())));
        packed.extend_from_slice(&leg.data);
    }
    packed
}

/// EIP-712 hash of a Safe transaction with zero refund parameters.
pub fn safe_tx_hash(
    chain_id: u64,
    safe: Address,
    to: Address,
    value: U256,
    data: &[u8],
    operation: Operation,
    safe_tx_gas: U256,
    nonce: u64,
) -> H256 {
    let domain_separator = keccak256(encode(&[
        Token::FixedBytes(keccak256(DOMAIN_TYPEHASH).to_vec()),
        Token::Uint(U256::from(chain_id)),
        Token::Address(safe),
    ]));

    let struct_hash = keccak256(encode(&[
        Token::FixedBytes(keccak256(SAFE_TX_TYPEHASH).to_vec()),
        Token::Address(to),
        Token::Uint(value),
        Token::FixedBytes(keccak256(data).to_vec()),
        Token::Uint(U256::from(operation.as_u8())),
        Token::Uint(safe_tx_gas),
        Token::Uint(U256::zero()),
        Token::Uint(U256::zero()),
        Token::Address(Address::zero()),
        Token::Address(Address::zero()),
        Token::Uint(U256::from(nonce)),
    ]));

    let mut preimage = Vec::with_capacity(66);
    preimage.extend_from_slice(&[0x19, 0x01]);
    preimage.extend_from_slice(&domain_separator);
    preimage.extend_from_slice(&struct_hash);
    H256::from(keccak256(preimage))
}

fn u256_bytes(value: U256) -> [u8; 32] {
    let mut buf = [0u8; 32];
    value.to_big_endian(&mut buf);
    buf
}

fn calldata(signature: &str, args: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(encode(args));
    Bytes::from(data)
}

/// In-memory chain answering contract calls deterministically.
#[derive(Debug, Clone, Default)]
pub struct OfflineContracts {
    chain_id: u64,
    pools: Vec<Pool>,
    balances: HashMap<Address, U256>,
    native_balance: U256,
    safe_nonce: u64,
    fail_calls: HashSet<String>,
}

impl OfflineContracts {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            ..Self::default()
        }
    }

    /// Build the backend from the `[offline]` section.
    pub fn from_config(config: &AppConfig) -> Self {
        let offline = &config.offline;
        let mut contracts = Self::new(config.setup.chain_id)
            .with_native_balance(offline.native_balance)
            .with_safe_nonce(offline.safe_nonce);
        for pool in &offline.pools {
            contracts = contracts.with_pool(Pool {
                token0: pool.token0,
                token1: pool.token1,
                reserve0: pool.reserve0,
                reserve1: pool.reserve1,
            });
        }
        for balance in &offline.balances {
            contracts = contracts.with_balance(balance.token, balance.amount);
        }
        for call in &offline.fail_calls {
            contracts = contracts.failing(call);
        }
        contracts
    }

    pub fn with_pool(mut self, pool: Pool) -> Self {
        self.pools.push(pool);
        self
    }

    pub fn with_balance(mut self, token: Address, amount: U256) -> Self {
        self.balances.insert(token, amount);
        self
    }

    pub fn with_native_balance(mut self, amount: U256) -> Self {
        self.native_balance = amount;
        self
    }

    pub fn with_safe_nonce(mut self, nonce: u64) -> Self {
        self.safe_nonce = nonce;
        self
    }

    /// Make the named call (e.g. `get_safe_tx_hash`) fail.
    pub fn failing(mut self, call: &str) -> Self {
        self.fail_calls.insert(call.to_string());
        self
    }

    fn check(&self, call: &str) -> Result<(), ContractError> {
        if self.fail_calls.contains(call) {
            debug!(call, "Offline backend failing call on request");
            return Err(ContractError::Unavailable(call.to_string()));
        }
        Ok(())
    }

    fn pool_for(&self, from: Address, to: Address) -> Option<(U256, U256)> {
        self.pools.iter().find_map(|p| p.reserves_for(from, to))
    }
}

#[async_trait]
impl ContractApi for OfflineContracts {
    async fn get_balance(&self, token: Address, _account: Address) -> Result<Balance, ContractError> {
        self.check("get_balance")?;
        Ok(Balance {
            token: self.balances.get(&token).copied().unwrap_or_default(),
            native: self.native_balance,
        })
    }

    async fn get_amounts_out(
        &self,
        _router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> Result<Vec<U256>, ContractError> {
        self.check("get_amounts_out")?;
        if path.len() < 2 {
            return Err(ContractError::UnexpectedResponse {
                callable: "get_amounts_out".to_string(),
                message: format!("path of length {} is too short", path.len()),
            });
        }

        let mut amounts = vec![amount_in];
        for hop in path.windows(2) {
            let (reserve_in, reserve_out) =
                self.pool_for(hop[0], hop[1])
                    .ok_or_else(|| ContractError::UnexpectedResponse {
                        callable: "get_amounts_out".to_string(),
                        message: format!("no pool for {:?} -> {:?}", hop[0], hop[1]),
                    })?;
            let last = amounts.last().copied().unwrap_or_default();
            amounts.push(amm_amount_out(last, reserve_in, reserve_out));
        }
        Ok(amounts)
    }

    async fn build_deposit_tx(&self, _wrapper: Address) -> Result<Bytes, ContractError> {
        self.check("build_deposit_tx")?;
        Ok(calldata("deposit()", &[]))
    }

    async fn build_approval_tx(
        &self,
        _token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<Bytes, ContractError> {
        self.check("build_approval_tx")?;
        Ok(calldata(
            "approve(address,uint256)",
            &[Token::Address(spender), Token::Uint(amount)],
        ))
    }

    async fn build_swap_tx(
        &self,
        _router: Address,
        amount_in: U256,
        amount_out_min: U256,
        path: Vec<Address>,
        to: Address,
        deadline: u64,
    ) -> Result<Bytes, ContractError> {
        self.check("build_swap_tx")?;
        Ok(calldata(
            "swapExactTokensForTokens(uint256,uint256,address[],address,uint256)",
            &[
                Token::Uint(amount_in),
                Token::Uint(amount_out_min),
                Token::Array(path.into_iter().map(Token::Address).collect()),
                Token::Address(to),
                Token::Uint(U256::from(deadline)),
            ],
        ))
    }

    async fn get_multisend_data(
        &self,
        _multisend: Address,
        legs: Vec<TxLeg>,
    ) -> Result<Bytes, ContractError> {
        self.check("get_multisend_data")?;
        Ok(calldata(
            "multiSend(bytes)",
            &[Token::Bytes(pack_multisend(&legs))],
        ))
    }

    async fn get_safe_tx_hash(
        &self,
        safe: Address,
        to: Address,
        value: U256,
        data: Bytes,
        operation: Operation,
        safe_tx_gas: U256,
    ) -> Result<H256, ContractError> {
        self.check("get_safe_tx_hash")?;
        Ok(safe_tx_hash(
            self.chain_id,
            safe,
            to,
            value,
            &data,
            operation,
            safe_tx_gas,
            self.safe_nonce,
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
