//! Mock chain for integration testing.
//!
//! Provides a scripted `ContractApi` implementation: router quotes are
//! looked up by `(amount_in, path)`, balances and failures are fully
//! controllable from test code, and every call is recorded. Calldata and
//! Safe hashes come from the offline backend, so the transactions built
//! on top of it are real.

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::{Address, Bytes, H256, U256};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use swapping_agent::config::{AppConfig, Params};
use swapping_agent::consensus::network::LocalNetwork;
use swapping_agent::consensus::store::SynchronizedData;
use swapping_agent::contracts::offline::OfflineContracts;
use swapping_agent::contracts::{Balance, ContractApi, ContractError};
use swapping_agent::engine::{BehaviourScheduler, PeriodReport};
use swapping_agent::strategy::StrategyEngine;
use swapping_agent::types::{Operation, ParticipantId, SwappingError, TxLeg};

pub const WXDAI: &str = "0xe91d153e0b41518a2ce8dd3d7944fa863463a97d";
pub const WETH: &str = "0x6a023ccd1ff6f2045c3309768ead9e68f978f6e1";
pub const SAFE: &str = "0x0000000000000000000000000000000000005afe";
pub const GENESIS: i64 = 1_700_000_000;

pub fn addr(s: &str) -> Address {
    s.parse().unwrap()
}

pub fn amounts(values: &[u64]) -> Vec<U256> {
    values.iter().copied().map(U256::from).collect()
}

// ---------------------------------------------------------------------------
// Mock chain
// ---------------------------------------------------------------------------

/// A scripted chain for deterministic testing.
#[derive(Clone)]
pub struct MockChain {
    backend: OfflineContracts,
    quotes: Arc<Mutex<HashMap<(U256, Vec<Address>), Vec<U256>>>>,
    balances: Arc<Mutex<HashMap<Address, U256>>>,
    native_balance: Arc<Mutex<U256>>,
    /// Remaining forced failures per call name; `usize::MAX` fails forever.
    failures: Arc<Mutex<HashMap<String, usize>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            backend: OfflineContracts::new(100),
            quotes: Arc::new(Mutex::new(HashMap::new())),
            balances: Arc::new(Mutex::new(HashMap::new())),
            native_balance: Arc::new(Mutex::new(U256::zero())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Router answers `result` for `amount_in` along `path`.
    pub fn quote(&self, amount_in: u64, path: &[Address], result: &[u64]) {
        self.quotes
            .lock()
            .unwrap()
            .insert((U256::from(amount_in), path.to_vec()), amounts(result));
    }

    pub fn set_balance(&self, token: Address, amount: u64) {
        self.balances.lock().unwrap().insert(token, U256::from(amount));
    }

    pub fn set_native_balance(&self, amount: U256) {
        *self.native_balance.lock().unwrap() = amount;
    }

    /// Fail the next `times` calls of `call`.
    pub fn fail(&self, call: &str, times: usize) {
        self.failures.lock().unwrap().insert(call.to_string(), times);
    }

    /// Clear all forced failures.
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: &str) -> Result<(), ContractError> {
        self.calls.lock().unwrap().push(call.to_string());
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(call) {
            Some(remaining) if *remaining > 0 => {
                if *remaining != usize::MAX {
                    *remaining -= 1;
                }
                Err(ContractError::Unavailable(call.to_string()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ContractApi for MockChain {
    async fn get_balance(&self, token: Address, _account: Address) -> Result<Balance, ContractError> {
        self.record("get_balance")?;
        Ok(Balance {
            token: self.balances.lock().unwrap().get(&token).copied().unwrap_or_default(),
            native: *self.native_balance.lock().unwrap(),
        })
    }

    async fn get_amounts_out(
        &self,
        _router: Address,
        amount_in: U256,
        path: Vec<Address>,
    ) -> Result<Vec<U256>, ContractError> {
        self.record("get_amounts_out")?;
        self.quotes
            .lock()
            .unwrap()
            .get(&(amount_in, path))
            .cloned()
            .ok_or_else(|| ContractError::UnexpectedResponse {
                callable: "get_amounts_out".to_string(),
                message: format!("no quote scripted for {amount_in}"),
            })
    }

    async fn build_deposit_tx(&self, wrapper: Address) -> Result<Bytes, ContractError> {
        self.record("build_deposit_tx")?;
        self.backend.build_deposit_tx(wrapper).await
    }

    async fn build_approval_tx(
        &self,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<Bytes, ContractError> {
        self.record("build_approval_tx")?;
        self.backend.build_approval_tx(token, spender, amount).await
    }

    async fn build_swap_tx(
        &self,
        router: Address,
        amount_in: U256,
        amount_out_min: U256,
        path: Vec<Address>,
        to: Address,
        deadline: u64,
    ) -> Result<Bytes, ContractError> {
        self.record("build_swap_tx")?;
        self.backend
            .build_swap_tx(router, amount_in, amount_out_min, path, to, deadline)
            .await
    }

    async fn get_multisend_data(
        &self,
        multisend: Address,
        legs: Vec<TxLeg>,
    ) -> Result<Bytes, ContractError> {
        self.record("get_multisend_data")?;
        self.backend.get_multisend_data(multisend, legs).await
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
        self.record("get_safe_tx_hash")?;
        self.backend
            .get_safe_tx_hash(safe, to, value, data, operation, safe_tx_gas)
            .await
    }
}

/// Chain scripted for a profitable entry: `[500, 10]` for 1000 wxdai and
/// `[10, 1100]` back.
pub fn profitable_chain() -> MockChain {
    let chain = MockChain::new();
    chain.quote(1_000, &[addr(WXDAI), addr(WETH)], &[500, 10]);
    chain.quote(10, &[addr(WETH), addr(WXDAI)], &[10, 1_100]);
    chain
}

// ---------------------------------------------------------------------------
// Configuration and replica set
// ---------------------------------------------------------------------------

pub fn config(participants: &[&str]) -> AppConfig {
    let list = participants
        .iter()
        .map(|p| format!("\"{p}\""))
        .collect::<Vec<_>>()
        .join(", ");
    let toml = format!(
        r#"
        [agent]
        name = "test-swapper"
        cycle_interval_secs = 1

        [setup]
        all_participants = [{list}]
        safe_contract_address = "{SAFE}"

        [params]
        router_address = "0x1C232F01118CB8B424793ae03F870aa7D0ac7f77"
        min_native_balance = 5
        target_tokens = "weth:{WETH}"
        selection_seed = 1

        [params.rebalancing]
        chain = "gnosis"
        deadline = 300
        token_base_ticker = "wxdai"
        token_base_address = "{WXDAI}"
        lp_token_address = "0x01f4a4d82a4c1cf12eb2dadc35fd87a14526cc79"
        max_allowance = "1000000000000000000000000"
        default_max_allowance = 1000
        token_a_ticker = "weth"
        token_a_address = "{WETH}"
        "#
    );
    let cfg = AppConfig::from_toml_str(&toml).unwrap();
    cfg.validate().unwrap();
    cfg
}

pub fn params(cfg: &AppConfig) -> Params {
    cfg.params().unwrap()
}

/// A network shared by `cfg`'s participants, with a fixed genesis.
pub fn network(cfg: &AppConfig, timeout: Duration) -> Arc<LocalNetwork> {
    let data = SynchronizedData::new(cfg.participants(), cfg.setup.safe_contract_address);
    Arc::new(LocalNetwork::with_genesis(data, cfg.quorum(), timeout, GENESIS))
}

/// One scheduler per participant; `chains[i]` backs the i-th participant
/// in sorted order.
pub fn replicas(
    cfg: &AppConfig,
    network: &Arc<LocalNetwork>,
    chains: &[MockChain],
) -> Vec<BehaviourScheduler> {
    let participants: BTreeSet<ParticipantId> = cfg.participants();
    assert_eq!(participants.len(), chains.len());
    participants
        .into_iter()
        .zip(chains.iter().cloned())
        .map(|(participant, chain)| {
            BehaviourScheduler::new(
                participant,
                StrategyEngine::new(params(cfg)),
                Arc::new(chain),
                network.clone(),
            )
        })
        .collect()
}

/// Run the current period on every replica concurrently.
pub async fn run_period(
    schedulers: &mut [BehaviourScheduler],
) -> Vec<Result<PeriodReport, SwappingError>> {
    futures::future::join_all(schedulers.iter_mut().map(|s| s.run_period())).await
}
