//! SynchronizedStore: the replicated key-value state every round reads and
//! writes.
//!
//! A [`SynchronizedData`] value is an immutable snapshot. Rounds never
//! mutate it; [`SynchronizedData::update`] returns the next version and
//! [`DataLog`] keeps every version produced during a period.

use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{ParticipantId, Payload, SwappingError};

/// Keys written by the rounds.
pub mod keys {
    pub const MOST_VOTED_STRATEGY: &str = "most_voted_strategy";
    pub const FINAL_TX_HASH: &str = "final_tx_hash";
    pub const MOST_VOTED_TX_HASH: &str = "most_voted_tx_hash";
    pub const TX_SUBMITTER: &str = "tx_submitter";
    pub const AMOUNTS: &str = "amounts";

    pub const PARTICIPANT_TO_STRATEGY: &str = "participant_to_strategy";
    pub const PARTICIPANT_TO_PRICE_ROUND: &str = "participant_to_price_round";
    pub const PARTICIPANT_TO_DECISION_ROUND: &str = "participant_to_decision_round";
    pub const PARTICIPANT_TO_TX_ROUND: &str = "participant_to_tx_round";

    /// Keys that survive into the next period.
    pub const CROSS_PERIOD: &[&str] = &[MOST_VOTED_STRATEGY, FINAL_TX_HASH];
}

/// One immutable version of the replicated state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynchronizedData {
    period: u64,
    version: u64,
    participants: BTreeSet<ParticipantId>,
    safe_contract_address: Address,
    values: BTreeMap<String, Value>,
}

impl SynchronizedData {
    pub fn new(participants: BTreeSet<ParticipantId>, safe_contract_address: Address) -> Self {
        Self {
            period: 0,
            version: 0,
            participants,
            safe_contract_address,
            values: BTreeMap::new(),
        }
    }

    /// Rebuild a snapshot from persisted cross-period values.
    pub fn restore(
        participants: BTreeSet<ParticipantId>,
        safe_contract_address: Address,
        period: u64,
        values: BTreeMap<String, Value>,
    ) -> Self {
        let values = values
            .into_iter()
            .filter(|(key, _)| keys::CROSS_PERIOD.contains(&key.as_str()))
            .collect();
        Self {
            period,
            version: 0,
            participants,
            safe_contract_address,
            values,
        }
    }

    pub fn period(&self) -> u64 {
        self.period
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn participants(&self) -> &BTreeSet<ParticipantId> {
        &self.participants
    }

    pub fn safe_contract_address(&self) -> Address {
        self.safe_contract_address
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_strict(&self, key: &str) -> Result<&Value, SwappingError> {
        self.values
            .get(key)
            .ok_or_else(|| SwappingError::Data(format!("key {key} is not set")))
    }

    /// Next version with `updates` applied on top of the current values.
    pub fn update<I, K>(&self, updates: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut values = self.values.clone();
        for (key, value) in updates {
            values.insert(key.into(), value);
        }
        Self {
            period: self.period,
            version: self.version + 1,
            participants: self.participants.clone(),
            safe_contract_address: self.safe_contract_address,
            values,
        }
    }

    /// Fresh snapshot for the next period, keeping only cross-period keys.
    pub fn next_period(&self) -> Self {
        let values = self
            .values
            .iter()
            .filter(|(key, _)| keys::CROSS_PERIOD.contains(&key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Self {
            period: self.period + 1,
            version: self.version + 1,
            participants: self.participants.clone(),
            safe_contract_address: self.safe_contract_address,
            values,
        }
    }

    /// Cross-period values, as persisted between runs.
    pub fn cross_period_values(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .filter(|(key, _)| keys::CROSS_PERIOD.contains(&key.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn most_voted_strategy(&self) -> Option<&str> {
        self.get_str(keys::MOST_VOTED_STRATEGY)
    }

    pub fn most_voted_tx_hash(&self) -> Option<&str> {
        self.get_str(keys::MOST_VOTED_TX_HASH)
    }

    pub fn final_tx_hash(&self) -> Option<&str> {
        self.get_str(keys::FINAL_TX_HASH)
    }

    pub fn tx_submitter(&self) -> Option<&str> {
        self.get_str(keys::TX_SUBMITTER)
    }

    /// The amount trail in index order. An absent key is an empty trail;
    /// a present but malformed one is an error.
    pub fn amounts(&self) -> Result<Vec<U256>, SwappingError> {
        match self.values.get(keys::AMOUNTS) {
            None => Ok(Vec::new()),
            Some(value) => decode_amounts(value),
        }
    }

    /// Votes recorded under a `participant_to_<round>` key.
    pub fn collection(
        &self,
        key: &str,
    ) -> Result<BTreeMap<ParticipantId, Payload>, SwappingError> {
        match self.values.get(key) {
            None => Ok(BTreeMap::new()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|e| SwappingError::Data(format!("collection {key}: {e}"))),
        }
    }
}

/// Encode an amount trail as an index-keyed map of decimal strings.
pub fn encode_amounts(amounts: &[U256]) -> Value {
    let map: Map<String, Value> = amounts
        .iter()
        .enumerate()
        .map(|(i, amount)| (i.to_string(), Value::String(amount.to_string())))
        .collect();
    Value::Object(map)
}

fn decode_amounts(value: &Value) -> Result<Vec<U256>, SwappingError> {
    let map = value
        .as_object()
        .ok_or_else(|| SwappingError::Data("amounts is not an object".to_string()))?;

    let mut entries = Vec::with_capacity(map.len());
    for (key, raw) in map {
        let index: usize = key
            .parse()
            .map_err(|_| SwappingError::Data(format!("amounts index {key} is not a number")))?;
        let amount = match raw {
            Value::String(s) => U256::from_dec_str(s)
                .map_err(|e| SwappingError::Data(format!("amounts[{index}]: {e}")))?,
            Value::Number(n) => n
                .as_u64()
                .map(U256::from)
                .ok_or_else(|| SwappingError::Data(format!("amounts[{index}] is negative")))?,
            other => {
                return Err(SwappingError::Data(format!(
                    "amounts[{index}] has unexpected value {other}"
                )))
            }
        };
        entries.push((index, amount));
    }

    entries.sort_by_key(|(index, _)| *index);
    if entries.iter().enumerate().any(|(pos, (index, _))| pos != *index) {
        return Err(SwappingError::Data("amounts indices are not contiguous".to_string()));
    }
    Ok(entries.into_iter().map(|(_, amount)| amount).collect())
}

/// Every version produced during the current period, oldest first.
#[derive(Debug, Clone)]
pub struct DataLog {
    versions: Vec<SynchronizedData>,
}

impl DataLog {
    pub fn new(initial: SynchronizedData) -> Self {
        Self {
            versions: vec![initial],
        }
    }

    pub fn push(&mut self, data: SynchronizedData) {
        self.versions.push(data);
    }

    pub fn latest(&self) -> &SynchronizedData {
        // Never empty: constructed with an initial version
        &self.versions[self.versions.len() - 1]
    }

    pub fn versions(&self) -> &[SynchronizedData] {
        &self.versions
    }

    /// Start a new period's log from `data`, dropping older versions.
    pub fn reset(&mut self, data: SynchronizedData) {
        self.versions.clear();
        self.versions.push(data);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
