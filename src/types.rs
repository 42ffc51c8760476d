//! Shared types for the swapping agent.
//!
//! These types form the data model used across all modules. Rounds,
//! behaviours, the strategy engine and the transaction builder all depend
//! on them, so they carry no behaviour beyond validation and formatting.

use ethers::types::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::contracts::ContractError;

// ---------------------------------------------------------------------------
// Participants
// ---------------------------------------------------------------------------

/// Identifier of one replica taking part in consensus (its agent address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ---------------------------------------------------------------------------
// Rounds and events
// ---------------------------------------------------------------------------

/// Every round of the swapping state machine, including the terminal ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundId {
    StrategyEvaluation,
    ApiCheck,
    DecisionMaking,
    TxPreparation,
    FinishedStrategyEvaluation,
    FinishedDecisionMaking,
    FinishedTxPreparation,
}

impl RoundId {
    pub const ALL: &'static [RoundId] = &[
        RoundId::StrategyEvaluation,
        RoundId::ApiCheck,
        RoundId::DecisionMaking,
        RoundId::TxPreparation,
        RoundId::FinishedStrategyEvaluation,
        RoundId::FinishedDecisionMaking,
        RoundId::FinishedTxPreparation,
    ];

    /// Terminal rounds have no outgoing transitions; reaching one ends the period.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            RoundId::FinishedStrategyEvaluation
                | RoundId::FinishedDecisionMaking
                | RoundId::FinishedTxPreparation
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            RoundId::StrategyEvaluation => "strategy_evaluation",
            RoundId::ApiCheck => "api_check",
            RoundId::DecisionMaking => "decision_making",
            RoundId::TxPreparation => "tx_preparation",
            RoundId::FinishedStrategyEvaluation => "finished_strategy_evaluation",
            RoundId::FinishedDecisionMaking => "finished_decision_making",
            RoundId::FinishedTxPreparation => "finished_tx_preparation",
        }
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Signal returned by a round's decision step. Consumed immediately by the
/// transition table and never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    Done,
    Error,
    Transact,
    NoMajority,
    RoundTimeout,
    DoneEnter,
    DoneExit,
    DoneSwapBack,
}

impl Event {
    pub const ALL: &'static [Event] = &[
        Event::Done,
        Event::Error,
        Event::Transact,
        Event::NoMajority,
        Event::RoundTimeout,
        Event::DoneEnter,
        Event::DoneExit,
        Event::DoneSwapBack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Done => "done",
            Event::Error => "error",
            Event::Transact => "transact",
            Event::NoMajority => "no_majority",
            Event::RoundTimeout => "round_timeout",
            Event::DoneEnter => "done_enter",
            Event::DoneExit => "done_exit",
            Event::DoneSwapBack => "done_swap_back",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Event {
    type Err = SwappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| SwappingError::Data(format!("unknown event: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Trading intent for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyAction {
    Wait,
    Enter,
    Exit,
    SwapBack,
}

impl StrategyAction {
    /// Next cycle's action. `enter` and `swap_back` alternate; `wait` and
    /// `exit` pass through unchanged.
    pub fn toggled(self) -> Self {
        match self {
            StrategyAction::Enter => StrategyAction::SwapBack,
            StrategyAction::SwapBack => StrategyAction::Enter,
            other => other,
        }
    }
}

impl fmt::Display for StrategyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyAction::Wait => write!(f, "wait"),
            StrategyAction::Enter => write!(f, "enter"),
            StrategyAction::Exit => write!(f, "exit"),
            StrategyAction::SwapBack => write!(f, "swap_back"),
        }
    }
}

/// Safe transaction gas budget per action leg.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeTxGas {
    pub enter: u64,
    pub exit: u64,
    pub swap_back: u64,
}

/// One token leg of a strategy plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLeg {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker: Option<String>,
    pub address: Address,
    pub set_allowance: U256,
    pub remove_allowance: U256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_in_max: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_after_swap: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_min_after_swap_back: Option<U256>,
    /// Set once a swap-back has confirmed the leg holds a balance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_received: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_received_after_exit: Option<U256>,
    #[serde(default)]
    pub is_native: bool,
}

impl TokenLeg {
    /// Ticker for log output; the LP leg has none.
    pub fn label(&self) -> &str {
        self.ticker.as_deref().unwrap_or("LP")
    }
}

/// The agreed trading intent plus every amount needed to execute it.
///
/// Replicas only agree on the canonical (sorted-key) JSON text produced by
/// [`StrategyPlan::to_canonical`]; [`StrategyPlan::from_canonical`] is the
/// only parsing entry point and rejects plans that violate the per-action
/// field requirements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyPlan {
    pub action: StrategyAction,
    pub chain: String,
    pub deadline: i64,
    pub safe_nonce: u64,
    pub safe_tx_gas: SafeTxGas,
    pub token_base: TokenLeg,
    pub token_a: TokenLeg,
    #[serde(rename = "token_LP")]
    pub token_lp: TokenLeg,
}

impl StrategyPlan {
    /// Parse and validate a plan from its JSON text.
    pub fn from_canonical(json: &str) -> Result<Self, SwappingError> {
        let plan: StrategyPlan = serde_json::from_str(json)
            .map_err(|e| SwappingError::MalformedStrategy(e.to_string()))?;
        plan.validate()?;
        Ok(plan)
    }

    /// Serialize with recursively sorted keys so every replica produces
    /// byte-identical text for the same plan.
    pub fn to_canonical(&self) -> Result<String, SwappingError> {
        let value = serde_json::to_value(self)
            .map_err(|e| SwappingError::MalformedStrategy(e.to_string()))?;
        serde_json::to_string(&canonicalize(value))
            .map_err(|e| SwappingError::MalformedStrategy(e.to_string()))
    }

    /// Enforce the structural invariants: at most one native leg, and the
    /// amounts the current action relies on are present.
    pub fn validate(&self) -> Result<(), SwappingError> {
        let native_legs = [&self.token_base, &self.token_a, &self.token_lp]
            .iter()
            .filter(|leg| leg.is_native)
            .count();
        if native_legs > 1 {
            return Err(SwappingError::MalformedStrategy(format!(
                "{native_legs} native legs, at most one allowed"
            )));
        }

        let missing = match self.action {
            StrategyAction::Enter => {
                if self.token_base.amount_in_max.is_none() {
                    Some("token_base.amount_in_max")
                } else if self.token_a.amount_after_swap.is_none() {
                    Some("token_a.amount_after_swap")
                } else {
                    None
                }
            }
            StrategyAction::SwapBack => {
                if self.token_a.amount_after_swap.is_none() {
                    Some("token_a.amount_after_swap")
                } else if self.token_base.amount_min_after_swap_back.is_none() {
                    Some("token_base.amount_min_after_swap_back")
                } else {
                    None
                }
            }
            StrategyAction::Exit => {
                if self.token_a.amount_received_after_exit.is_none() {
                    Some("token_a.amount_received_after_exit")
                } else {
                    None
                }
            }
            StrategyAction::Wait => None,
        };

        match missing {
            Some(field) => Err(SwappingError::MalformedStrategy(format!(
                "action {} requires {field}",
                self.action
            ))),
            None => Ok(()),
        }
    }
}

/// Rebuild every JSON object with its keys inserted in sorted order.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// How the decision step derives its exit value from the amount trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionMode {
    /// Ratio of the last trail entry to the first.
    #[default]
    Ratio,
    /// Reference behaviour: both sides read the first entry, so the ratio
    /// is always 1 and the step never transacts.
    Legacy,
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Call type of a multisend leg or a Safe transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Call,
    DelegateCall,
}

impl Operation {
    pub fn as_u8(&self) -> u8 {
        match self {
            Operation::Call => 0,
            Operation::DelegateCall => 1,
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Operation::Call),
            1 => Some(Operation::DelegateCall),
            _ => None,
        }
    }
}

/// One atomic call inside a multisend batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLeg {
    pub operation: Operation,
    pub to: Address,
    pub value: U256,
    pub data: Bytes,
}

impl TxLeg {
    pub fn call(to: Address, value: U256, data: Bytes) -> Self {
        Self {
            operation: Operation::Call,
            to,
            value,
            data,
        }
    }
}

// ---------------------------------------------------------------------------
// Votes
// ---------------------------------------------------------------------------

/// One participant's vote for one round. Compared by exact equality when
/// tallying.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    StrategyEvaluation {
        strategy: String,
    },
    ApiCheck {
        strategy: String,
        amounts: Vec<U256>,
    },
    DecisionMaking {
        event: Event,
    },
    TxPreparation {
        tx_submitter: String,
        tx_hash: String,
    },
}

impl Payload {
    /// The round this payload can be cast in.
    pub fn round(&self) -> RoundId {
        match self {
            Payload::StrategyEvaluation { .. } => RoundId::StrategyEvaluation,
            Payload::ApiCheck { .. } => RoundId::ApiCheck,
            Payload::DecisionMaking { .. } => RoundId::DecisionMaking,
            Payload::TxPreparation { .. } => RoundId::TxPreparation,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the swapping agent.
#[derive(Debug, thiserror::Error)]
pub enum SwappingError {
    #[error("Contract call {call} failed: {source}")]
    Contract {
        call: &'static str,
        #[source]
        source: ContractError,
    },

    #[error("Malformed strategy: {0}")]
    MalformedStrategy(String),

    #[error("No transition from {round} on {event}")]
    InvalidTransition { round: RoundId, event: Event },

    #[error("Post-condition failed entering {round}: missing {key}")]
    PostCondition { round: RoundId, key: String },

    #[error("Synchronized data error: {0}")]
    Data(String),

    #[error("Safe transaction hash unavailable")]
    SafeTxHashUnavailable,

    #[error("Settlement payload error: {0}")]
    Settlement(String),

    #[error("No behaviour registered for round {0}")]
    MissingBehaviour(RoundId),

    #[error("Consensus error: {0}")]
    Consensus(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SwappingError {
    pub fn contract(call: &'static str, source: ContractError) -> Self {
        SwappingError::Contract { call, source }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
