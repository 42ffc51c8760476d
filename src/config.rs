//! Configuration loading from TOML with environment variable overrides.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs. A
//! small set of deployment values (router, safe, participants, native
//! thresholds) can be overridden from the environment, which is how the
//! agent is configured per deployment without editing the file.

use anyhow::{bail, Context, Result};
use ethers::types::{Address, U256};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

use crate::consensus::collector::consensus_threshold;
use crate::types::{DecisionMode, ParticipantId};

/// Round timeout is this many multiples of the configured base timeout.
pub const ROUND_TIMEOUT_MULTIPLIER: u64 = 10;

/// Candidate set used when `target_tokens` is empty.
const DEFAULT_TARGET_TOKENS: &str = "weth:0x6a023ccd1ff6f2045c3309768ead9e68f978f6e1,\
wxdai:0xe91d153e0b41518a2ce8dd3d7944fa863463a97d,\
wbtc:0x8e5bbbb09ed1ebde8674cda39a0c169401db4252";

const DEFAULT_MULTISEND: &str = "0xA238CBeb142c10Ef7Ad8442C6D1f9E89e07e7761";
const DEFAULT_NATIVE_WRAPPER: &str = "0xe91d153e0b41518a2ce8dd3d7944fa863463a97d";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub setup: SetupConfig,
    pub params: ParamsConfig,
    #[serde(default)]
    pub offline: OfflineConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub cycle_interval_secs: u64,
    #[serde(default = "default_state_file")]
    pub state_file: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SetupConfig {
    pub all_participants: Vec<String>,
    pub safe_contract_address: Address,
    /// Overrides the default `ceil((2n + 1) / 3)` quorum.
    #[serde(default)]
    pub consensus_threshold: Option<usize>,
    #[serde(default = "default_round_timeout")]
    pub round_timeout_secs: u64,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParamsConfig {
    pub router_address: Address,
    #[serde(default = "default_multisend")]
    pub multisend_address: Address,
    #[serde(default = "default_native_wrapper")]
    pub native_wrapper_address: Address,
    /// Native balance (whole units) at or above which part of it is wrapped.
    pub min_native_balance: u64,
    /// Comma-separated `ticker:address` candidates for the traded token.
    #[serde(default)]
    pub target_tokens: String,
    #[serde(default)]
    pub selection_seed: u64,
    #[serde(default)]
    pub decision_mode: DecisionMode,
    pub rebalancing: RebalancingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RebalancingConfig {
    pub chain: String,
    /// Seconds added to the consensus timestamp for a fresh plan's deadline.
    pub deadline: i64,
    pub token_base_ticker: String,
    pub token_base_address: Address,
    pub lp_token_address: Address,
    #[serde(deserialize_with = "amount::deserialize")]
    pub max_allowance: U256,
    #[serde(deserialize_with = "amount::deserialize")]
    pub default_max_allowance: U256,
    pub token_a_ticker: String,
    pub token_a_address: Address,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OfflineConfig {
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    #[serde(default)]
    pub balances: Vec<BalanceConfig>,
    #[serde(default, deserialize_with = "amount::deserialize")]
    pub native_balance: U256,
    #[serde(default)]
    pub safe_nonce: u64,
    /// Contract calls the offline backend should fail, by method name.
    #[serde(default)]
    pub fail_calls: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PoolConfig {
    pub token0: Address,
    pub token1: Address,
    #[serde(deserialize_with = "amount::deserialize")]
    pub reserve0: U256,
    #[serde(deserialize_with = "amount::deserialize")]
    pub reserve1: U256,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BalanceConfig {
    pub token: Address,
    #[serde(deserialize_with = "amount::deserialize")]
    pub amount: U256,
}

fn default_state_file() -> String {
    "swapping_state.json".to_string()
}

fn default_round_timeout() -> u64 {
    30
}

fn default_chain_id() -> u64 {
    100
}

fn default_multisend() -> Address {
    DEFAULT_MULTISEND.parse().unwrap_or_default()
}

fn default_native_wrapper() -> Address {
    DEFAULT_NATIVE_WRAPPER.parse().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Runtime parameters
// ---------------------------------------------------------------------------

/// One candidate for the traded token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenCandidate {
    pub ticker: String,
    pub address: Address,
}

/// Validated parameters handed to behaviours.
#[derive(Debug, Clone)]
pub struct Params {
    pub router_address: Address,
    pub multisend_address: Address,
    pub native_wrapper_address: Address,
    /// Wrap threshold in base units (18 decimals).
    pub min_native_balance: U256,
    pub candidate_tokens: Vec<TokenCandidate>,
    pub selection_seed: u64,
    pub decision_mode: DecisionMode,
    pub rebalancing: RebalancingConfig,
}

/// First of `names` the lookup resolves, with the name that matched.
fn first_set<F>(lookup: &F, names: &[&'static str]) -> Option<(&'static str, String)>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .find_map(|&name| lookup(name).map(|value| (name, value)))
}

/// Parse `ticker:address` pairs separated by commas.
pub fn parse_target_tokens(raw: &str) -> Result<Vec<TokenCandidate>> {
    let source = if raw.trim().is_empty() {
        DEFAULT_TARGET_TOKENS
    } else {
        raw
    };

    source
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (ticker, address) = entry
                .split_once(':')
                .with_context(|| format!("Target token entry without address: {entry}"))?;
            let address = Address::from_str(address.trim())
                .with_context(|| format!("Invalid target token address: {address}"))?;
            Ok(TokenCandidate {
                ticker: ticker.trim().to_string(),
                address,
            })
        })
        .collect()
}

impl AppConfig {
    /// Load configuration from a TOML file, apply environment overrides
    /// and validate.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let mut config = Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text without overrides.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Apply deployment overrides looked up by variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(router) = lookup("UNI_ROUTER_ADDRESS") {
            self.params.router_address = Address::from_str(router.trim())
                .with_context(|| format!("Invalid UNI_ROUTER_ADDRESS: {router}"))?;
        }
        if let Some(safe) = lookup("SAFE_CONTRACT_ADDRESS") {
            self.setup.safe_contract_address = Address::from_str(safe.trim())
                .with_context(|| format!("Invalid SAFE_CONTRACT_ADDRESS: {safe}"))?;
        }
        if let Some(participants) = lookup("ALL_PARTICIPANTS") {
            self.setup.all_participants = participants
                .trim_matches(|c| c == '[' || c == ']')
                .split(',')
                .map(|p| p.trim().trim_matches('"').to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }
        // Gnosis deployments still set the xDAI-named variables
        if let Some((name, min_native)) = first_set(&lookup, &["MIN_NATIVE_VAL", "MIN_XDAI_VAL"]) {
            self.params.min_native_balance = min_native
                .trim()
                .parse()
                .with_context(|| format!("Invalid {name}: {min_native}"))?;
        }
        if let Some((name, min_trade)) =
            first_set(&lookup, &["MIN_NATIVE_TRADE", "MIN_XDAI_TRADE"])
        {
            self.params.rebalancing.default_max_allowance = U256::from_dec_str(min_trade.trim())
                .map_err(|e| anyhow::anyhow!("Invalid {name} {min_trade}: {e}"))?;
        }
        Ok(())
    }

    /// Reject configurations the rounds cannot run with.
    pub fn validate(&self) -> Result<()> {
        let participants = self.participants();
        if participants.is_empty() {
            bail!("setup.all_participants must not be empty");
        }
        if participants.len() != self.setup.all_participants.len() {
            bail!("setup.all_participants contains duplicates");
        }
        let quorum = self.quorum();
        if quorum == 0 || quorum > participants.len() {
            bail!(
                "consensus threshold {quorum} is not achievable with {} participants",
                participants.len()
            );
        }
        if parse_target_tokens(&self.params.target_tokens)?.is_empty() {
            bail!("params.target_tokens yields no candidates");
        }
        if self.setup.round_timeout_secs == 0 {
            bail!("setup.round_timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn participants(&self) -> BTreeSet<ParticipantId> {
        self.setup
            .all_participants
            .iter()
            .map(|p| ParticipantId::new(p.as_str()))
            .collect()
    }

    /// Number of identical votes a round needs.
    pub fn quorum(&self) -> usize {
        self.setup
            .consensus_threshold
            .unwrap_or_else(|| consensus_threshold(self.participants().len()))
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.setup.round_timeout_secs * ROUND_TIMEOUT_MULTIPLIER)
    }

    /// Build the runtime parameters behaviours consume.
    pub fn params(&self) -> Result<Params> {
        let one_native = U256::exp10(18);
        Ok(Params {
            router_address: self.params.router_address,
            multisend_address: self.params.multisend_address,
            native_wrapper_address: self.params.native_wrapper_address,
            min_native_balance: U256::from(self.params.min_native_balance)
                .checked_mul(one_native)
                .context("params.min_native_balance overflows")?,
            candidate_tokens: parse_target_tokens(&self.params.target_tokens)?,
            selection_seed: self.params.selection_seed,
            decision_mode: self.params.decision_mode,
            rebalancing: self.params.rebalancing.clone(),
        })
    }
}

/// Amounts accept TOML integers or decimal strings; base-unit amounts
/// routinely exceed the TOML integer range.
mod amount {
    use ethers::types::U256;
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    struct AmountVisitor;

    impl<'de> Visitor<'de> for AmountVisitor {
        type Value = U256;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a non-negative integer or decimal string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<U256, E> {
            Ok(U256::from(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<U256, E> {
            u64::try_from(v)
                .map(U256::from)
                .map_err(|_| E::custom(format!("negative amount: {v}")))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<U256, E> {
            U256::from_dec_str(v.trim()).map_err(|e| E::custom(format!("invalid amount {v}: {e}")))
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<U256, D::Error> {
        deserializer.deserialize_any(AmountVisitor)
    }
}

#[cfg(test)]
impl Params {
    /// Parameters with small, readable addresses for unit tests.
    pub fn sample() -> Self {
        Params {
            router_address: Address::from_low_u64_be(0x100),
            multisend_address: Address::from_low_u64_be(0x200),
            native_wrapper_address: Address::from_low_u64_be(0x300),
            min_native_balance: U256::exp10(18),
            candidate_tokens: vec![
                TokenCandidate {
                    ticker: "weth".to_string(),
                    address: Address::from_low_u64_be(0xa1),
                },
                TokenCandidate {
                    ticker: "wbtc".to_string(),
                    address: Address::from_low_u64_be(0xa2),
                },
            ],
            selection_seed: 7,
            decision_mode: DecisionMode::Ratio,
            rebalancing: RebalancingConfig {
                chain: "gnosis".to_string(),
                deadline: 300,
                token_base_ticker: "wxdai".to_string(),
                token_base_address: Address::from_low_u64_be(0xb0),
                lp_token_address: Address::from_low_u64_be(0xc0),
                max_allowance: U256::from(1_000_000u64),
                default_max_allowance: U256::from(1_000u64),
                token_a_ticker: "weth".to_string(),
                token_a_address: Address::from_low_u64_be(0xa1),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        [agent]
        name = "swapper-001"
        cycle_interval_secs = 60

        [setup]
        all_participants = ["0xaaa", "0xbbb", "0xccc", "0xddd"]
        safe_contract_address = "0x0000000000000000000000000000000000005afe"

        [params]
        router_address = "0x1C232F01118CB8B424793ae03F870aa7D0ac7f77"
        min_native_balance = 5
        selection_seed = 42

        [params.rebalancing]
        chain = "gnosis"
        deadline = 300
        token_base_ticker = "wxdai"
        token_base_address = "0xe91d153e0b41518a2ce8dd3d7944fa863463a97d"
        lp_token_address = "0x01f4a4d82a4c1cf12eb2dadc35fd87a14526cc79"
        max_allowance = "1000000000000000000000000"
        default_max_allowance = 1000
        token_a_ticker = "weth"
        token_a_address = "0x6a023ccd1ff6f2045c3309768ead9e68f978f6e1"
    "#;

    #[test]
    fn test_parse_sample() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.agent.name, "swapper-001");
        assert_eq!(cfg.agent.state_file, "swapping_state.json");
        assert_eq!(cfg.setup.round_timeout_secs, 30);
        assert_eq!(cfg.setup.chain_id, 100);
        assert_eq!(cfg.params.decision_mode, DecisionMode::Ratio);
        assert_eq!(
            cfg.params.rebalancing.max_allowance,
            U256::from_dec_str("1000000000000000000000000").unwrap()
        );
        assert_eq!(cfg.params.rebalancing.default_max_allowance, U256::from(1000u64));
        assert_eq!(cfg.params.multisend_address, default_multisend());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_quorum_and_timeout() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(cfg.quorum(), 3);
        assert_eq!(cfg.round_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_params_scale_native_threshold() {
        let cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        let params = cfg.params().unwrap();
        assert_eq!(params.min_native_balance, U256::from(5u64) * U256::exp10(18));
        // Empty target_tokens falls back to the default candidate set
        assert_eq!(params.candidate_tokens.len(), 3);
        assert_eq!(params.candidate_tokens[0].ticker, "weth");
    }

    #[test]
    fn test_parse_target_tokens() {
        let tokens = parse_target_tokens(
            "gno:0x9c58bacc331c9aa871afd802db6379a98e80cedb, usdc:0xddafbb505ad214d7b80b1f830fccc89b60fb7a83",
        )
        .unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].ticker, "usdc");
        assert!(parse_target_tokens("gno").is_err());
        assert!(parse_target_tokens("gno:nothex").is_err());
    }

    #[test]
    fn test_overrides() {
        let mut cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [
            ("ALL_PARTICIPANTS", "[0x111,0x222]"),
            ("MIN_NATIVE_VAL", "9"),
            ("MIN_NATIVE_TRADE", "2500"),
            ("SAFE_CONTRACT_ADDRESS", "0x0000000000000000000000000000000000000abc"),
        ]
        .into_iter()
        .collect();
        cfg.apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.setup.all_participants, vec!["0x111", "0x222"]);
        assert_eq!(cfg.params.min_native_balance, 9);
        assert_eq!(cfg.params.rebalancing.default_max_allowance, U256::from(2500u64));
        assert_eq!(cfg.setup.safe_contract_address, Address::from_low_u64_be(0xabc));
        assert_eq!(cfg.quorum(), 2);
    }

    #[test]
    fn test_xdai_override_names() {
        let mut cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [("MIN_XDAI_VAL", "4"), ("MIN_XDAI_TRADE", "700")]
            .into_iter()
            .collect();
        cfg.apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.params.min_native_balance, 4);
        assert_eq!(cfg.params.rebalancing.default_max_allowance, U256::from(700u64));

        // The native name wins when both are set
        let mut cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [("MIN_NATIVE_VAL", "9"), ("MIN_XDAI_VAL", "4")]
            .into_iter()
            .collect();
        cfg.apply_overrides(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.params.min_native_balance, 9);
    }

    #[test]
    fn test_invalid_override_is_error() {
        let mut cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        let result = cfg.apply_overrides(|name| {
            (name == "UNI_ROUTER_ADDRESS").then(|| "not-an-address".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_unreachable_threshold() {
        let mut cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        cfg.setup.consensus_threshold = Some(5);
        assert!(cfg.validate().is_err());

        cfg.setup.consensus_threshold = None;
        cfg.setup.all_participants.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_participants() {
        let mut cfg = AppConfig::from_toml_str(SAMPLE).unwrap();
        cfg.setup.all_participants = vec!["0xaaa".into(), "0xaaa".into()];
        assert!(cfg.validate().is_err());
    }
}
