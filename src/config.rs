//! Environment and harness configuration.

use crate::chain::TxConfig;
use crate::errors::{AppError, Result};
use crate::pool::{Dialect, PoolProbe, default_pool_probes};
use crate::retry::RetryPolicy;
use crate::swap::{PairEntry, PairTable, RoutingParam, Routers};
use crate::vault::{RangeProbe, default_range_probes, default_strategy_accessors};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_REPORT_PATH: &str = "reports/rebalance-report.json";

/// Connection settings taken from the environment.
#[derive(Clone)]
pub struct AppConfig {
    pub rpc_url: Url,
    pub private_key: String,
    /// Overrides the chain id reported by the node.
    pub chain_id: Option<u64>,
    pub harness_config: PathBuf,
    pub report_path: PathBuf,
}

impl AppConfig {
    /// Read `RPC_URL`, `PRIVATE_KEY`, `CHAIN_ID`, `HARNESS_CONFIG` and `REPORT_PATH`.
    pub fn from_env() -> Result<Self> {
        let rpc_url = Url::parse(required("RPC_URL")?.as_str())?;
        let private_key = required("PRIVATE_KEY")?;
        let chain_id = match optional("CHAIN_ID") {
            Some(raw) => Some(
                raw.parse::<u64>()
                    .map_err(|_| AppError::Config(format!("invalid CHAIN_ID={raw}")))?,
            ),
            None => None,
        };
        let harness_config = PathBuf::from(required("HARNESS_CONFIG")?);
        let report_path =
            PathBuf::from(optional("REPORT_PATH").unwrap_or_else(|| DEFAULT_REPORT_PATH.into()));
        Ok(Self {
            rpc_url,
            private_key,
            chain_id,
            harness_config,
            report_path,
        })
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("rpc_url", &self.rpc_url.as_str())
            .field("private_key", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("harness_config", &self.harness_config)
            .field("report_path", &self.report_path)
            .finish()
    }
}

fn required(name: &str) -> Result<String> {
    let value = std::env::var(name)?.trim().to_string();
    if value.is_empty() {
        return Err(AppError::Config(format!("{name} is set but empty")));
    }
    Ok(value)
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// One vault under test.
#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    pub name: String,
    pub address: Address,
    pub pool: Address,
    pub dialect: Dialect,
    pub routing: RoutingParam,
}

/// How hard to lean on the pool when pushing the price out of range.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub max_attempts: u32,
    /// Multiplier applied to the base amount after every attempt that left the price in range.
    pub scale_factor: u32,
    /// Base amount per token symbol, in human units (`"0.5"`).
    pub base_amounts: BTreeMap<String, String>,
    /// Used when a symbol has no entry in `base_amounts`.
    pub default_base_amount: String,
    pub slippage_bps: u32,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            scale_factor: 2,
            base_amounts: BTreeMap::new(),
            default_base_amount: "1".into(),
            slippage_bps: 10_000,
        }
    }
}

impl PushConfig {
    pub fn base_amount_for(&self, symbol: &str) -> &str {
        self.base_amounts
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(symbol))
            .map(|(_, v)| v.as_str())
            .unwrap_or(&self.default_base_amount)
    }
}

/// Accessor shapes tried against pools, vaults and strategies.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub pool: Vec<PoolProbe>,
    pub range: Vec<RangeProbe>,
    pub strategy_accessors: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            pool: default_pool_probes(),
            range: default_range_probes(),
            strategy_accessors: default_strategy_accessors(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceTarget {
    Vault,
    Strategy,
}

/// The privileged call and how to recognise a permission denial.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RebalanceConfig {
    pub signature: String,
    pub target: RebalanceTarget,
    /// Custom errors meaning "caller may not rebalance".
    pub unauthorized_errors: Vec<String>,
    /// Case-insensitive fragments of `Error(string)` reasons with the same meaning.
    pub unauthorized_reasons: Vec<String>,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            signature: "rebalance()".into(),
            target: RebalanceTarget::Vault,
            unauthorized_errors: vec![
                "OwnableUnauthorizedAccount(address)".into(),
                "AccessControlUnauthorizedAccount(address,bytes32)".into(),
                "Unauthorized()".into(),
                "NotAuthorized()".into(),
                "OnlyManager()".into(),
            ],
            unauthorized_reasons: vec![
                "caller is not the owner".into(),
                "accesscontrol".into(),
                "not authorized".into(),
                "unauthorized".into(),
                "only manager".into(),
                "!manager".into(),
                "!authorized".into(),
            ],
        }
    }
}

/// Harness description loaded from `HARNESS_CONFIG`.
#[derive(Debug, Clone, Deserialize)]
pub struct HarnessConfig {
    #[serde(default = "default_suite")]
    pub suite: String,
    pub network: String,
    pub routers: Routers,
    #[serde(default)]
    pub pairs: Vec<PairEntry>,
    /// Symbol to address; balances of these tokens are reported per vault.
    #[serde(default)]
    pub tokens: BTreeMap<String, Address>,
    pub vaults: Vec<VaultConfig>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub tx: TxConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub probes: ProbeConfig,
    #[serde(default)]
    pub rebalance: RebalanceConfig,
}

fn default_suite() -> String {
    "clm-rebalance".into()
}

impl HarnessConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|err| {
            AppError::Config(format!("cannot read harness config {}: {err}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: HarnessConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn pair_table(&self) -> PairTable {
        PairTable::new(self.pairs.iter().cloned())
    }

    fn validate(&self) -> Result<()> {
        if self.network.trim().is_empty() {
            return Err(AppError::Config("network must not be empty".into()));
        }
        if self.vaults.is_empty() {
            return Err(AppError::Config("at least one vault is required".into()));
        }
        let mut names = HashSet::new();
        for vault in &self.vaults {
            if !names.insert(vault.name.as_str()) {
                return Err(AppError::Config(format!("duplicate vault name `{}`", vault.name)));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.push.scale_factor == 0 {
            return Err(AppError::Config("push.scale_factor must be at least 1".into()));
        }
        if self.probes.pool.is_empty() || self.probes.range.is_empty() {
            return Err(AppError::Config("probe lists must not be empty".into()));
        }
        Ok(())
    }
}
