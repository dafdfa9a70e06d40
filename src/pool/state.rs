use ethers::types::U256;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Largest tick magnitude accepted from any probe. Wider than the AMM's own
/// bound because some vaults report ranges past it.
pub const MAX_PLAUSIBLE_TICK: i64 = 1_000_000;

/// AMM interface family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// `slot0()` pools routed by fee tier.
    #[serde(alias = "a")]
    Slot0,
    /// `globalState()` / `safelyGetStateOfAMM()` pools routed by deployer address.
    #[serde(alias = "b")]
    GlobalState,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Slot0 => write!(f, "slot0"),
            Dialect::GlobalState => write!(f, "global-state"),
        }
    }
}

/// Normalized price/tick/liquidity read from a live pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    /// Dialect of the accessor that answered, not the hint.
    pub dialect: Dialect,
    pub tick: i32,
    pub sqrt_price: U256,
    /// Serialized as a decimal string; JSON numbers stop at `u64::MAX`.
    #[serde(serialize_with = "decimal_string")]
    pub liquidity: u128,
    /// Label of the accessor that produced the snapshot.
    pub source: String,
}

fn decimal_string<S: Serializer>(value: &u128, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// Result of a pool read. Never cached; re-read around every mutating step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PoolState {
    Live(PoolSnapshot),
    Unavailable { warning: String },
}

impl PoolState {
    pub fn ok(&self) -> bool {
        matches!(self, PoolState::Live(_))
    }

    pub fn snapshot(&self) -> Option<&PoolSnapshot> {
        match self {
            PoolState::Live(snapshot) => Some(snapshot),
            PoolState::Unavailable { .. } => None,
        }
    }

    pub fn tick(&self) -> Option<i32> {
        self.snapshot().map(|s| s.tick)
    }

    pub fn sqrt_price(&self) -> Option<U256> {
        self.snapshot().map(|s| s.sqrt_price)
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            PoolState::Live(_) => None,
            PoolState::Unavailable { warning } => Some(warning),
        }
    }
}
