//! Router swaps verified by balance delta.

use crate::errors::AppError;
use crate::pool::Dialect;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub mod allowance;
pub mod executor;

pub use allowance::ensure_allowance;
pub use executor::{Routers, SwapExecutor, min_amount_out};

/// Second routing argument of `exactInputSingle`; its kind depends on the dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingParam {
    FeeTier(u32),
    Deployer(Address),
}

impl fmt::Display for RoutingParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingParam::FeeTier(fee) => write!(f, "fee {fee}"),
            RoutingParam::Deployer(addr) => write!(f, "deployer {addr:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRequest {
    pub dialect: Dialect,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub routing: RoutingParam,
    /// Tolerance against the pre-trade spot price; 10_000 or more disables the floor.
    pub slippage_bps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapResult {
    pub tx_hash: H256,
    pub amount_in: U256,
    /// Output-token balance delta around the swap.
    pub amount_out: U256,
    pub block_number: u64,
    pub approval_tx: Option<H256>,
    pub zero_for_one: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenMeta {
    pub address: Address,
    pub symbol: String,
    pub decimals: u8,
}

#[derive(Debug, Error)]
pub enum SwapErrorKind {
    #[error("amount must be non-zero")]
    ZeroAmount,

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: U256, need: U256 },

    #[error("no pool configured for this pair")]
    NoPool,

    #[error("pool does not trade token {token:?}")]
    PoolMismatch { token: Address },

    #[error("pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("pool has zero liquidity")]
    ZeroLiquidity,

    #[error("{routing} cannot route a {dialect} swap")]
    DialectMismatch {
        dialect: Dialect,
        routing: RoutingParam,
    },

    #[error("swap transaction {tx_hash:?} reverted")]
    Reverted { tx_hash: H256 },

    #[error(transparent)]
    Execution(AppError),
}

impl From<AppError> for SwapErrorKind {
    fn from(err: AppError) -> Self {
        match err {
            AppError::TxReverted { tx_hash, .. } => SwapErrorKind::Reverted { tx_hash },
            other => SwapErrorKind::Execution(other),
        }
    }
}

/// A failed swap with enough context to diagnose it from the report alone.
#[derive(Debug, Error)]
#[error("swap {symbol_in} -> {symbol_out} of {amount_in} via {} failed: {kind}", pool_label(.pool))]
pub struct SwapFailure {
    pub symbol_in: String,
    pub symbol_out: String,
    pub pool: Option<Address>,
    pub amount_in: U256,
    #[source]
    pub kind: SwapErrorKind,
}

fn pool_label(pool: &Option<Address>) -> String {
    match pool {
        Some(pool) => format!("{pool:?}"),
        None => "unresolved pool".to_string(),
    }
}

impl SwapFailure {
    /// Failures detected before anything was submitted.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self.kind,
            SwapErrorKind::ZeroAmount
                | SwapErrorKind::InsufficientBalance { .. }
                | SwapErrorKind::NoPool
                | SwapErrorKind::DialectMismatch { .. }
        )
    }
}

impl From<SwapFailure> for AppError {
    fn from(err: SwapFailure) -> Self {
        AppError::Swap(Box::new(err))
    }
}

/// Pool lookup by token symbols, insensitive to the order a pair was listed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairEntry {
    pub base: String,
    pub quote: String,
    pub pool: Address,
    pub dialect: Dialect,
}

#[derive(Debug, Clone, Default)]
pub struct PairTable {
    entries: HashMap<(String, String), PairEntry>,
}

impl PairTable {
    pub fn new(entries: impl IntoIterator<Item = PairEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (pair_key(&entry.base, &entry.quote), entry))
            .collect();
        Self { entries }
    }

    pub fn lookup(&self, a: &str, b: &str) -> Option<&PairEntry> {
        self.entries.get(&pair_key(a, b))
    }
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    let a = a.trim().to_ascii_uppercase();
    let b = b.trim().to_ascii_uppercase();
    if a <= b { (a, b) } else { (b, a) }
}
