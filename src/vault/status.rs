use super::range::TickRange;
use crate::pool::PoolState;
use ethers::types::{Address, U256};
use serde::Serialize;
use std::fmt;

/// Which bound the price has crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    /// `tick >= upper`
    High,
    /// `tick < lower`
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeStatus {
    InRange,
    OutOfRange(Side),
    /// Tick or range could not be read. Distinct from out of range.
    Unknown,
}

impl RangeStatus {
    pub fn in_range(self) -> Option<bool> {
        match self {
            RangeStatus::InRange => Some(true),
            RangeStatus::OutOfRange(_) => Some(false),
            RangeStatus::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        self != RangeStatus::Unknown
    }
}

impl fmt::Display for RangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeStatus::InRange => write!(f, "in range"),
            RangeStatus::OutOfRange(Side::High) => write!(f, "out of range (above upper)"),
            RangeStatus::OutOfRange(Side::Low) => write!(f, "out of range (below lower)"),
            RangeStatus::Unknown => write!(f, "unknown"),
        }
    }
}

pub fn range_status(tick: Option<i32>, range: Option<&TickRange>) -> RangeStatus {
    let (Some(tick), Some(range)) = (tick, range) else {
        return RangeStatus::Unknown;
    };
    if tick < range.lower() {
        RangeStatus::OutOfRange(Side::Low)
    } else if tick >= range.upper() {
        RangeStatus::OutOfRange(Side::High)
    } else {
        RangeStatus::InRange
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenBalance {
    pub symbol: String,
    pub address: Address,
    pub raw: U256,
    pub formatted: String,
}

/// Point-in-time view of a vault, its pool and the signer's holdings.
#[derive(Debug, Clone, Serialize)]
pub struct VaultSnapshot {
    pub pool: PoolState,
    pub range: Option<TickRange>,
    pub in_range: Option<bool>,
    pub user_balances: Vec<TokenBalance>,
    pub user_shares: Option<U256>,
}

impl VaultSnapshot {
    pub fn new(
        pool: PoolState,
        range: Option<TickRange>,
        user_balances: Vec<TokenBalance>,
        user_shares: Option<U256>,
    ) -> Self {
        let in_range = range_status(pool.tick(), range.as_ref()).in_range();
        Self {
            pool,
            range,
            in_range,
            user_balances,
            user_shares,
        }
    }

    pub fn status(&self) -> RangeStatus {
        range_status(self.pool.tick(), self.range.as_ref())
    }

    pub fn tick(&self) -> Option<i32> {
        self.pool.tick()
    }
}
