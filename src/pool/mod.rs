//! Pool state access for both AMM dialects.

pub mod reader;
pub mod state;

pub use reader::{PoolProbe, PoolStateReader, default_pool_probes};
pub use state::{Dialect, MAX_PLAUSIBLE_TICK, PoolSnapshot, PoolState};
