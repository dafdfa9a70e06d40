//! Vault position discovery and range status.

pub mod range;
pub mod status;

pub use range::{
    ProbeAttempt, RangeProbe, RangeResolution, TickRange, TickRangeResolver, default_range_probes,
    default_strategy_accessors,
};
pub use status::{RangeStatus, Side, TokenBalance, VaultSnapshot, range_status};
