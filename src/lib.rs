//! Rebalance test harness for concentrated-liquidity vaults.
//!
//! Reads pool and vault state across AMM interface variants, pushes a pool's
//! price out of a vault's range with real swaps, and checks that the vault's
//! `rebalance()` restores alignment. Every RPC read is retried with backoff;
//! every transaction is submitted exactly once.

pub mod chain;
pub mod config;
pub mod errors;
pub mod impact;
pub mod orchestrator;
pub mod pool;
pub mod report;
pub mod retry;
pub mod suite;
pub mod swap;
pub mod utils;
pub mod vault;
