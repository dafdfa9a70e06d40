//! Logging setup.

use tracing_subscriber::{EnvFilter, fmt};

/// Default filter when `RUST_LOG` is unset. Provider internals are noisy at `info`.
const DEFAULT_FILTER: &str = "info,ethers_providers=warn";

/// Initialize the `tracing` subscriber from `RUST_LOG`.
///
/// Safe to call more than once; later calls are ignored.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
