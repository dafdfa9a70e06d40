use anyhow::{Context, Result};
use clm_rebalance_harness::{
    chain::{EthersChain, Rpc},
    config::{AppConfig, HarnessConfig},
    orchestrator::RebalanceOrchestrator,
    suite::run_suite,
    utils,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let app = AppConfig::from_env().context("reading environment")?;
    let harness = HarnessConfig::load(&app.harness_config)
        .with_context(|| format!("loading {}", app.harness_config.display()))?;
    tracing::info!(
        suite = %harness.suite,
        network = %harness.network,
        vaults = harness.vaults.len(),
        "[INIT] clm-rebalance-harness starting"
    );

    let chain = EthersChain::connect(app.rpc_url.as_str(), &app.private_key, app.chain_id)
        .await
        .context("connecting to RPC")?;
    let rpc = Rpc::new(Arc::new(chain), harness.retry.clone());
    tracing::info!(signer = ?rpc.signer(), "[INIT] signer ready");

    let orchestrator = RebalanceOrchestrator::new(rpc, &harness)?;
    let report = run_suite(&orchestrator, &harness).await?;
    report
        .write_json(&app.report_path)
        .with_context(|| format!("writing {}", app.report_path.display()))?;
    tracing::info!(path = %app.report_path.display(), "[INIT] report written");

    if report.has_failures() {
        tracing::error!(failed = report.summary.failed, "[SUITE] scenarios failed");
        std::process::exit(1);
    }
    Ok(())
}
