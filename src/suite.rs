//! Runs the per-vault scenarios and assembles the report.

use crate::config::{HarnessConfig, VaultConfig};
use crate::errors::{AppError, Result};
use crate::orchestrator::RebalanceOrchestrator;
use crate::report::{RunReport, ScenarioResult, VaultReport};
use serde_json::json;
use tracing::{error, info, warn};

pub const STATE_PROBE: &str = "state_probe";
pub const REBALANCE_CYCLE: &str = "rebalance_cycle";

/// Run every scenario for every usable vault.
///
/// A failing scenario never stops the run. The only abort is when none of
/// the configured vaults can be tested at all.
pub async fn run_suite(orchestrator: &RebalanceOrchestrator, config: &HarnessConfig) -> Result<RunReport> {
    let mut report = RunReport::start(&config.suite, &config.network);
    info!(suite = %config.suite, network = %config.network, vaults = config.vaults.len(), "[SUITE] starting");

    let mut checks = Vec::with_capacity(config.vaults.len());
    for vault in &config.vaults {
        let blocker = orchestrator.usability(vault).await;
        if let Some(reason) = &blocker {
            warn!(vault = %vault.name, %reason, "[SUITE] vault unusable");
            report.diagnostic(format!("{}: {reason}", vault.name));
        }
        checks.push((vault, blocker));
    }
    if checks.iter().all(|(_, blocker)| blocker.is_some()) {
        error!(checked = checks.len(), "[SUITE] no usable vaults");
        return Err(AppError::NoUsableVaults {
            checked: checks.len(),
        });
    }

    for (vault, blocker) in checks {
        let scenarios = match blocker {
            Some(reason) => vec![
                ScenarioResult::skipped(STATE_PROBE, reason.clone(), json!({})),
                ScenarioResult::skipped(REBALANCE_CYCLE, reason, json!({})),
            ],
            None => vec![
                state_probe(orchestrator, vault).await,
                rebalance_cycle(orchestrator, vault).await,
            ],
        };
        report.push_vault(VaultReport {
            name: vault.name.clone(),
            address: vault.address,
            scenarios,
        });
    }

    report.finish();
    info!(
        total = report.summary.total,
        passed = report.summary.passed,
        failed = report.summary.failed,
        skipped = report.summary.skipped,
        "[SUITE] finished"
    );
    Ok(report)
}

async fn state_probe(orchestrator: &RebalanceOrchestrator, vault: &VaultConfig) -> ScenarioResult {
    match orchestrator.inspect(vault).await {
        Ok((snapshot, attempts)) => {
            let details = match (serde_json::to_value(&snapshot), serde_json::to_value(&attempts)) {
                (Ok(snapshot), Ok(attempts)) => json!({ "snapshot": snapshot, "range_attempts": attempts }),
                (Err(err), _) | (_, Err(err)) => {
                    return ScenarioResult::failed(STATE_PROBE, format!("unserializable snapshot: {err}"), json!({}));
                }
            };
            if let Some(warning) = snapshot.pool.warning() {
                return ScenarioResult::failed(STATE_PROBE, warning, details);
            }
            let note = match &snapshot.range {
                Some(range) => format!("{} via {}", snapshot.status(), range.source()),
                None => "range unresolved".to_string(),
            };
            ScenarioResult::passed(STATE_PROBE, Some(note), details)
        }
        Err(err) => ScenarioResult::failed(STATE_PROBE, err.to_string(), json!({})),
    }
}

async fn rebalance_cycle(orchestrator: &RebalanceOrchestrator, vault: &VaultConfig) -> ScenarioResult {
    match orchestrator.run_vault(vault).await {
        Ok(outcome) => {
            let details = match serde_json::to_value(&outcome) {
                Ok(details) => details,
                Err(err) => {
                    return ScenarioResult::failed(REBALANCE_CYCLE, format!("unserializable outcome: {err}"), json!({}));
                }
            };
            let note = format!("{:?}", outcome.verdict);
            if outcome.verdict.is_skip() {
                ScenarioResult::skipped(REBALANCE_CYCLE, note, details)
            } else if outcome.verdict.is_success() {
                ScenarioResult::passed(REBALANCE_CYCLE, Some(note), details)
            } else {
                ScenarioResult::failed(REBALANCE_CYCLE, note, details)
            }
        }
        Err(err) => {
            error!(vault = %vault.name, %err, "[SUITE] scenario errored");
            ScenarioResult::failed(REBALANCE_CYCLE, err.to_string(), json!({}))
        }
    }
}
