//! Run report written once at the end of a suite.

use crate::errors::Result;
use chrono::{DateTime, Utc};
use ethers::types::Address;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub skipped: bool,
    pub note: Option<String>,
    pub details: serde_json::Value,
}

impl ScenarioResult {
    pub fn passed(name: &str, note: Option<String>, details: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            success: true,
            skipped: false,
            note,
            details,
        }
    }

    pub fn failed(name: &str, note: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            skipped: false,
            note: Some(note.into()),
            details,
        }
    }

    pub fn skipped(name: &str, note: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            success: false,
            skipped: true,
            note: Some(note.into()),
            details,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VaultReport {
    pub name: String,
    pub address: Address,
    pub scenarios: Vec<ScenarioResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub suite: String,
    pub network: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub summary: Summary,
    pub vaults: Vec<VaultReport>,
    pub diagnostics: Vec<String>,
}

impl RunReport {
    pub fn start(suite: &str, network: &str) -> Self {
        Self {
            suite: suite.to_string(),
            network: network.to_string(),
            start_time: Utc::now(),
            end_time: None,
            summary: Summary::default(),
            vaults: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn push_vault(&mut self, vault: VaultReport) {
        for scenario in &vault.scenarios {
            self.summary.total += 1;
            if scenario.skipped {
                self.summary.skipped += 1;
            } else if scenario.success {
                self.summary.passed += 1;
            } else {
                self.summary.failed += 1;
            }
        }
        self.vaults.push(vault);
    }

    pub fn diagnostic(&mut self, message: impl Into<String>) {
        self.diagnostics.push(message.into());
    }

    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
