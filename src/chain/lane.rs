//! Serialized transaction submission for the single signing account.

use super::{NonceTag, Rpc, TxOutcome};
use crate::errors::{AppError, Result, RpcError};
use ethers::types::{Address, Bytes, H256};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TxConfig {
    pub nonce_poll_interval_ms: u64,
    pub nonce_max_polls: u32,
    pub receipt_poll_interval_ms: u64,
    pub receipt_max_polls: u32,
    /// Seconds added to the latest block timestamp for router deadlines.
    pub deadline_secs: u64,
}

impl Default for TxConfig {
    fn default() -> Self {
        Self {
            nonce_poll_interval_ms: 1_000,
            nonce_max_polls: 60,
            receipt_poll_interval_ms: 1_500,
            receipt_max_polls: 80,
            deadline_secs: 300,
        }
    }
}

/// Every state-changing call goes through here: one at a time, never while
/// the signer still has unmined transactions, and never re-sent once a hash exists.
pub struct TxLane {
    rpc: Rpc,
    config: TxConfig,
    lock: Mutex<()>,
}

impl TxLane {
    pub fn new(rpc: Rpc, config: TxConfig) -> Self {
        Self {
            rpc,
            config,
            lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }

    /// Block until the pending nonce equals the mined nonce.
    pub async fn wait_for_idle_nonce(&self, account: Address) -> Result<()> {
        let interval = Duration::from_millis(self.config.nonce_poll_interval_ms);
        let mut last = None;
        for poll in 0..self.config.nonce_max_polls.max(1) {
            let pending = self.rpc.transaction_count(account, NonceTag::Pending).await?;
            let mined = self.rpc.transaction_count(account, NonceTag::Latest).await?;
            if pending == mined {
                if poll > 0 {
                    debug!(?account, polls = poll, "[TX] pending transactions cleared");
                }
                return Ok(());
            }
            debug!(?account, %pending, %mined, poll, "[TX] waiting for pending transactions");
            last = Some((pending, mined));
            tokio::time::sleep(interval).await;
        }
        let (pending, mined) = last.unwrap_or_default();
        Err(AppError::NonceBusy {
            account,
            pending,
            mined,
        })
    }

    /// Submit `data` to `to` and wait for the receipt.
    ///
    /// A receipt with status 0 is returned as [`AppError::TxReverted`].
    pub async fn submit(&self, label: &str, to: Address, data: Bytes) -> Result<TxOutcome> {
        let _guard = self.lock.lock().await;
        let account = self.rpc.signer();
        self.wait_for_idle_nonce(account).await?;

        let client = self.rpc.client();
        let tx_hash = self
            .rpc
            .policy()
            .submit_once(label, |_| {
                let data = data.clone();
                async move { client.send(to, data).await.map_err(AppError::from) }
            })
            .await?;
        info!(label, ?tx_hash, ?to, "[TX] submitted");

        // From here on only the receipt is polled; the send is never repeated.
        let outcome = self.await_receipt(label, tx_hash).await?;
        if !outcome.success {
            warn!(label, ?tx_hash, block = outcome.block_number, "[TX] reverted");
            return Err(AppError::TxReverted {
                tx_hash,
                block_number: outcome.block_number,
            });
        }
        info!(label, ?tx_hash, block = outcome.block_number, "[TX] mined");
        Ok(outcome)
    }

    async fn await_receipt(&self, label: &str, tx_hash: H256) -> Result<TxOutcome> {
        let interval = Duration::from_millis(self.config.receipt_poll_interval_ms);
        let client = self.rpc.client();
        for _ in 0..self.config.receipt_max_polls.max(1) {
            let receipt = self
                .rpc
                .policy()
                .read(label, |_| async move {
                    client.receipt(tx_hash).await.map_err(AppError::from)
                })
                .await?;
            if let Some(outcome) = receipt {
                return Ok(outcome);
            }
            tokio::time::sleep(interval).await;
        }
        Err(AppError::Rpc(RpcError::ReceiptPending(tx_hash)))
    }
}
