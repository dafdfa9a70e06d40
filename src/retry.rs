//! Bounded exponential backoff for RPC calls.
//!
//! Classification is a plain function over typed errors; the retry loop never
//! looks at error messages.

use crate::errors::{AppError, Result, RpcError};
use rand::Rng;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

/// Default classifier for read paths.
///
/// Rate limits and transport failures are worth another attempt; reverts and
/// node rejections are deterministic and are not.
pub fn classify(err: &AppError) -> ErrorClass {
    match err {
        AppError::Rpc(
            RpcError::RateLimited { .. } | RpcError::Transport(_) | RpcError::ReceiptPending(_),
        ) => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

/// Classifier for transaction submission.
///
/// A transport failure during `eth_sendRawTransaction` may still have reached
/// the mempool, so only an explicit rate-limit rejection is retried.
pub fn classify_submission(err: &AppError) -> ErrorClass {
    match err {
        AppError::Rpc(RpcError::RateLimited { .. }) => ErrorClass::Transient,
        _ => ErrorClass::Permanent,
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter added to every sleep.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay_ms: 250,
            max_delay_ms: 8_000,
            jitter_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Sleep before the retry that follows failed attempt `attempt` (0-based),
    /// without jitter: `min(max_delay, min_delay * 2^attempt)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self
            .min_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..=self.jitter_ms))
    }

    /// Run `operation` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The closure receives the 0-based attempt number.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        classifier: fn(&AppError) -> ErrorClass,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0u32;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if classifier(&err) == ErrorClass::Permanent {
                        debug!(label, attempt, error = %err, "[RETRY] permanent failure");
                        return Err(err);
                    }
                    if attempt + 1 >= max_attempts {
                        warn!(label, attempts = max_attempts, error = %err, "[RETRY] attempts exhausted");
                        return Err(AppError::RetryExhausted {
                            label: label.to_string(),
                            attempts: max_attempts,
                            last: Box::new(err),
                        });
                    }
                    let delay = self.backoff_delay(attempt) + self.jitter();
                    warn!(
                        label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "[RETRY] transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Read-only call with the default classifier.
    pub async fn read<T, F, Fut>(&self, label: &str, operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(label, classify, operation).await
    }

    /// Transaction submission. Once `operation` yields a hash the loop is over;
    /// callers must never wrap the returned hash's follow-up in another submit.
    pub async fn submit_once<T, F, Fut>(&self, label: &str, operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run(label, classify_submission, operation).await
    }
}
