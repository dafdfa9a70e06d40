//! Push a vault's pool out of range, then check that `rebalance()` brings it back.

use crate::chain::abi::{Token0Call, Token1Call, parse_function};
use crate::chain::{Rpc, TxLane};
use crate::config::{HarnessConfig, PushConfig, RebalanceConfig, RebalanceTarget, VaultConfig};
use crate::errors::{AppError, Result, RpcError};
use crate::impact::{format_units, parse_units, price_impact_percent};
use crate::pool::PoolStateReader;
use crate::swap::{SwapExecutor, SwapRequest, TokenMeta};
use crate::vault::{
    ProbeAttempt, RangeStatus, Side, TickRange, TickRangeResolver, TokenBalance, VaultSnapshot,
    range_status,
};
use ethers::abi::{AbiEncode, Function, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::{hex, id};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ERROR_STRING_SELECTOR: [u8; 4] = [0x08, 0xc3, 0x79, 0xa0];

/// One swap made while pushing the price toward a bound.
#[derive(Debug, Clone, Serialize)]
pub struct PushAttempt {
    pub attempt: u32,
    pub token_in: String,
    pub amount_in: U256,
    pub amount_out: U256,
    pub tx_hash: H256,
    pub tick_before: i32,
    pub tick_after: Option<i32>,
    pub tick_moved: bool,
    pub price_moved: bool,
    pub impact_percent: f64,
    pub status_after: RangeStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum RebalanceVerdict {
    /// Preconditions unmet; nothing was concluded about the vault.
    Skipped { reason: String },
    StayedInRange { attempts: u32 },
    PushFailed { reason: String },
    /// The signer may not rebalance this vault. Recorded, not a failure.
    Unauthorized { reason: String },
    SimulationReverted { reason: String },
    Reverted { tx_hash: H256 },
    Restored {
        tx_hash: H256,
        range_changed: bool,
        status_after: RangeStatus,
    },
    /// Mined, but neither the bounds nor the range status changed.
    NoEffect { tx_hash: H256 },
}

impl RebalanceVerdict {
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            RebalanceVerdict::Skipped { .. } | RebalanceVerdict::StayedInRange { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RebalanceVerdict::Unauthorized { .. } | RebalanceVerdict::Restored { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RebalanceOutcome {
    pub vault: String,
    pub status_before: RangeStatus,
    pub range_before: Option<TickRange>,
    pub direction: Option<Side>,
    pub pushes: Vec<PushAttempt>,
    pub verdict: RebalanceVerdict,
}

enum PushEnd {
    Crossed,
    Stopped(RebalanceVerdict),
}

/// Side to push toward: whichever bound is fewer ticks away.
pub fn push_side(tick: i32, range: &TickRange) -> Side {
    let to_upper = i64::from(range.upper()) - i64::from(tick);
    let to_lower = i64::from(tick) - i64::from(range.lower()) + 1;
    if to_upper <= to_lower { Side::High } else { Side::Low }
}

pub struct RebalanceOrchestrator {
    rpc: Rpc,
    pools: Arc<PoolStateReader>,
    ranges: TickRangeResolver,
    swaps: SwapExecutor,
    push: PushConfig,
    rebalance: RebalanceConfig,
    rebalance_call: Function,
    unauthorized_errors: Vec<([u8; 4], String)>,
    tokens: BTreeMap<String, Address>,
}

impl RebalanceOrchestrator {
    pub fn new(rpc: Rpc, config: &HarnessConfig) -> Result<Self> {
        let lane = Arc::new(TxLane::new(rpc.clone(), config.tx.clone()));
        let pools = Arc::new(PoolStateReader::new(rpc.clone(), config.probes.pool.clone())?);
        let ranges = TickRangeResolver::new(
            rpc.clone(),
            &config.probes.strategy_accessors,
            config.probes.range.clone(),
        )?;
        let swaps = SwapExecutor::new(
            rpc.clone(),
            lane,
            pools.clone(),
            config.pair_table(),
            config.routers,
        )?;
        let rebalance_call = parse_function(&config.rebalance.signature)?;
        let unauthorized_errors = config
            .rebalance
            .unauthorized_errors
            .iter()
            .map(|sig| (id(sig), sig.clone()))
            .collect();
        Ok(Self {
            rpc,
            pools,
            ranges,
            swaps,
            push: config.push.clone(),
            rebalance: config.rebalance.clone(),
            rebalance_call,
            unauthorized_errors,
            tokens: config.tokens.clone(),
        })
    }

    /// `None` when the vault can be tested, otherwise the reason it cannot.
    pub async fn usability(&self, vault: &VaultConfig) -> Option<String> {
        match self.rpc.has_code(vault.address).await {
            Ok(true) => {}
            Ok(false) => return Some(format!("no contract code at vault {:?}", vault.address)),
            Err(err) => return Some(err.to_string()),
        }
        match self.pools.read_pool_state(vault.pool, vault.dialect).await {
            Ok(state) => state.warning().map(str::to_string),
            Err(err) => Some(err.to_string()),
        }
    }

    pub async fn snapshot(&self, vault: &VaultConfig) -> Result<VaultSnapshot> {
        Ok(self.inspect(vault).await?.0)
    }

    /// Snapshot plus every range probe attempt, for diagnostics.
    pub async fn inspect(&self, vault: &VaultConfig) -> Result<(VaultSnapshot, Vec<ProbeAttempt>)> {
        let pool = self.pools.read_pool_state(vault.pool, vault.dialect).await?;
        let resolution = self.ranges.resolve_with_attempts(vault.address).await?;
        let signer = self.rpc.signer();

        let mut tokens: Vec<Address> = self.tokens.values().copied().collect();
        if pool.ok() {
            if let Ok((token0, token1)) = self.pool_token_addresses(vault.pool).await {
                for token in [token0, token1] {
                    if !tokens.contains(&token) {
                        tokens.push(token);
                    }
                }
            }
        }
        let mut balances = Vec::with_capacity(tokens.len());
        for token in tokens {
            let meta = self.swaps.token_meta(token).await;
            let raw = match self.swaps.balance_of(token, signer).await {
                Ok(raw) => raw,
                Err(err) => {
                    warn!(vault = %vault.name, token = %meta.symbol, %err, "[REBALANCE] balance unreadable, skipped");
                    continue;
                }
            };
            balances.push(TokenBalance {
                formatted: format_units(raw, meta.decimals),
                symbol: meta.symbol,
                address: token,
                raw,
            });
        }
        let user_shares = match self.swaps.balance_of(vault.address, signer).await {
            Ok(shares) => Some(shares),
            Err(err) => {
                debug!(vault = %vault.name, %err, "[REBALANCE] vault shares unreadable");
                None
            }
        };

        let snapshot = VaultSnapshot::new(pool, resolution.range, balances, user_shares);
        debug!(
            vault = %vault.name,
            tick = ?snapshot.tick(),
            status = %snapshot.status(),
            "[REBALANCE] snapshot"
        );
        Ok((snapshot, resolution.attempts))
    }

    /// Full cycle for one vault. Scenario-level results come back as the
    /// verdict; `Err` is reserved for infrastructure failures.
    pub async fn run_vault(&self, vault: &VaultConfig) -> Result<RebalanceOutcome> {
        let before = self.snapshot(vault).await?;
        let status_before = before.status();
        let mut outcome = RebalanceOutcome {
            vault: vault.name.clone(),
            status_before,
            range_before: before.range.clone(),
            direction: None,
            pushes: Vec::new(),
            verdict: RebalanceVerdict::Skipped {
                reason: "range status unknown".into(),
            },
        };
        let (Some(range), Some(tick)) = (before.range.clone(), before.tick()) else {
            warn!(vault = %vault.name, "[REBALANCE] skipped: tick or range unavailable");
            return Ok(outcome);
        };
        info!(
            vault = %vault.name,
            tick,
            lower = range.lower(),
            upper = range.upper(),
            status = %status_before,
            "[REBALANCE] starting"
        );

        let mut status = status_before;
        if status == RangeStatus::InRange {
            let side = push_side(tick, &range);
            outcome.direction = Some(side);
            match self.push_out_of_range(vault, &range, side, &mut outcome.pushes).await? {
                PushEnd::Crossed => {
                    status = outcome
                        .pushes
                        .last()
                        .map(|p| p.status_after)
                        .unwrap_or(RangeStatus::Unknown);
                }
                PushEnd::Stopped(verdict) => {
                    outcome.verdict = verdict;
                    return Ok(outcome);
                }
            }
        }

        outcome.verdict = self.rebalance_and_verify(vault, status, &range).await?;
        info!(vault = %vault.name, verdict = ?outcome.verdict, "[REBALANCE] finished");
        Ok(outcome)
    }

    async fn push_out_of_range(
        &self,
        vault: &VaultConfig,
        range: &TickRange,
        side: Side,
        pushes: &mut Vec<PushAttempt>,
    ) -> Result<PushEnd> {
        let (token0, token1) = self.pool_token_addresses(vault.pool).await?;
        let (sell, buy) = match side {
            Side::High => (token1, token0),
            Side::Low => (token0, token1),
        };
        let sell: TokenMeta = self.swaps.token_meta(sell).await;
        let base = parse_units(self.push.base_amount_for(&sell.symbol), sell.decimals)?;
        if base.is_zero() {
            return Ok(PushEnd::Stopped(RebalanceVerdict::Skipped {
                reason: format!("push amount for {} is zero", sell.symbol),
            }));
        }

        let signer = self.rpc.signer();
        let scale = U256::from(self.push.scale_factor);
        let mut amount = base;
        for attempt in 0..self.push.max_attempts {
            let balance = self.swaps.balance_of(sell.address, signer).await?;
            if balance.is_zero() {
                return Ok(PushEnd::Stopped(RebalanceVerdict::Skipped {
                    reason: format!("no {} balance to push with", sell.symbol),
                }));
            }
            let amount_in = amount.min(balance);

            let pool_before = self.pools.read_pool_state(vault.pool, vault.dialect).await?;
            let Some(before) = pool_before.snapshot().cloned() else {
                return Ok(PushEnd::Stopped(RebalanceVerdict::Skipped {
                    reason: "pool unavailable during push".into(),
                }));
            };

            let request = SwapRequest {
                dialect: vault.dialect,
                token_in: sell.address,
                token_out: buy,
                amount_in,
                routing: vault.routing,
                slippage_bps: self.push.slippage_bps,
            };
            let swap = match self.swaps.swap(&request).await {
                Ok(swap) => swap,
                Err(failure) if failure.is_precondition() => {
                    return Ok(PushEnd::Stopped(RebalanceVerdict::Skipped {
                        reason: failure.to_string(),
                    }));
                }
                Err(failure) => {
                    return Ok(PushEnd::Stopped(RebalanceVerdict::PushFailed {
                        reason: failure.to_string(),
                    }));
                }
            };

            let pool_after = self.pools.read_pool_state(vault.pool, vault.dialect).await?;
            let tick_after = pool_after.tick();
            let sqrt_after = pool_after.sqrt_price();
            let status_after = range_status(tick_after, Some(range));
            let push = PushAttempt {
                attempt: attempt + 1,
                token_in: sell.symbol.clone(),
                amount_in,
                amount_out: swap.amount_out,
                tx_hash: swap.tx_hash,
                tick_before: before.tick,
                tick_after,
                tick_moved: tick_after.is_some_and(|t| t != before.tick),
                price_moved: sqrt_after.is_some_and(|p| p != before.sqrt_price),
                impact_percent: sqrt_after
                    .map(|p| price_impact_percent(before.sqrt_price, p))
                    .unwrap_or(0.0),
                status_after,
            };
            info!(
                vault = %vault.name,
                attempt = push.attempt,
                amount = %format_units(amount_in, sell.decimals),
                token = %sell.symbol,
                tick_before = push.tick_before,
                tick_after = ?push.tick_after,
                impact = push.impact_percent,
                status = %status_after,
                "[REBALANCE] push"
            );
            pushes.push(push);

            match status_after {
                RangeStatus::OutOfRange(_) => return Ok(PushEnd::Crossed),
                RangeStatus::Unknown => {
                    return Ok(PushEnd::Stopped(RebalanceVerdict::Skipped {
                        reason: "pool unreadable after push".into(),
                    }));
                }
                RangeStatus::InRange => {}
            }
            amount = amount.saturating_mul(scale);
        }

        warn!(
            vault = %vault.name,
            attempts = self.push.max_attempts,
            "[REBALANCE] price stayed in range"
        );
        Ok(PushEnd::Stopped(RebalanceVerdict::StayedInRange {
            attempts: self.push.max_attempts,
        }))
    }

    async fn rebalance_and_verify(
        &self,
        vault: &VaultConfig,
        status_before: RangeStatus,
        range_before: &TickRange,
    ) -> Result<RebalanceVerdict> {
        let target = self.rebalance_target(vault).await?;
        let data = Bytes::from(self.rebalance_call.encode_input(&[])?);

        if let Err(err) = self.rpc.call("rebalance.simulate", target, data.clone()).await {
            let rejection = match err.rpc() {
                Some(RpcError::Reverted { message, data }) => Some((message.clone(), data.clone())),
                Some(RpcError::Rejected { message, .. }) => Some((message.clone(), None)),
                _ => None,
            };
            let Some((message, revert_data)) = rejection else {
                return Err(err);
            };
            if let Some(reason) = self.unauthorized_reason(&message, revert_data.as_ref()) {
                info!(vault = %vault.name, %reason, "[REBALANCE] signer not authorized");
                return Ok(RebalanceVerdict::Unauthorized { reason });
            }
            let reason = revert_reason(&message, revert_data.as_ref());
            warn!(vault = %vault.name, %reason, "[REBALANCE] simulation reverted");
            return Ok(RebalanceVerdict::SimulationReverted { reason });
        }

        let outcome = match self.swaps.lane().submit("rebalance", target, data).await {
            Ok(outcome) => outcome,
            Err(AppError::TxReverted { tx_hash, .. }) => {
                return Ok(RebalanceVerdict::Reverted { tx_hash });
            }
            Err(err) => return Err(err),
        };

        let after = self.snapshot(vault).await?;
        let range_changed = after
            .range
            .as_ref()
            .is_some_and(|r| !r.same_bounds(range_before));
        let status_after = after.status();
        let improved = status_after == RangeStatus::InRange && status_before != RangeStatus::InRange;
        if range_changed || improved {
            Ok(RebalanceVerdict::Restored {
                tx_hash: outcome.tx_hash,
                range_changed,
                status_after,
            })
        } else {
            warn!(vault = %vault.name, tx = ?outcome.tx_hash, "[REBALANCE] mined without effect");
            Ok(RebalanceVerdict::NoEffect {
                tx_hash: outcome.tx_hash,
            })
        }
    }

    async fn rebalance_target(&self, vault: &VaultConfig) -> Result<Address> {
        match self.rebalance.target {
            RebalanceTarget::Vault => Ok(vault.address),
            RebalanceTarget::Strategy => {
                let resolution = self.ranges.resolve_with_attempts(vault.address).await?;
                Ok(resolution.strategy.unwrap_or_else(|| {
                    warn!(vault = %vault.name, "[REBALANCE] no strategy; calling the vault");
                    vault.address
                }))
            }
        }
    }

    async fn pool_token_addresses(&self, pool: Address) -> Result<(Address, Address)> {
        let token0 = self.rpc.call_decode("token0", pool, Token0Call.encode()).await?;
        let token1 = self.rpc.call_decode("token1", pool, Token1Call.encode()).await?;
        Ok((token0, token1))
    }

    fn unauthorized_reason(&self, message: &str, data: Option<&Bytes>) -> Option<String> {
        if let Some(data) = data {
            if let Some(selector) = data.get(..4) {
                if let Some((_, signature)) = self
                    .unauthorized_errors
                    .iter()
                    .find(|(sel, _)| sel.as_slice() == selector)
                {
                    return Some(signature.clone());
                }
            }
            if let Some(reason) = decode_error_string(data) {
                if self.is_unauthorized_text(&reason) {
                    return Some(reason);
                }
            }
        }
        self.is_unauthorized_text(message).then(|| message.to_string())
    }

    fn is_unauthorized_text(&self, text: &str) -> bool {
        let text = text.to_ascii_lowercase();
        self.rebalance
            .unauthorized_reasons
            .iter()
            .any(|fragment| text.contains(&fragment.to_ascii_lowercase()))
    }
}

fn decode_error_string(data: &[u8]) -> Option<String> {
    if data.get(..4)? != ERROR_STRING_SELECTOR.as_slice() {
        return None;
    }
    match ethers::abi::decode(&[ParamType::String], &data[4..]).ok()?.pop()? {
        Token::String(reason) => Some(reason),
        _ => None,
    }
}

fn revert_reason(message: &str, data: Option<&Bytes>) -> String {
    match data {
        Some(data) => match decode_error_string(data) {
            Some(reason) => reason,
            None if data.is_empty() => message.to_string(),
            None => format!("{message} (0x{})", hex::encode(data)),
        },
        None => message.to_string(),
    }
}
