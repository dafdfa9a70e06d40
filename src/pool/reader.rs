//! Dialect-normalizing pool state reader.

use super::state::{Dialect, MAX_PLAUSIBLE_TICK, PoolSnapshot, PoolState};
use crate::chain::Rpc;
use crate::chain::abi::{FieldRef, LiquidityCall, parse_function, token_to_i64, token_to_u128, token_to_u256};
use crate::errors::Result;
use ethers::abi::{AbiEncode, Function, Token};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// One known price/tick accessor shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolProbe {
    pub label: String,
    pub dialect: Dialect,
    pub signature: String,
    pub sqrt_price: FieldRef,
    pub tick: FieldRef,
    /// Liquidity carried in the same tuple; otherwise `liquidity()` is called.
    #[serde(default)]
    pub liquidity: Option<FieldRef>,
}

pub fn default_pool_probes() -> Vec<PoolProbe> {
    vec![
        PoolProbe {
            label: "slot0".into(),
            dialect: Dialect::Slot0,
            signature: "slot0() view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)".into(),
            sqrt_price: FieldRef::Index(0),
            tick: FieldRef::Index(1),
            liquidity: None,
        },
        PoolProbe {
            label: "safelyGetStateOfAMM".into(),
            dialect: Dialect::GlobalState,
            signature: "safelyGetStateOfAMM() view returns (uint160 sqrtPrice, int24 tick, uint16 lastFee, uint8 pluginConfig, uint128 activeLiquidity, int24 nextTick, int24 previousTick)".into(),
            sqrt_price: FieldRef::Index(0),
            tick: FieldRef::Index(1),
            liquidity: Some(FieldRef::Index(4)),
        },
        PoolProbe {
            label: "globalState".into(),
            dialect: Dialect::GlobalState,
            signature: "globalState() view returns (uint160 price, int24 tick, uint16 lastFee, uint8 pluginConfig, uint16 communityFee, bool unlocked)".into(),
            sqrt_price: FieldRef::Index(0),
            tick: FieldRef::Index(1),
            liquidity: None,
        },
    ]
}

struct CompiledProbe {
    probe: PoolProbe,
    function: Function,
}

pub struct PoolStateReader {
    rpc: Rpc,
    probes: Vec<CompiledProbe>,
}

impl PoolStateReader {
    pub fn new(rpc: Rpc, probes: Vec<PoolProbe>) -> Result<Self> {
        let probes = probes
            .into_iter()
            .map(|probe| {
                let function = parse_function(&probe.signature)?;
                Ok(CompiledProbe { probe, function })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rpc, probes })
    }

    /// Read and normalize the pool's current state.
    ///
    /// `hint` only decides which dialect's accessors are tried first; the
    /// other dialect is always tried afterwards.
    pub async fn read_pool_state(&self, pool: Address, hint: Dialect) -> Result<PoolState> {
        if !self.rpc.has_code(pool).await? {
            warn!(?pool, "[POOL] no contract code");
            return Ok(PoolState::Unavailable {
                warning: format!("no contract code at {pool:?}"),
            });
        }

        let ordered = self
            .probes
            .iter()
            .filter(|c| c.probe.dialect == hint)
            .chain(self.probes.iter().filter(|c| c.probe.dialect != hint));

        let mut misses = Vec::new();
        for compiled in ordered {
            match self.try_probe(pool, compiled).await {
                Ok(Some(snapshot)) => {
                    debug!(
                        ?pool,
                        source = %snapshot.source,
                        tick = snapshot.tick,
                        liquidity = snapshot.liquidity,
                        "[POOL] state read"
                    );
                    return Ok(PoolState::Live(snapshot));
                }
                Ok(None) => misses.push(format!("{}: implausible values", compiled.probe.label)),
                Err(err) if err.is_retry_exhausted() => return Err(err),
                Err(err) => misses.push(format!("{}: {err}", compiled.probe.label)),
            }
        }

        warn!(?pool, %hint, "[POOL] no state accessor answered");
        Ok(PoolState::Unavailable {
            warning: format!(
                "no state accessor answered on {pool:?} ({})",
                misses.join("; ")
            ),
        })
    }

    async fn try_probe(&self, pool: Address, compiled: &CompiledProbe) -> Result<Option<PoolSnapshot>> {
        let CompiledProbe { probe, function } = compiled;
        let data = function.encode_input(&[])?;
        let raw = self.rpc.call(&probe.label, pool, data.into()).await?;
        let tokens = function.decode_output(&raw)?;
        let Some((sqrt_price, tick, inline_liquidity)) = normalize(probe, function, &tokens) else {
            return Ok(None);
        };
        let liquidity = match inline_liquidity {
            Some(liquidity) => liquidity,
            None => {
                self.rpc
                    .call_decode::<u128>("liquidity", pool, LiquidityCall.encode())
                    .await?
            }
        };
        Ok(Some(PoolSnapshot {
            dialect: probe.dialect,
            tick,
            sqrt_price,
            liquidity,
            source: probe.label.clone(),
        }))
    }
}

fn normalize(
    probe: &PoolProbe,
    function: &Function,
    tokens: &[Token],
) -> Option<(U256, i32, Option<u128>)> {
    let sqrt_price = token_to_u256(probe.sqrt_price.pick(function, tokens)?)?;
    let tick = token_to_i64(probe.tick.pick(function, tokens)?)?;
    if tick.abs() > MAX_PLAUSIBLE_TICK {
        return None;
    }
    let liquidity = match &probe.liquidity {
        Some(field) => Some(token_to_u128(field.pick(function, tokens)?)?),
        None => None,
    };
    Some((sqrt_price, i32::try_from(tick).ok()?, liquidity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{MockChain, selector};
    use crate::errors::{AppError, RpcError};
    use crate::retry::RetryPolicy;
    use ethers::types::I256;
    use std::sync::Arc;

    fn reader(mock: &Arc<MockChain>, attempts: u32) -> PoolStateReader {
        let rpc = Rpc::new(mock.clone(), RetryPolicy {
            max_attempts: attempts,
            min_delay_ms: 1,
            max_delay_ms: 2,
            jitter_ms: 0,
        });
        PoolStateReader::new(rpc, default_pool_probes()).expect("default probes parse")
    }

    fn int(v: i64) -> Token {
        Token::Int(I256::from(v).into_raw())
    }

    fn uint(v: u128) -> Token {
        Token::Uint(U256::from(v))
    }

    fn slot0_pool(mock: &MockChain, pool: Address, tick: i64) {
        mock.respond(
            pool,
            "slot0()",
            vec![uint(1u128 << 96), int(tick), uint(1), uint(1), uint(1), uint(0), Token::Bool(true)],
        );
        mock.respond(pool, "liquidity()", vec![uint(5_000)]);
    }

    #[tokio::test]
    async fn missing_code_is_reported_not_thrown() {
        let mock = Arc::new(MockChain::new());
        let state = reader(&mock, 2)
            .read_pool_state(MockChain::addr(9), Dialect::Slot0)
            .await
            .expect("no error for empty address");
        assert!(!state.ok());
        assert!(state.warning().unwrap().starts_with("no contract code"));
        assert!(mock.call_log().is_empty());
    }

    #[tokio::test]
    async fn slot0_pool_reads_liquidity_separately() {
        let mock = Arc::new(MockChain::new());
        let pool = MockChain::addr(1);
        slot0_pool(&mock, pool, -120);
        let state = reader(&mock, 2).read_pool_state(pool, Dialect::Slot0).await.unwrap();
        let snap = state.snapshot().expect("live pool");
        assert_eq!(snap.dialect, Dialect::Slot0);
        assert_eq!(snap.tick, -120);
        assert_eq!(snap.liquidity, 5_000);
        assert_eq!(snap.sqrt_price, U256::from(1u128 << 96));
    }

    #[tokio::test]
    async fn wrong_hint_still_falls_back_to_other_dialect() {
        let mock = Arc::new(MockChain::new());
        let pool = MockChain::addr(2);
        mock.respond(
            pool,
            "safelyGetStateOfAMM()",
            vec![uint(7u128 << 96), int(4_321), uint(500), uint(0), uint(42), int(4_380), int(4_320)],
        );
        let state = reader(&mock, 2).read_pool_state(pool, Dialect::Slot0).await.unwrap();
        let snap = state.snapshot().expect("live pool");
        assert_eq!(snap.dialect, Dialect::GlobalState);
        assert_eq!(snap.source, "safelyGetStateOfAMM");
        assert_eq!(snap.liquidity, 42);

        let probed: Vec<_> = mock.call_log().into_iter().map(|(_, sel)| sel).collect();
        assert_eq!(probed[0], selector("slot0()"));
        assert_eq!(probed[1], selector("safelyGetStateOfAMM()"));
    }

    #[tokio::test]
    async fn legacy_global_state_is_last_resort() {
        let mock = Arc::new(MockChain::new());
        let pool = MockChain::addr(3);
        mock.respond(
            pool,
            "globalState()",
            vec![uint(3u128 << 96), int(-7), uint(100), uint(0), uint(0), Token::Bool(true)],
        );
        mock.respond(pool, "liquidity()", vec![uint(9)]);
        let state = reader(&mock, 2)
            .read_pool_state(pool, Dialect::GlobalState)
            .await
            .unwrap();
        let snap = state.snapshot().expect("live pool");
        assert_eq!(snap.source, "globalState");
        assert_eq!(snap.tick, -7);
        assert_eq!(snap.liquidity, 9);
    }

    #[tokio::test]
    async fn implausible_tick_is_not_live() {
        let mock = Arc::new(MockChain::new());
        let pool = MockChain::addr(4);
        slot0_pool(&mock, pool, 2_000_000);
        let state = reader(&mock, 2).read_pool_state(pool, Dialect::Slot0).await.unwrap();
        assert!(!state.ok());
        assert!(state.warning().unwrap().contains("slot0: implausible"));
    }

    #[tokio::test]
    async fn transient_failures_are_absorbed() {
        let mock = Arc::new(MockChain::new());
        let pool = MockChain::addr(5);
        slot0_pool(&mock, pool, 10);
        mock.fail_calls(pool, "slot0()", 2, RpcError::Transport("connection reset".into()));
        let state = reader(&mock, 4).read_pool_state(pool, Dialect::Slot0).await.unwrap();
        assert_eq!(state.tick(), Some(10));
    }

    #[tokio::test]
    async fn exhausted_retries_propagate() {
        let mock = Arc::new(MockChain::new());
        let pool = MockChain::addr(6);
        slot0_pool(&mock, pool, 10);
        mock.fail_calls(pool, "slot0()", 5, RpcError::RateLimited {
            code: 429,
            message: "slow down".into(),
        });
        let err = reader(&mock, 3)
            .read_pool_state(pool, Dialect::Slot0)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RetryExhausted { attempts: 3, .. }));
    }

    #[test]
    fn every_live_tick_is_bounded() {
        let probe = &default_pool_probes()[0];
        let function = parse_function(&probe.signature).unwrap();
        for tick in [-1_000_001i64, 1_000_001, 5_000_000] {
            let tokens = vec![uint(1), int(tick), uint(0), uint(0), uint(0), uint(0), Token::Bool(true)];
            assert!(normalize(probe, &function, &tokens).is_none());
        }
        let tokens = vec![uint(1), int(-1_000_000), uint(0), uint(0), uint(0), uint(0), Token::Bool(true)];
        assert_eq!(normalize(probe, &function, &tokens).map(|n| n.1), Some(-1_000_000));
    }
}
