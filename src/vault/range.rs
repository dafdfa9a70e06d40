//! Tick range discovery for vault/strategy proxies whose ABI is not known up front.

use crate::chain::Rpc;
use crate::chain::abi::{FieldRef, parse_function, token_to_i64};
use crate::errors::Result;
use crate::pool::MAX_PLAUSIBLE_TICK;
use ethers::abi::{Function, Token};
use ethers::types::Address;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Active tick bounds of a vault position. `lower < upper` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickRange {
    lower: i32,
    upper: i32,
    /// Which accessor produced the bounds, e.g. `strategy.positionMain`.
    source: String,
}

impl TickRange {
    /// Build a range from two raw values, swapping an inverted pair.
    ///
    /// Rejects values outside `±MAX_PLAUSIBLE_TICK` and empty ranges.
    pub fn normalized(a: i64, b: i64, source: impl Into<String>) -> Option<Self> {
        if a.abs() > MAX_PLAUSIBLE_TICK || b.abs() > MAX_PLAUSIBLE_TICK {
            return None;
        }
        let (lower, upper) = if a > b { (b, a) } else { (a, b) };
        if lower == upper {
            return None;
        }
        Some(Self {
            lower: i32::try_from(lower).ok()?,
            upper: i32::try_from(upper).ok()?,
            source: source.into(),
        })
    }

    pub fn lower(&self) -> i32 {
        self.lower
    }

    pub fn upper(&self) -> i32 {
        self.upper
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// `lower <= tick < upper`.
    pub fn contains(&self, tick: i32) -> bool {
        self.lower <= tick && tick < self.upper
    }

    pub fn same_bounds(&self, other: &TickRange) -> bool {
        self.lower == other.lower && self.upper == other.upper
    }
}

/// Candidate accessor for a position's bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeProbe {
    pub label: String,
    pub signature: String,
    pub lower: FieldRef,
    pub upper: FieldRef,
}

pub fn default_range_probes() -> Vec<RangeProbe> {
    vec![
        RangeProbe {
            label: "positionMain".into(),
            signature: "positionMain() view returns (int24 tickLower, int24 tickUpper)".into(),
            lower: FieldRef::Name("tickLower".into()),
            upper: FieldRef::Name("tickUpper".into()),
        },
        RangeProbe {
            label: "range".into(),
            signature: "range() view returns (int256 lower, int256 upper)".into(),
            lower: FieldRef::Index(0),
            upper: FieldRef::Index(1),
        },
        RangeProbe {
            label: "getTicks".into(),
            signature: "getTicks() view returns (int24, int24)".into(),
            lower: FieldRef::Index(0),
            upper: FieldRef::Index(1),
        },
        RangeProbe {
            label: "getPosition".into(),
            signature: "getPosition() view returns (uint128 liquidity, int24 tickLower, int24 tickUpper)".into(),
            lower: FieldRef::Index(1),
            upper: FieldRef::Index(2),
        },
    ]
}

pub fn default_strategy_accessors() -> Vec<String> {
    vec![
        "strategy() view returns (address)".into(),
        "getStrategy() view returns (address)".into(),
    ]
}

/// One probe and how it went, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeAttempt {
    pub source: String,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RangeResolution {
    pub range: Option<TickRange>,
    pub strategy: Option<Address>,
    pub attempts: Vec<ProbeAttempt>,
}

pub struct TickRangeResolver {
    rpc: Rpc,
    strategy_accessors: Vec<Function>,
    probes: Vec<(RangeProbe, Function)>,
}

impl TickRangeResolver {
    pub fn new(rpc: Rpc, strategy_accessors: &[String], probes: Vec<RangeProbe>) -> Result<Self> {
        let strategy_accessors = strategy_accessors
            .iter()
            .map(|sig| parse_function(sig))
            .collect::<Result<Vec<_>>>()?;
        let probes = probes
            .into_iter()
            .map(|probe| {
                let function = parse_function(&probe.signature)?;
                Ok((probe, function))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            rpc,
            strategy_accessors,
            probes,
        })
    }

    /// Active tick bounds, or `None` when no candidate yields a plausible range.
    pub async fn resolve_tick_range(&self, vault: Address) -> Result<Option<TickRange>> {
        Ok(self.resolve_with_attempts(vault).await?.range)
    }

    pub async fn resolve_with_attempts(&self, vault: Address) -> Result<RangeResolution> {
        let mut attempts = Vec::new();
        let strategy = self.resolve_strategy(vault, &mut attempts).await?;

        let mut targets = Vec::with_capacity(2);
        if let Some(strategy) = strategy {
            targets.push(("strategy", strategy));
        }
        targets.push(("vault", vault));

        for (prefix, target) in targets {
            for (probe, function) in &self.probes {
                let source = format!("{prefix}.{}", probe.label);
                let outcome = match self.read_bounds(target, &source, probe, function).await {
                    Ok(Some((a, b))) => match TickRange::normalized(a, b, source.clone()) {
                        Some(range) => {
                            info!(
                                ?vault,
                                source = %range.source,
                                lower = range.lower,
                                upper = range.upper,
                                "[RANGE] resolved"
                            );
                            attempts.push(ProbeAttempt {
                                source,
                                outcome: "accepted".into(),
                            });
                            return Ok(RangeResolution {
                                range: Some(range),
                                strategy,
                                attempts,
                            });
                        }
                        None => format!("implausible bounds ({a}, {b})"),
                    },
                    Ok(None) => "non-integer bounds".to_string(),
                    Err(err) if err.is_retry_exhausted() => return Err(err),
                    Err(err) => err.to_string(),
                };
                debug!(?vault, %source, %outcome, "[RANGE] candidate rejected");
                attempts.push(ProbeAttempt { source, outcome });
            }
        }

        warn!(?vault, tried = attempts.len(), "[RANGE] no candidate produced a range");
        Ok(RangeResolution {
            range: None,
            strategy,
            attempts,
        })
    }

    async fn resolve_strategy(
        &self,
        vault: Address,
        attempts: &mut Vec<ProbeAttempt>,
    ) -> Result<Option<Address>> {
        for function in &self.strategy_accessors {
            let source = format!("vault.{}", function.name);
            let outcome = match self.call_probe(vault, &source, function).await {
                Ok(tokens) => match tokens.first() {
                    Some(Token::Address(addr)) if !addr.is_zero() => {
                        if self.rpc.has_code(*addr).await? {
                            debug!(?vault, strategy = ?addr, "[RANGE] strategy resolved");
                            return Ok(Some(*addr));
                        }
                        format!("strategy {addr:?} has no code")
                    }
                    _ => "no strategy address".to_string(),
                },
                Err(err) if err.is_retry_exhausted() => return Err(err),
                Err(err) => err.to_string(),
            };
            attempts.push(ProbeAttempt { source, outcome });
        }
        Ok(None)
    }

    async fn read_bounds(
        &self,
        target: Address,
        source: &str,
        probe: &RangeProbe,
        function: &Function,
    ) -> Result<Option<(i64, i64)>> {
        let tokens = self.call_probe(target, source, function).await?;
        let lower = probe.lower.pick(function, &tokens).and_then(token_to_i64);
        let upper = probe.upper.pick(function, &tokens).and_then(token_to_i64);
        Ok(lower.zip(upper))
    }

    async fn call_probe(&self, target: Address, label: &str, function: &Function) -> Result<Vec<Token>> {
        let data = function.encode_input(&[])?;
        let raw = self.rpc.call(label, target, data.into()).await?;
        Ok(function.decode_output(&raw)?)
    }
}
