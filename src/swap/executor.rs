use super::{
    PairTable, RoutingParam, SwapErrorKind, SwapFailure, SwapRequest, SwapResult, TokenMeta,
    ensure_allowance,
};
use crate::chain::abi::{BalanceOfCall, DecimalsCall, SymbolCall, Token0Call, Token1Call, parse_function};
use crate::chain::{Rpc, TxLane};
use crate::errors::Result;
use crate::impact::{bigint_to_u256, format_units, u256_to_bigint};
use crate::pool::{Dialect, PoolState, PoolStateReader};
use ethers::abi::{AbiEncode, Function, Token};
use ethers::types::{Address, U256};
use num_bigint::BigInt;
use num_traits::One;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

const FEE_TIER_SWAP: &str = "exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160)) payable returns (uint256)";
const DEPLOYER_SWAP: &str = "exactInputSingle((address,address,address,address,uint256,uint256,uint256,uint160)) payable returns (uint256)";
const BPS: u32 = 10_000;
const FALLBACK_DECIMALS: u8 = 18;

/// Router address per dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routers {
    #[serde(alias = "a")]
    pub slot0: Address,
    #[serde(alias = "b")]
    pub global_state: Address,
}

impl Routers {
    pub fn for_dialect(&self, dialect: Dialect) -> Address {
        match dialect {
            Dialect::Slot0 => self.slot0,
            Dialect::GlobalState => self.global_state,
        }
    }
}

/// Lowest acceptable output for `amount_in` at the pool's spot price.
///
/// `zero_for_one` sells token0, where the spot price is `sqrtPriceX96^2 / 2^192`
/// token1 per token0. A tolerance of 10_000 bps or more, or an unknown price,
/// yields no floor.
pub fn min_amount_out(amount_in: U256, sqrt_price_x96: U256, zero_for_one: bool, slippage_bps: u32) -> U256 {
    if slippage_bps >= BPS || sqrt_price_x96.is_zero() {
        return U256::zero();
    }
    let amount = u256_to_bigint(amount_in);
    let sqrt = u256_to_bigint(sqrt_price_x96);
    let price_num = &sqrt * &sqrt;
    let q192: BigInt = BigInt::one() << 192;
    let spot = if zero_for_one {
        amount * price_num / q192
    } else {
        amount * q192 / price_num
    };
    let floor = spot * BigInt::from(BPS - slippage_bps) / BigInt::from(BPS);
    bigint_to_u256(&floor)
}

fn routing_fits(dialect: Dialect, routing: RoutingParam) -> bool {
    matches!(
        (dialect, routing),
        (Dialect::Slot0, RoutingParam::FeeTier(_)) | (Dialect::GlobalState, RoutingParam::Deployer(_))
    )
}

/// Symbols and pool known so far, carried into a failure.
struct FailureContext {
    symbol_in: String,
    symbol_out: String,
    pool: Option<Address>,
}

pub struct SwapExecutor {
    rpc: Rpc,
    lane: Arc<TxLane>,
    pools: Arc<PoolStateReader>,
    pairs: PairTable,
    routers: Routers,
    fee_tier_swap: Function,
    deployer_swap: Function,
}

impl SwapExecutor {
    pub fn new(
        rpc: Rpc,
        lane: Arc<TxLane>,
        pools: Arc<PoolStateReader>,
        pairs: PairTable,
        routers: Routers,
    ) -> Result<Self> {
        Ok(Self {
            rpc,
            lane,
            pools,
            pairs,
            routers,
            fee_tier_swap: parse_function(FEE_TIER_SWAP)?,
            deployer_swap: parse_function(DEPLOYER_SWAP)?,
        })
    }

    pub fn lane(&self) -> &Arc<TxLane> {
        &self.lane
    }

    pub async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        self.rpc
            .call_decode("balanceOf", token, BalanceOfCall { account: owner }.encode())
            .await
    }

    /// Symbol and decimals for diagnostics. Tokens with a non-standard
    /// `symbol()` fall back to their address.
    pub async fn token_meta(&self, token: Address) -> TokenMeta {
        let symbol = match self.rpc.call_decode::<String>("symbol", token, SymbolCall.encode()).await {
            Ok(symbol) => symbol,
            Err(err) => {
                debug!(?token, %err, "[SWAP] symbol unreadable");
                format!("{token:?}")
            }
        };
        let decimals = self
            .rpc
            .call_decode::<u8>("decimals", token, DecimalsCall.encode())
            .await
            .unwrap_or(FALLBACK_DECIMALS);
        TokenMeta {
            address: token,
            symbol,
            decimals,
        }
    }

    /// Swap `amount_in` of `token_in` through the pair's router.
    ///
    /// The reported output is the signer's `token_out` balance delta around
    /// the swap transaction, never the router's return value.
    pub async fn swap(&self, request: &SwapRequest) -> std::result::Result<SwapResult, SwapFailure> {
        let mut ctx = FailureContext {
            symbol_in: format!("{:?}", request.token_in),
            symbol_out: format!("{:?}", request.token_out),
            pool: None,
        };
        match self.execute(request, &mut ctx).await {
            Ok(result) => Ok(result),
            Err(kind) => {
                let failure = SwapFailure {
                    symbol_in: ctx.symbol_in,
                    symbol_out: ctx.symbol_out,
                    pool: ctx.pool,
                    amount_in: request.amount_in,
                    kind,
                };
                warn!(error = %failure, "[SWAP] failed");
                Err(failure)
            }
        }
    }

    async fn execute(
        &self,
        request: &SwapRequest,
        ctx: &mut FailureContext,
    ) -> std::result::Result<SwapResult, SwapErrorKind> {
        let meta_in = self.token_meta(request.token_in).await;
        let meta_out = self.token_meta(request.token_out).await;
        ctx.symbol_in = meta_in.symbol.clone();
        ctx.symbol_out = meta_out.symbol.clone();

        if request.amount_in.is_zero() {
            return Err(SwapErrorKind::ZeroAmount);
        }
        if !routing_fits(request.dialect, request.routing) {
            return Err(SwapErrorKind::DialectMismatch {
                dialect: request.dialect,
                routing: request.routing,
            });
        }

        let signer = self.rpc.signer();
        let have = self.balance_of(request.token_in, signer).await?;
        if have < request.amount_in {
            return Err(SwapErrorKind::InsufficientBalance {
                have,
                need: request.amount_in,
            });
        }

        let entry = self
            .pairs
            .lookup(&meta_in.symbol, &meta_out.symbol)
            .ok_or(SwapErrorKind::NoPool)?;
        ctx.pool = Some(entry.pool);
        if entry.dialect != request.dialect {
            return Err(SwapErrorKind::DialectMismatch {
                dialect: entry.dialect,
                routing: request.routing,
            });
        }

        let snapshot = match self.pools.read_pool_state(entry.pool, request.dialect).await? {
            PoolState::Live(snapshot) => snapshot,
            PoolState::Unavailable { warning } => return Err(SwapErrorKind::PoolUnavailable(warning)),
        };
        if snapshot.liquidity == 0 {
            return Err(SwapErrorKind::ZeroLiquidity);
        }

        let zero_for_one = self
            .direction(entry.pool, request.token_in, request.token_out)
            .await?;
        let amount_out_minimum = min_amount_out(
            request.amount_in,
            snapshot.sqrt_price,
            zero_for_one,
            request.slippage_bps,
        );

        let router = self.routers.for_dialect(request.dialect);
        let approval_tx =
            ensure_allowance(&self.rpc, &self.lane, request.token_in, router, request.amount_in).await?;

        let out_before = self.balance_of(request.token_out, signer).await?;
        let deadline = self
            .rpc
            .latest_timestamp()
            .await?
            .saturating_add(self.lane.config().deadline_secs);
        let calldata = self.encode_swap(request, signer, deadline, amount_out_minimum)?;

        debug!(
            pool = ?entry.pool,
            ?router,
            zero_for_one,
            min_out = %amount_out_minimum,
            "[SWAP] submitting"
        );
        let outcome = self.lane.submit("exactInputSingle", router, calldata.into()).await?;

        let out_after = self.balance_of(request.token_out, signer).await?;
        let amount_out = out_after.saturating_sub(out_before);

        info!(
            pair = %format!("{}->{}", meta_in.symbol, meta_out.symbol),
            amount_in = %format_units(request.amount_in, meta_in.decimals),
            amount_out = %format_units(amount_out, meta_out.decimals),
            tx = ?outcome.tx_hash,
            block = outcome.block_number,
            "[SWAP] executed"
        );

        Ok(SwapResult {
            tx_hash: outcome.tx_hash,
            amount_in: request.amount_in,
            amount_out,
            block_number: outcome.block_number,
            approval_tx,
            zero_for_one,
        })
    }

    /// `true` when `token_in` is the pool's token0, judged by address.
    async fn direction(
        &self,
        pool: Address,
        token_in: Address,
        token_out: Address,
    ) -> std::result::Result<bool, SwapErrorKind> {
        let token0: Address = self.rpc.call_decode("token0", pool, Token0Call.encode()).await?;
        let token1: Address = self.rpc.call_decode("token1", pool, Token1Call.encode()).await?;
        if token_in == token0 && token_out == token1 {
            Ok(true)
        } else if token_in == token1 && token_out == token0 {
            Ok(false)
        } else if token_in != token0 && token_in != token1 {
            Err(SwapErrorKind::PoolMismatch { token: token_in })
        } else {
            Err(SwapErrorKind::PoolMismatch { token: token_out })
        }
    }

    fn encode_swap(
        &self,
        request: &SwapRequest,
        recipient: Address,
        deadline: u64,
        amount_out_minimum: U256,
    ) -> Result<Vec<u8>> {
        let (function, routing) = match request.routing {
            RoutingParam::FeeTier(fee) => (&self.fee_tier_swap, Token::Uint(U256::from(fee))),
            RoutingParam::Deployer(deployer) => (&self.deployer_swap, Token::Address(deployer)),
        };
        let params = Token::Tuple(vec![
            Token::Address(request.token_in),
            Token::Address(request.token_out),
            routing,
            Token::Address(recipient),
            Token::Uint(U256::from(deadline)),
            Token::Uint(request.amount_in),
            Token::Uint(amount_out_minimum),
            Token::Uint(U256::zero()),
        ]);
        Ok(function.encode_input(&[params])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::{MockChain, MockState};
    use crate::chain::{ChainClient, TxConfig};
    use crate::pool::default_pool_probes;
    use crate::retry::RetryPolicy;
    use crate::swap::PairEntry;
    use ethers::types::I256;

    const FEE_TIER_SIG: &str = "exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))";
    const DEPLOYER_SIG: &str = "exactInputSingle((address,address,address,address,uint256,uint256,uint256,uint160))";

    struct Fixture {
        mock: Arc<MockChain>,
        executor: SwapExecutor,
        weth: Address,
        usdc: Address,
        pool: Address,
        router: Address,
        signer: Address,
    }

    fn uint(v: u128) -> Token {
        Token::Uint(U256::from(v))
    }

    fn fixture_with(liquidity: u128, pairs: Vec<PairEntry>) -> Fixture {
        let mock = Arc::new(MockChain::new());
        let weth = MockChain::addr(0x1);
        let usdc = MockChain::addr(0x2);
        let pool = MockChain::addr(0x100);
        let router = MockChain::addr(0x200);
        mock.add_token(weth, "WETH", 18);
        mock.add_token(usdc, "USDC", 6);
        mock.respond(
            pool,
            "slot0()",
            vec![
                uint(1u128 << 96),
                Token::Int(I256::from(0i64).into_raw()),
                uint(0),
                uint(1),
                uint(1),
                uint(0),
                Token::Bool(true),
            ],
        );
        mock.respond(pool, "liquidity()", vec![uint(liquidity)]);
        mock.respond(pool, "token0()", vec![Token::Address(weth)]);
        mock.respond(pool, "token1()", vec![Token::Address(usdc)]);
        mock.deploy(router);

        let policy = RetryPolicy {
            max_attempts: 2,
            min_delay_ms: 1,
            max_delay_ms: 2,
            jitter_ms: 0,
        };
        let rpc = Rpc::new(mock.clone(), policy);
        let lane = Arc::new(TxLane::new(rpc.clone(), TxConfig {
            nonce_poll_interval_ms: 1,
            receipt_poll_interval_ms: 1,
            ..TxConfig::default()
        }));
        let pools = Arc::new(PoolStateReader::new(rpc.clone(), default_pool_probes()).unwrap());
        let routers = Routers {
            slot0: router,
            global_state: MockChain::addr(0x300),
        };
        let pairs = if pairs.is_empty() {
            vec![PairEntry {
                base: "USDC".into(),
                quote: "WETH".into(),
                pool,
                dialect: Dialect::Slot0,
            }]
        } else {
            pairs
        };
        let executor = SwapExecutor::new(rpc, lane, pools, PairTable::new(pairs), routers).unwrap();
        let signer = mock.signer();
        Fixture {
            mock,
            executor,
            weth,
            usdc,
            pool,
            router,
            signer,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(1_000_000, Vec::new())
    }

    fn sell_weth(f: &Fixture, amount: u64) -> SwapRequest {
        SwapRequest {
            dialect: Dialect::Slot0,
            token_in: f.weth,
            token_out: f.usdc,
            amount_in: U256::from(amount),
            routing: RoutingParam::FeeTier(3_000),
            slippage_bps: 10_000,
        }
    }

    /// Router fill that moves `amount` WETH out and `fill` USDC in.
    fn router_fills(f: &Fixture, amount: u64, fill: u64) {
        let (weth, usdc, signer) = (f.weth, f.usdc, f.signer);
        f.mock.on_send(f.router, FEE_TIER_SIG, move |s: &mut MockState| {
            let weth_left = s.balance(weth, signer).saturating_sub(U256::from(amount));
            s.set_balance(weth, signer, weth_left);
            let usdc_now = s.balance(usdc, signer) + U256::from(fill);
            s.set_balance(usdc, signer, usdc_now);
        });
    }

    #[tokio::test]
    async fn insufficient_balance_sends_nothing() {
        let f = fixture();
        f.mock.set_balance(f.weth, f.signer, U256::from(5u64));
        let err = f.executor.swap(&sell_weth(&f, 10)).await.unwrap_err();
        assert!(matches!(err.kind, SwapErrorKind::InsufficientBalance { .. }));
        assert_eq!(err.symbol_in, "WETH");
        assert_eq!(f.mock.send_attempts(), 0);
    }

    #[tokio::test]
    async fn output_is_the_balance_delta() {
        let f = fixture();
        f.mock.set_balance(f.weth, f.signer, U256::from(100u64));
        f.mock.set_balance(f.usdc, f.signer, U256::from(1_000u64));
        router_fills(&f, 40, 777);

        let result = f.executor.swap(&sell_weth(&f, 40)).await.unwrap();
        assert_eq!(result.amount_out, U256::from(777u64));
        assert_eq!(result.amount_in, U256::from(40u64));
        assert!(result.approval_tx.is_some());
        assert!(result.zero_for_one);
        assert_eq!(f.mock.balance(f.weth, f.signer), U256::from(60u64));
        assert_eq!(f.mock.sent_to(f.router, FEE_TIER_SIG), 1);
    }

    #[tokio::test]
    async fn repeated_swaps_approve_once() {
        let f = fixture();
        f.mock.set_balance(f.weth, f.signer, U256::from(100u64));
        router_fills(&f, 10, 1);

        let first = f.executor.swap(&sell_weth(&f, 10)).await.unwrap();
        let second = f.executor.swap(&sell_weth(&f, 10)).await.unwrap();
        assert!(first.approval_tx.is_some());
        assert!(second.approval_tx.is_none());
        assert_eq!(f.mock.sent_to(f.weth, "approve(address,uint256)"), 1);
    }

    #[tokio::test]
    async fn direction_follows_pool_token_order() {
        let f = fixture();
        f.mock.set_balance(f.usdc, f.signer, U256::from(50u64));
        let request = SwapRequest {
            token_in: f.usdc,
            token_out: f.weth,
            ..sell_weth(&f, 50)
        };
        let result = f.executor.swap(&request).await.unwrap();
        assert!(!result.zero_for_one);
        assert_eq!(result.amount_out, U256::zero());
    }

    #[tokio::test]
    async fn missing_pair_is_no_pool() {
        let f = fixture_with(1_000_000, vec![PairEntry {
            base: "WETH".into(),
            quote: "DAI".into(),
            pool: MockChain::addr(0x101),
            dialect: Dialect::Slot0,
        }]);
        f.mock.set_balance(f.weth, f.signer, U256::from(10u64));
        let err = f.executor.swap(&sell_weth(&f, 10)).await.unwrap_err();
        assert!(matches!(err.kind, SwapErrorKind::NoPool));
        assert!(err.pool.is_none());
        assert!(f.mock.sent().is_empty());
    }

    #[tokio::test]
    async fn zero_liquidity_is_rejected() {
        let f = fixture_with(0, Vec::new());
        f.mock.set_balance(f.weth, f.signer, U256::from(10u64));
        let err = f.executor.swap(&sell_weth(&f, 10)).await.unwrap_err();
        assert!(matches!(err.kind, SwapErrorKind::ZeroLiquidity));
        assert_eq!(err.pool, Some(f.pool));
        assert!(f.mock.sent().is_empty());
    }

    #[tokio::test]
    async fn foreign_pool_is_a_mismatch() {
        let f = fixture();
        f.mock.respond(f.pool, "token0()", vec![Token::Address(MockChain::addr(0x7))]);
        f.mock.set_balance(f.weth, f.signer, U256::from(10u64));
        let err = f.executor.swap(&sell_weth(&f, 10)).await.unwrap_err();
        assert!(matches!(err.kind, SwapErrorKind::PoolMismatch { token } if token == f.weth));
    }

    #[tokio::test]
    async fn routing_must_match_dialect() {
        let f = fixture();
        f.mock.set_balance(f.weth, f.signer, U256::from(10u64));
        let request = SwapRequest {
            routing: RoutingParam::Deployer(MockChain::addr(0x9)),
            ..sell_weth(&f, 10)
        };
        let err = f.executor.swap(&request).await.unwrap_err();
        assert!(matches!(err.kind, SwapErrorKind::DialectMismatch { .. }));
        assert!(err.is_precondition());
        assert_eq!(f.mock.send_attempts(), 0);
    }

    #[tokio::test]
    async fn deployer_routed_swap_uses_global_state_router() {
        let algebra_pool = MockChain::addr(0x101);
        let deployer = MockChain::addr(0x9);
        let f = fixture_with(1_000_000, vec![PairEntry {
            base: "WETH".into(),
            quote: "USDC".into(),
            pool: algebra_pool,
            dialect: Dialect::GlobalState,
        }]);
        let router = MockChain::addr(0x300);
        f.mock.respond(
            algebra_pool,
            "safelyGetStateOfAMM()",
            vec![
                uint(1u128 << 96),
                Token::Int(I256::from(-12i64).into_raw()),
                uint(500),
                uint(0),
                uint(5_000),
                Token::Int(I256::from(60i64).into_raw()),
                Token::Int(I256::from(-60i64).into_raw()),
            ],
        );
        f.mock.respond(algebra_pool, "token0()", vec![Token::Address(f.weth)]);
        f.mock.respond(algebra_pool, "token1()", vec![Token::Address(f.usdc)]);
        f.mock.set_balance(f.weth, f.signer, U256::from(100u64));
        let (weth, usdc, signer) = (f.weth, f.usdc, f.signer);
        f.mock.on_send(router, DEPLOYER_SIG, move |s: &mut MockState| {
            s.set_balance(weth, signer, U256::from(70u64));
            s.set_balance(usdc, signer, U256::from(55u64));
        });

        let request = SwapRequest {
            dialect: Dialect::GlobalState,
            routing: RoutingParam::Deployer(deployer),
            ..sell_weth(&f, 30)
        };
        let result = f.executor.swap(&request).await.unwrap();

        assert_eq!(result.amount_out, U256::from(55u64));
        assert!(result.zero_for_one);
        assert_eq!(f.mock.sent_to(router, DEPLOYER_SIG), 1);
        assert_eq!(f.mock.sent_to(f.router, FEE_TIER_SIG), 0);
        assert!(result.approval_tx.is_some());
        assert_eq!(f.mock.sent_to(f.weth, "approve(address,uint256)"), 1);

        let swap_tx = f
            .mock
            .sent()
            .into_iter()
            .find(|tx| tx.to == router)
            .expect("swap sent to router");
        // third tuple word carries the deployer instead of a fee tier
        assert_eq!(&swap_tx.data[4 + 64 + 12..4 + 96], deployer.as_bytes());
    }

    #[tokio::test]
    async fn reverted_receipt_names_the_swap() {
        let f = fixture();
        f.mock.set_balance(f.weth, f.signer, U256::from(10u64));
        f.mock.on_send(f.router, FEE_TIER_SIG, |s: &mut MockState| s.revert_current());
        let err = f.executor.swap(&sell_weth(&f, 10)).await.unwrap_err();
        assert!(matches!(err.kind, SwapErrorKind::Reverted { .. }));
        assert_eq!(err.symbol_out, "USDC");
        assert_eq!(err.pool, Some(f.pool));
        assert_eq!(f.mock.sent_to(f.router, FEE_TIER_SIG), 1);
    }

    #[test]
    fn minimum_output_tracks_spot_price() {
        let two_q96 = U256::from(2u128 << 96);
        // price 4 token1 per token0
        assert_eq!(min_amount_out(U256::from(100u64), two_q96, true, 100), U256::from(396u64));
        assert_eq!(min_amount_out(U256::from(100u64), two_q96, false, 100), U256::from(24u64));
        assert_eq!(min_amount_out(U256::from(100u64), two_q96, true, 10_000), U256::zero());
        assert_eq!(min_amount_out(U256::from(100u64), U256::zero(), true, 50), U256::zero());
    }
}
