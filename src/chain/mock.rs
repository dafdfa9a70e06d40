//! In-memory [`ChainClient`] for unit tests.

use super::abi::{AllowanceCall, ApproveCall, BalanceOfCall, DecimalsCall, SymbolCall};
use super::{ChainClient, NonceTag, TxOutcome};
use crate::errors::RpcError;
use async_trait::async_trait;
use ethers::abi::{AbiDecode, AbiEncode, Token};
use ethers::contract::EthCall;
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::id;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

pub(crate) type Selector = [u8; 4];
type SendEffect = Box<dyn Fn(&mut MockState) + Send + Sync>;

#[derive(Debug, Clone)]
pub(crate) struct SentTx {
    pub to: Address,
    pub data: Bytes,
    pub pending_at_send: u32,
}

#[derive(Default)]
pub(crate) struct MockState {
    code: HashSet<Address>,
    responses: HashMap<(Address, Selector), Bytes>,
    reverts: HashMap<(Address, Selector), Option<Bytes>>,
    call_failures: HashMap<(Address, Selector), VecDeque<RpcError>>,
    tokens: HashMap<Address, (String, u8)>,
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    effects: HashMap<(Address, Selector), SendEffect>,
    call_log: Vec<(Address, Selector)>,
    sent: Vec<SentTx>,
    send_attempts: u32,
    send_failures: VecDeque<RpcError>,
    receipts: HashMap<H256, TxOutcome>,
    revert_next: bool,
    mined_nonce: u64,
    busy_polls: u32,
    busy_polls_seen: u32,
    block: u64,
}

impl MockState {
    pub fn respond(&mut self, to: Address, signature: &str, tokens: Vec<Token>) {
        let key = (to, selector(signature));
        self.reverts.remove(&key);
        self.responses
            .insert(key, Bytes::from(ethers::abi::encode(&tokens)));
    }

    pub fn set_balance(&mut self, token: Address, owner: Address, amount: U256) {
        self.balances.insert((token, owner), amount);
    }

    pub fn balance(&self, token: Address, owner: Address) -> U256 {
        self.balances
            .get(&(token, owner))
            .copied()
            .unwrap_or_default()
    }

    /// Mark the transaction currently being mined as reverted.
    pub fn revert_current(&mut self) {
        self.revert_next = true;
    }
}

pub(crate) fn selector(signature: &str) -> Selector {
    id(signature)
}

pub(crate) struct MockChain {
    signer: Address,
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            signer: Self::addr(0xAA),
            state: Mutex::new(MockState {
                block: 100,
                ..MockState::default()
            }),
        }
    }

    pub fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().expect("mock state poisoned");
        f(&mut state)
    }

    /// Apply `f` to the state directly, as a test arranging a scene would.
    pub fn edit(&self, f: impl FnOnce(&mut MockState)) {
        self.with(f);
    }

    pub fn deploy(&self, address: Address) {
        self.with(|s| {
            s.code.insert(address);
        });
    }

    pub fn respond(&self, to: Address, signature: &str, tokens: Vec<Token>) {
        self.deploy(to);
        self.with(|s| s.respond(to, signature, tokens));
    }

    pub fn revert(&self, to: Address, signature: &str, data: Option<Bytes>) {
        self.deploy(to);
        self.with(|s| {
            let key = (to, selector(signature));
            s.responses.remove(&key);
            s.reverts.insert(key, data);
        });
    }

    pub fn fail_calls(&self, to: Address, signature: &str, count: usize, err: RpcError) {
        self.with(|s| {
            let queue = s.call_failures.entry((to, selector(signature))).or_default();
            for _ in 0..count {
                queue.push_back(err.clone());
            }
        });
    }

    pub fn add_token(&self, token: Address, symbol: &str, decimals: u8) {
        self.deploy(token);
        self.with(|s| {
            s.tokens.insert(token, (symbol.to_string(), decimals));
        });
    }

    pub fn set_balance(&self, token: Address, owner: Address, amount: U256) {
        self.with(|s| s.set_balance(token, owner, amount));
    }

    pub fn balance(&self, token: Address, owner: Address) -> U256 {
        self.with(|s| s.balance(token, owner))
    }

    pub fn set_allowance(&self, token: Address, owner: Address, spender: Address, amount: U256) {
        self.with(|s| {
            s.allowances.insert((token, owner, spender), amount);
        });
    }

    pub fn on_send(
        &self,
        to: Address,
        signature: &str,
        effect: impl Fn(&mut MockState) + Send + Sync + 'static,
    ) {
        self.deploy(to);
        self.with(|s| {
            s.effects.insert((to, selector(signature)), Box::new(effect));
        });
    }

    pub fn lag_nonce(&self, polls: u32) {
        self.with(|s| s.busy_polls = polls);
    }

    pub fn fail_next_send(&self, err: RpcError) {
        self.with(|s| s.send_failures.push_back(err));
    }

    pub fn revert_next_receipt(&self) {
        self.with(|s| s.revert_next = true);
    }

    pub fn sent(&self) -> Vec<SentTx> {
        self.with(|s| s.sent.clone())
    }

    pub fn sent_to(&self, to: Address, signature: &str) -> usize {
        let sel = selector(signature);
        self.with(|s| {
            s.sent
                .iter()
                .filter(|tx| tx.to == to && tx.data.len() >= 4 && tx.data[..4] == sel)
                .count()
        })
    }

    pub fn send_attempts(&self) -> u32 {
        self.with(|s| s.send_attempts)
    }

    pub fn nonce_polls_while_busy(&self) -> u32 {
        self.with(|s| s.busy_polls_seen)
    }

    pub fn call_log(&self) -> Vec<(Address, Selector)> {
        self.with(|s| s.call_log.clone())
    }

    fn erc20_call(state: &MockState, to: Address, data: &[u8]) -> Option<Bytes> {
        let (symbol, decimals) = state.tokens.get(&to)?.clone();
        let sel: Selector = data.get(..4)?.try_into().ok()?;
        let encoded = if sel == SymbolCall::selector() {
            symbol.encode()
        } else if sel == DecimalsCall::selector() {
            decimals.encode()
        } else if sel == BalanceOfCall::selector() {
            let call = BalanceOfCall::decode(data).ok()?;
            state.balance(to, call.account).encode()
        } else if sel == AllowanceCall::selector() {
            let call = AllowanceCall::decode(data).ok()?;
            state
                .allowances
                .get(&(to, call.owner, call.spender))
                .copied()
                .unwrap_or_default()
                .encode()
        } else {
            return None;
        };
        Some(Bytes::from(encoded))
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn signer(&self) -> Address {
        self.signer
    }

    async fn code_at(&self, address: Address) -> Result<Bytes, RpcError> {
        Ok(self.with(|s| {
            if s.code.contains(&address) {
                Bytes::from(vec![0x60, 0x80, 0x60, 0x40])
            } else {
                Bytes::default()
            }
        }))
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.with(|s| {
            let sel: Selector = match data.get(..4).and_then(|b| b.try_into().ok()) {
                Some(sel) => sel,
                None => return Ok(Bytes::default()),
            };
            s.call_log.push((to, sel));
            if let Some(err) = s.call_failures.get_mut(&(to, sel)).and_then(|q| q.pop_front()) {
                return Err(err);
            }
            if !s.code.contains(&to) {
                return Ok(Bytes::default());
            }
            if let Some(out) = Self::erc20_call(s, to, &data) {
                return Ok(out);
            }
            if let Some(data) = s.reverts.get(&(to, sel)) {
                return Err(RpcError::Reverted {
                    message: "execution reverted".into(),
                    data: data.clone(),
                });
            }
            match s.responses.get(&(to, sel)) {
                Some(out) => Ok(out.clone()),
                None => Err(RpcError::Reverted {
                    message: "execution reverted".into(),
                    data: None,
                }),
            }
        })
    }

    async fn send(&self, to: Address, data: Bytes) -> Result<H256, RpcError> {
        let owner = self.signer;
        self.with(|s| {
            s.send_attempts += 1;
            if let Some(err) = s.send_failures.pop_front() {
                return Err(err);
            }
            let sel: Option<Selector> = data.get(..4).and_then(|b| b.try_into().ok());

            if s.tokens.contains_key(&to) && sel == Some(ApproveCall::selector()) {
                if let Ok(call) = ApproveCall::decode(&data) {
                    s.allowances.insert((to, owner, call.spender), call.amount);
                }
            }
            if let Some(sel) = sel {
                if let Some(effect) = s.effects.remove(&(to, sel)) {
                    effect(s);
                    s.effects.insert((to, sel), effect);
                }
            }

            s.sent.push(SentTx {
                to,
                data: data.clone(),
                pending_at_send: s.busy_polls,
            });
            s.mined_nonce += 1;
            s.block += 1;
            let tx_hash = H256::from_low_u64_be(s.mined_nonce);
            let success = !std::mem::take(&mut s.revert_next);
            s.receipts.insert(
                tx_hash,
                TxOutcome {
                    tx_hash,
                    block_number: s.block,
                    success,
                },
            );
            Ok(tx_hash)
        })
    }

    async fn receipt(&self, tx_hash: H256) -> Result<Option<TxOutcome>, RpcError> {
        Ok(self.with(|s| s.receipts.get(&tx_hash).copied()))
    }

    async fn transaction_count(&self, _account: Address, tag: NonceTag) -> Result<U256, RpcError> {
        Ok(self.with(|s| match tag {
            NonceTag::Latest => U256::from(s.mined_nonce),
            NonceTag::Pending if s.busy_polls > 0 => {
                s.busy_polls -= 1;
                s.busy_polls_seen += 1;
                U256::from(s.mined_nonce + 1)
            }
            NonceTag::Pending => U256::from(s.mined_nonce),
        }))
    }

    async fn latest_timestamp(&self) -> Result<u64, RpcError> {
        Ok(1_700_000_000)
    }
}
