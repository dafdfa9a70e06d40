use crate::chain::abi::{AllowanceCall, ApproveCall};
use crate::chain::{Rpc, TxLane};
use crate::errors::Result;
use ethers::abi::AbiEncode;
use ethers::types::{Address, H256, U256};
use tracing::{debug, info};

const MAX_APPROVE_AMOUNT: U256 = U256::MAX;

/// Make sure `spender` may pull at least `amount` of `token` from the signer.
///
/// Approves the maximum amount when the current allowance is short and
/// returns the approval hash; returns `None` when nothing had to be sent.
pub async fn ensure_allowance(
    rpc: &Rpc,
    lane: &TxLane,
    token: Address,
    spender: Address,
    amount: U256,
) -> Result<Option<H256>> {
    let owner = rpc.signer();
    let current: U256 = rpc
        .call_decode("allowance", token, AllowanceCall { owner, spender }.encode())
        .await?;
    if current >= amount {
        debug!(?token, ?spender, %current, "[SWAP] allowance sufficient");
        return Ok(None);
    }

    let calldata = ApproveCall {
        spender,
        amount: MAX_APPROVE_AMOUNT,
    }
    .encode();
    let outcome = lane.submit("approve", token, calldata.into()).await?;
    info!(?token, ?spender, tx = ?outcome.tx_hash, "[SWAP] approval mined");
    Ok(Some(outcome.tx_hash))
}
