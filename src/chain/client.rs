use super::{ChainClient, NonceTag, TxOutcome};
use crate::errors::{Result, RpcError};
use async_trait::async_trait;
use ethers::{
    middleware::{SignerMiddleware, signer::SignerMiddlewareError},
    providers::{Http, JsonRpcError, Middleware, Provider, ProviderError, RpcError as _},
    signers::{LocalWallet, Signer},
    types::{
        Address, BlockNumber, Bytes, H256, TransactionRequest, U256,
        transaction::eip2718::TypedTransaction,
    },
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// JSON-RPC codes providers use for throttling.
const RATE_LIMIT_CODES: [i64; 3] = [429, -32005, -32029];
/// Code geth-style nodes attach to `execution reverted` with revert data.
const REVERT_CODE: i64 = 3;

/// [`ChainClient`] over an `ethers` HTTP provider with a local signing key.
#[derive(Clone)]
pub struct EthersChain {
    client: Arc<SignerClient>,
}

impl EthersChain {
    pub async fn connect(rpc_url: &str, private_key: &str, chain_id: Option<u64>) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)?;
        let chain_id = match chain_id {
            Some(id) => id,
            None => provider
                .get_chainid()
                .await
                .map_err(RpcError::from)?
                .as_u64(),
        };
        let wallet = private_key.trim().parse::<LocalWallet>()?.with_chain_id(chain_id);
        info!(chain_id, signer = ?wallet.address(), "[INIT] chain client ready");
        Ok(Self {
            client: Arc::new(SignerMiddleware::new(provider, wallet)),
        })
    }

    fn request(&self, to: Address, data: Bytes) -> TransactionRequest {
        TransactionRequest::new()
            .from(self.signer())
            .to(to)
            .data(data)
    }
}

#[async_trait]
impl ChainClient for EthersChain {
    fn signer(&self) -> Address {
        self.client.address()
    }

    async fn code_at(&self, address: Address) -> std::result::Result<Bytes, RpcError> {
        Ok(self.client.inner().get_code(address, None).await?)
    }

    async fn call(&self, to: Address, data: Bytes) -> std::result::Result<Bytes, RpcError> {
        let tx: TypedTransaction = self.request(to, data).into();
        Ok(self.client.inner().call(&tx, None).await?)
    }

    async fn send(&self, to: Address, data: Bytes) -> std::result::Result<H256, RpcError> {
        let pending = self
            .client
            .send_transaction(self.request(to, data), None)
            .await
            .map_err(from_signer_error)?;
        Ok(pending.tx_hash())
    }

    async fn receipt(&self, tx_hash: H256) -> std::result::Result<Option<TxOutcome>, RpcError> {
        let receipt = self.client.inner().get_transaction_receipt(tx_hash).await?;
        Ok(receipt.map(|r| TxOutcome {
            tx_hash,
            block_number: r.block_number.map(|b| b.as_u64()).unwrap_or_default(),
            success: r.status.map(|s| s.as_u64() == 1).unwrap_or(false),
        }))
    }

    async fn transaction_count(
        &self,
        account: Address,
        tag: NonceTag,
    ) -> std::result::Result<U256, RpcError> {
        let block = match tag {
            NonceTag::Pending => BlockNumber::Pending,
            NonceTag::Latest => BlockNumber::Latest,
        };
        Ok(self
            .client
            .inner()
            .get_transaction_count(account, Some(block.into()))
            .await?)
    }

    async fn latest_timestamp(&self) -> std::result::Result<u64, RpcError> {
        let block = self.client.inner().get_block(BlockNumber::Latest).await?;
        block
            .map(|b| b.timestamp.as_u64())
            .ok_or_else(|| RpcError::Decode("latest block missing".into()))
    }
}

impl From<ProviderError> for RpcError {
    fn from(err: ProviderError) -> Self {
        if let Some(resp) = err.as_error_response() {
            return from_json_rpc(resp);
        }
        match err {
            // Gateways in front of flaky nodes answer with HTML or empty bodies
            // on 429/502; the client reports those as serde failures.
            ProviderError::JsonRpcClientError(inner) if inner.as_serde_error().is_some() => {
                RpcError::Transport(format!("non JSON-RPC response: {inner}"))
            }
            ProviderError::JsonRpcClientError(inner) => RpcError::Transport(inner.to_string()),
            ProviderError::HTTPError(inner) => RpcError::Transport(inner.to_string()),
            ProviderError::SerdeJson(inner) => RpcError::Decode(inner.to_string()),
            other => RpcError::Rejected {
                code: 0,
                message: other.to_string(),
            },
        }
    }
}

fn from_json_rpc(resp: &JsonRpcError) -> RpcError {
    if RATE_LIMIT_CODES.contains(&resp.code) {
        return RpcError::RateLimited {
            code: resp.code,
            message: resp.message.clone(),
        };
    }
    let data = revert_data(resp);
    if resp.code == REVERT_CODE || data.is_some() {
        return RpcError::Reverted {
            message: resp.message.clone(),
            data,
        };
    }
    RpcError::Rejected {
        code: resp.code,
        message: resp.message.clone(),
    }
}

fn revert_data(resp: &JsonRpcError) -> Option<Bytes> {
    let raw = resp.data.as_ref()?.as_str()?;
    Bytes::from_str(raw).ok()
}

fn from_signer_error(err: SignerMiddlewareError<Provider<Http>, LocalWallet>) -> RpcError {
    match err {
        SignerMiddlewareError::MiddlewareError(inner) => inner.into(),
        other => RpcError::Rejected {
            code: 0,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_error(code: i64, data: Option<serde_json::Value>) -> JsonRpcError {
        JsonRpcError {
            code,
            message: "node said no".into(),
            data,
        }
    }

    #[test]
    fn throttling_codes_map_to_rate_limited() {
        for code in RATE_LIMIT_CODES {
            assert!(matches!(
                from_json_rpc(&rpc_error(code, None)),
                RpcError::RateLimited { .. }
            ));
        }
    }

    #[test]
    fn revert_payload_is_preserved() {
        let err = from_json_rpc(&rpc_error(
            3,
            Some(serde_json::Value::String("0x118cdaa7".into())),
        ));
        match err {
            RpcError::Reverted { data: Some(data), .. } => {
                assert_eq!(data.as_ref(), &[0x11, 0x8c, 0xda, 0xa7]);
            }
            other => panic!("expected revert, got {other:?}"),
        }
    }

    #[test]
    fn unknown_codes_are_rejections() {
        assert!(matches!(
            from_json_rpc(&rpc_error(-32000, None)),
            RpcError::Rejected { code: -32000, .. }
        ));
    }
}
