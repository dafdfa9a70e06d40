//! EVM node access.
//!
//! Everything above this module talks to the chain through [`ChainClient`],
//! reads through the retrying [`Rpc`] handle and writes through [`TxLane`].

use crate::errors::{AppError, Result, RpcError};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use ethers::abi::AbiDecode;
use ethers::types::{Address, Bytes, H256, U256};
use std::sync::Arc;

pub mod abi;
pub mod client;
pub mod lane;
#[cfg(test)]
pub(crate) mod mock;

pub use client::EthersChain;
pub use lane::{TxConfig, TxLane};

/// Block tag used when counting the signer's transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceTag {
    /// Includes transactions still sitting in the mempool.
    Pending,
    /// Mined transactions only.
    Latest,
}

/// Mined transaction summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_hash: H256,
    pub block_number: u64,
    pub success: bool,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Account that signs every transaction sent through this client.
    fn signer(&self) -> Address;

    async fn code_at(&self, address: Address) -> std::result::Result<Bytes, RpcError>;

    /// `eth_call` from the signer's address against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> std::result::Result<Bytes, RpcError>;

    /// Sign and broadcast; returns as soon as the node hands back a hash.
    async fn send(&self, to: Address, data: Bytes) -> std::result::Result<H256, RpcError>;

    async fn receipt(&self, tx_hash: H256) -> std::result::Result<Option<TxOutcome>, RpcError>;

    async fn transaction_count(
        &self,
        account: Address,
        tag: NonceTag,
    ) -> std::result::Result<U256, RpcError>;

    async fn latest_timestamp(&self) -> std::result::Result<u64, RpcError>;
}

/// Retrying read handle shared by the readers and the swap executor.
#[derive(Clone)]
pub struct Rpc {
    client: Arc<dyn ChainClient>,
    policy: RetryPolicy,
}

impl Rpc {
    pub fn new(client: Arc<dyn ChainClient>, policy: RetryPolicy) -> Self {
        Self { client, policy }
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn signer(&self) -> Address {
        self.client.signer()
    }

    pub async fn has_code(&self, address: Address) -> Result<bool> {
        let code = self
            .policy
            .read("eth_getCode", |_| async move {
                self.client.code_at(address).await.map_err(AppError::from)
            })
            .await?;
        Ok(!code.is_empty())
    }

    pub async fn call(&self, label: &str, to: Address, data: Bytes) -> Result<Bytes> {
        self.policy
            .read(label, |_| {
                let data = data.clone();
                async move { self.client.call(to, data).await.map_err(AppError::from) }
            })
            .await
    }

    /// Call and ABI-decode a single return value.
    pub async fn call_decode<T: AbiDecode>(
        &self,
        label: &str,
        to: Address,
        data: Vec<u8>,
    ) -> Result<T> {
        let raw = self.call(label, to, Bytes::from(data)).await?;
        T::decode(raw.as_ref()).map_err(|err| AppError::Rpc(RpcError::Decode(err.to_string())))
    }

    pub async fn transaction_count(&self, account: Address, tag: NonceTag) -> Result<U256> {
        self.policy
            .read("eth_getTransactionCount", |_| async move {
                self.client
                    .transaction_count(account, tag)
                    .await
                    .map_err(AppError::from)
            })
            .await
    }

    pub async fn latest_timestamp(&self) -> Result<u64> {
        self.policy
            .read("eth_getBlockByNumber", |_| async move {
                self.client.latest_timestamp().await.map_err(AppError::from)
            })
            .await
    }
}
