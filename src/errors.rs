use ethers::types::{Address, Bytes, H256, U256};
use thiserror::Error;

use crate::swap::SwapFailure;

pub type Result<T> = std::result::Result<T, AppError>;

/// Node-level failure, already translated out of the `ethers` provider types.
#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("rate limited (code {code}): {message}")]
    RateLimited { code: i64, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("execution reverted: {message}")]
    Reverted {
        message: String,
        data: Option<Bytes>,
    },

    #[error("rejected by node (code {code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("receipt for {0:?} not available yet")]
    ReceiptPending(H256),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] ethers::signers::WalletError),

    #[error("RPC error: {0}")]
    Rpc(#[from] RpcError),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("{label} failed after {attempts} attempts: {last}")]
    RetryExhausted {
        label: String,
        attempts: u32,
        #[source]
        last: Box<AppError>,
    },

    #[error("signer {account:?} still has pending transactions (pending nonce {pending}, mined {mined})")]
    NonceBusy {
        account: Address,
        pending: U256,
        mined: U256,
    },

    #[error("transaction {tx_hash:?} reverted on chain")]
    TxReverted { tx_hash: H256, block_number: u64 },

    #[error(transparent)]
    Swap(#[from] Box<SwapFailure>),

    #[error("no usable vaults out of {checked} configured")]
    NoUsableVaults { checked: usize },
}

impl From<ethers::abi::Error> for AppError {
    fn from(err: ethers::abi::Error) -> Self {
        AppError::Abi(err.to_string())
    }
}

impl From<ethers::abi::AbiError> for AppError {
    fn from(err: ethers::abi::AbiError) -> Self {
        AppError::Abi(err.to_string())
    }
}

impl AppError {
    /// The underlying node error, looking through retry wrappers.
    pub fn rpc(&self) -> Option<&RpcError> {
        match self {
            AppError::Rpc(err) => Some(err),
            AppError::RetryExhausted { last, .. } => last.rpc(),
            _ => None,
        }
    }

    /// True when the error is an on-chain revert (simulated or mined).
    pub fn is_revert(&self) -> bool {
        matches!(self.rpc(), Some(RpcError::Reverted { .. }))
            || matches!(self, AppError::TxReverted { .. })
    }

    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, AppError::RetryExhausted { .. })
    }
}
