//! Error types for the bridge orchestrator

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::chain::ChainRole;

/// Error surfaced by a chain endpoint.
///
/// Clients never retry on their own; the variant tells the caller whether a
/// retry is sensible.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("transient RPC failure on {chain}: {message}")]
    Transient { chain: ChainRole, message: String },

    #[error("permanent chain error on {chain}: {message}")]
    Permanent { chain: ChainRole, message: String },
}

impl ChainError {
    pub fn transient(chain: ChainRole, message: impl Into<String>) -> Self {
        ChainError::Transient {
            chain,
            message: message.into(),
        }
    }

    pub fn permanent(chain: ChainRole, message: impl Into<String>) -> Self {
        ChainError::Permanent {
            chain,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transient { .. })
    }
}

/// Result type for chain client calls
pub type ChainResult<T> = Result<T, ChainError>;

/// Main error type for bridge operations
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    #[error("Insufficient balance of {token:?}: have {have}, need {need}")]
    InsufficientBalance {
        token: Option<Address>,
        have: U256,
        need: U256,
    },

    #[error("Insufficient allowance of {token:?} for spender {spender:?}: have {have}, need {need}")]
    InsufficientAllowance {
        token: Address,
        spender: Address,
        have: U256,
        need: U256,
    },

    #[error("Approval of {token:?} for {spender:?} failed: {reason}")]
    Allowance {
        token: Address,
        spender: Address,
        reason: String,
    },

    #[error("Fee estimation error: {0}")]
    FeeEstimation(String),

    #[error("Transient RPC error on {chain}: {message}")]
    TransientRpc { chain: ChainRole, message: String },

    #[error("Permanent chain error on {chain}: {message}")]
    PermanentChain { chain: ChainRole, message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Withdrawal {l2_tx_hash:?} is already finalized on L1")]
    AlreadyFinalized { l2_tx_hash: H256 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Nonce error for {address:?} on {chain}: {message}")]
    Nonce {
        chain: ChainRole,
        address: Address,
        message: String,
    },

    #[error("State store error: {0}")]
    Storage(String),

    #[error("Contract ABI error: {0}")]
    Contract(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Check if error is retryable
    ///
    /// Only transport failures qualify. Reverts, deadlines and cancellation
    /// are final for the step that produced them.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BridgeError::TransientRpc { .. })
    }

    /// Whether the operation should be left in its last known state instead
    /// of being moved to `Failed`.
    pub fn is_resumable(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }

    /// Discriminant reported in operation results
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            BridgeError::InsufficientAllowance { .. } => ErrorKind::InsufficientAllowance,
            BridgeError::Allowance { .. } => ErrorKind::AllowanceError,
            BridgeError::FeeEstimation(_) => ErrorKind::FeeEstimationError,
            BridgeError::TransientRpc { .. } => ErrorKind::TransientRpcError,
            BridgeError::PermanentChain { .. } => ErrorKind::PermanentChainError,
            BridgeError::Timeout { .. } => ErrorKind::TimeoutError,
            BridgeError::Cancelled => ErrorKind::Cancelled,
            BridgeError::AlreadyFinalized { .. } => ErrorKind::AlreadyFinalized,
            BridgeError::Config(_)
            | BridgeError::Wallet(_)
            | BridgeError::Nonce { .. }
            | BridgeError::Contract(_)
            | BridgeError::Storage(_)
            | BridgeError::InvalidStateTransition { .. }
            | BridgeError::InvalidOperation(_)
            | BridgeError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        BridgeError::Timeout {
            operation: operation.into(),
        }
    }
}

impl From<ChainError> for BridgeError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Transient { chain, message } => BridgeError::TransientRpc { chain, message },
            ChainError::Permanent { chain, message } => {
                BridgeError::PermanentChain { chain, message }
            }
        }
    }
}

impl From<ethers::abi::Error> for BridgeError {
    fn from(err: ethers::abi::Error) -> Self {
        BridgeError::Contract(err.to_string())
    }
}

impl From<ethers::contract::AbiError> for BridgeError {
    fn from(err: ethers::contract::AbiError) -> Self {
        BridgeError::Contract(err.to_string())
    }
}

/// Serializable error discriminant carried by operation results and snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InsufficientBalance,
    InsufficientAllowance,
    AllowanceError,
    FeeEstimationError,
    TransientRpcError,
    PermanentChainError,
    TimeoutError,
    Cancelled,
    AlreadyFinalized,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InsufficientBalance => "insufficient_balance",
            ErrorKind::InsufficientAllowance => "insufficient_allowance",
            ErrorKind::AllowanceError => "allowance_error",
            ErrorKind::FeeEstimationError => "fee_estimation_error",
            ErrorKind::TransientRpcError => "transient_rpc_error",
            ErrorKind::PermanentChainError => "permanent_chain_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::AlreadyFinalized => "already_finalized",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Classifies an RPC error message as transient or permanent
pub fn classify_rpc_error(chain: ChainRole, message: &str) -> ChainError {
    let lower = message.to_lowercase();

    let transient = lower.contains("timeout")
        || lower.contains("timed out")
        || lower.contains("connection")
        || lower.contains("network")
        || lower.contains("rate limit")
        || lower.contains("too many requests")
        || lower.contains("429")
        || lower.contains("502")
        || lower.contains("503")
        || lower.contains("504")
        || lower.contains("temporarily unavailable")
        || lower.contains("error sending request");

    if transient {
        ChainError::transient(chain, message)
    } else {
        ChainError::permanent(chain, message)
    }
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
