//! Error type for chain reads and transaction delivery.

use alloy::primitives::B256;
use alloy::transports::{RpcError, TransportError};
use thiserror::Error;

/// Errors raised while talking to the chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Connection reset, refused or dropped mid-request.
    #[error("transient RPC failure: {0}")]
    RpcTransient(String),

    /// Malformed response, node-side error or contract revert on a read.
    #[error("RPC failure: {0}")]
    RpcFatal(String),

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {elapsed_ms}ms")]
    Timeout {
        operation: &'static str,
        elapsed_ms: u128,
    },

    /// A mined receipt reported failure status.
    #[error("transaction {hash} reverted (block {block:?})")]
    TransactionRevert { hash: B256, block: Option<u64> },

    /// Rebroadcast was rejected and the stuck nonce was handed to drop-pending.
    #[error("escalation failed for nonce {nonce}: {reason} (nonce cleared: {nonce_cleared})")]
    EscalationFailure {
        nonce: u64,
        reason: String,
        nonce_cleared: bool,
    },

    /// Key material could not be parsed or used.
    #[error("signer error: {0}")]
    Signer(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ChainError {
    /// Whether the failed call may succeed if repeated unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RpcTransient(_) | Self::Timeout { .. })
    }
}

impl From<TransportError> for ChainError {
    fn from(err: TransportError) -> Self {
        match err {
            RpcError::Transport(kind) => Self::RpcTransient(kind.to_string()),
            other => Self::RpcFatal(other.to_string()),
        }
    }
}

impl From<alloy::contract::Error> for ChainError {
    fn from(err: alloy::contract::Error) -> Self {
        match err {
            alloy::contract::Error::TransportError(inner) => inner.into(),
            other => Self::RpcFatal(other.to_string()),
        }
    }
}
