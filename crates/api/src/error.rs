//! Error type for quote providers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QuoteError {
    /// Transport failure or non-success HTTP status.
    #[error("{provider}: request failed: {reason}")]
    Provider {
        provider: &'static str,
        reason: String,
    },

    #[error("{provider}: timed out after {timeout_ms}ms")]
    Timeout {
        provider: &'static str,
        timeout_ms: u128,
    },

    /// Response did not carry a usable target, calldata and output amount.
    #[error("{provider}: malformed response: {reason}")]
    MalformedResponse {
        provider: &'static str,
        reason: String,
    },

    #[error("all {attempted} aggregators failed: {}", .reasons.join("; "))]
    AllAggregatorsFailed {
        attempted: usize,
        reasons: Vec<String>,
    },
}

impl QuoteError {
    pub(crate) fn provider(provider: &'static str, reason: impl ToString) -> Self {
        Self::Provider {
            provider,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn malformed(provider: &'static str, reason: impl ToString) -> Self {
        Self::MalformedResponse {
            provider,
            reason: reason.to_string(),
        }
    }
}
