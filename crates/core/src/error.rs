//! Error type for one strategy cycle.

use keeper_api::QuoteError;
use keeper_chain::ChainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeeperError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Quote(#[from] QuoteError),
}

impl KeeperError {
    /// Needs an operator: the intended transaction was abandoned.
    pub fn is_escalation_failure(&self) -> bool {
        matches!(self, Self::Chain(ChainError::EscalationFailure { .. }))
    }

    pub fn is_revert(&self) -> bool {
        matches!(self, Self::Chain(ChainError::TransactionRevert { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::B256;

    #[test]
    fn test_classification() {
        let revert: KeeperError = ChainError::TransactionRevert {
            hash: B256::ZERO,
            block: Some(1),
        }
        .into();
        assert!(revert.is_revert());
        assert!(!revert.is_escalation_failure());

        let stuck: KeeperError = ChainError::EscalationFailure {
            nonce: 7,
            reason: "replacement underpriced".into(),
            nonce_cleared: false,
        }
        .into();
        assert!(stuck.is_escalation_failure());

        let quotes: KeeperError = QuoteError::AllAggregatorsFailed {
            attempted: 3,
            reasons: vec![],
        }
        .into();
        assert!(quotes.to_string().starts_with("all 3 aggregators failed"));
    }
}
