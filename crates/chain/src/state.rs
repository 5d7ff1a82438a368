//! Typed strategy state and the read-only interface that produces it.

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;

use crate::error::ChainError;

/// On-chain fuse status of one pool token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FuseStatus {
    #[default]
    Disabled,
    Off,
    OnLowerLimit,
    OnUpperLimit,
}

impl FuseStatus {
    pub fn from_raw(raw: u64) -> Option<Self> {
        match raw {
            0 => Some(Self::Disabled),
            1 => Some(Self::Off),
            2 => Some(Self::OnLowerLimit),
            3 => Some(Self::OnUpperLimit),
            _ => None,
        }
    }

    /// Fuse has tripped on either price bound.
    pub fn is_triggered(self) -> bool {
        matches!(self, Self::OnLowerLimit | Self::OnUpperLimit)
    }
}

/// Position snapshot read fresh every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionState {
    pub token_a: Address,
    pub token_b: Address,
    pub fuse_status_a: FuseStatus,
    pub fuse_status_b: FuseStatus,
    pub need_rebalance: bool,
    /// Share of assets tied up as collateral/debt, 0..=100.
    pub locked_percent: u8,
    pub withdraw_done: bool,
    /// Unix seconds of the last no-swap rebalance.
    pub last_rebalance_no_swap: u64,
    /// Zero means the position is empty.
    pub total_assets: U256,
}

impl PositionState {
    pub fn fuse_triggered(&self) -> bool {
        self.fuse_status_a.is_triggered() || self.fuse_status_b.is_triggered()
    }

    /// The other token of the pair.
    pub fn counterpart(&self, token: Address) -> Address {
        if token == self.token_a {
            self.token_b
        } else {
            self.token_a
        }
    }
}

/// Per-strategy debt-reduction thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebalanceConfig {
    pub locked_percent_for_delayed_rebalance: u8,
    pub locked_percent_for_forced_rebalance: u8,
    pub rebalance_debt_delay_secs: u64,
}

/// Locked share of total assets as a whole percent, clamped to 100.
pub fn locked_percent(locked: U256, total: U256) -> u8 {
    if total.is_zero() {
        return 0;
    }
    let pct = locked.saturating_mul(U256::from(100u64)) / total;
    if pct >= U256::from(100u64) {
        100
    } else {
        pct.to::<u8>()
    }
}

/// Saturating conversion of an ABI word to `u64`.
pub fn word_to_u64(word: U256) -> u64 {
    if word > U256::from(u64::MAX) {
        u64::MAX
    } else {
        word.to::<u64>()
    }
}

/// Read-only queries against strategies and their vaults.
///
/// All calls are idempotent. Implementations retry transient failures
/// before returning an error.
#[async_trait]
pub trait StateReader: Send + Sync {
    async fn read_position_state(&self, strategy: Address) -> Result<PositionState, ChainError>;

    async fn read_config(&self, strategy: Address) -> Result<RebalanceConfig, ChainError>;

    /// `(tokenToSwap, amountToSwap)` for the next unwind step of `plan_entry_data`.
    async fn quote_withdraw(
        &self,
        strategy: Address,
        plan_entry_data: Bytes,
    ) -> Result<(Address, U256), ChainError>;

    /// Splitter of a vault, or `None` when nothing is deployed at `vault`.
    async fn splitter_of(&self, vault: Address) -> Result<Option<Address>, ChainError>;

    async fn strategies_of(&self, splitter: Address) -> Result<Vec<Address>, ChainError>;

    async fn is_paused(&self, splitter: Address, strategy: Address) -> Result<bool, ChainError>;
}
