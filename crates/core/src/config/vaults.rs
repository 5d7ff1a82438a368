//! Vault registry entries.

use alloy::primitives::Address;
use keeper_chain::PlatformVariant;
use serde::{Deserialize, Serialize};

/// One vault the keeper serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultEntry {
    /// Human-readable name used in logs and alerts
    pub name: String,
    pub address: Address,
    /// Selects the event-decoder table for this vault's strategies
    #[serde(default)]
    pub platform: PlatformVariant,
    /// Strategies served in addition to the ones discovered on-chain
    #[serde(default)]
    pub strategies: Vec<Address>,
}

impl VaultEntry {
    pub fn new(name: impl Into<String>, address: Address, platform: PlatformVariant) -> Self {
        Self {
            name: name.into(),
            address,
            platform,
            strategies: Vec::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Address) -> Self {
        self.strategies.push(strategy);
        self
    }
}
