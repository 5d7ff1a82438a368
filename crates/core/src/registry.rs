//! Vault registry and per-cycle strategy discovery.

use alloy::primitives::Address;
use keeper_chain::{ChainError, EventTable, StateReader};
use tracing::{debug, warn};

use crate::config::VaultEntry;

/// One strategy to process this cycle.
#[derive(Debug, Clone)]
pub struct StrategyTarget {
    pub vault_name: String,
    pub vault: Address,
    /// `None` when the vault has no code; pause state is then unknown.
    pub splitter: Option<Address>,
    pub strategy: Address,
    /// Decoder table for the vault's platform.
    pub events: EventTable,
}

/// Configured vaults, in processing order.
#[derive(Debug, Clone, Default)]
pub struct VaultRegistry {
    vaults: Vec<VaultEntry>,
}

impl VaultRegistry {
    pub fn new(vaults: Vec<VaultEntry>) -> Self {
        Self { vaults }
    }

    pub fn vaults(&self) -> &[VaultEntry] {
        &self.vaults
    }

    pub fn len(&self) -> usize {
        self.vaults.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vaults.is_empty()
    }

    /// Strategies under `entry`: the splitter's list followed by any
    /// configured extras it does not already contain.
    pub async fn discover(
        &self,
        entry: &VaultEntry,
        reader: &dyn StateReader,
    ) -> Result<Vec<StrategyTarget>, ChainError> {
        let splitter = reader.splitter_of(entry.address).await?;

        let mut strategies = match splitter {
            Some(splitter) => reader.strategies_of(splitter).await?,
            None => {
                warn!(vault = %entry.name, address = %entry.address, "No contract deployed at vault address");
                Vec::new()
            }
        };
        for extra in &entry.strategies {
            if !strategies.contains(extra) {
                strategies.push(*extra);
            }
        }

        debug!(
            vault = %entry.name,
            splitter = ?splitter,
            strategies = strategies.len(),
            "Strategies discovered"
        );

        let events = EventTable::for_platform(entry.platform);
        Ok(strategies
            .into_iter()
            .map(|strategy| StrategyTarget {
                vault_name: entry.name.clone(),
                vault: entry.address,
                splitter,
                strategy,
                events,
            })
            .collect())
    }
}
