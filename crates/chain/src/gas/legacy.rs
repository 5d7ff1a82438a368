//! Legacy gas pricing strategy (pre-EIP-1559).
//!
//! Used for chains and nodes where type-0 transactions are the norm.

use super::{GasParams, GasStrategy};
use crate::error::ChainError;
use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Legacy gas pricing strategy.
///
/// Uses a single `gas_price` field. The last fetched price is cached so a
/// failed fetch can fall back to it.
#[derive(Debug)]
pub struct LegacyGasStrategy {
    /// Fallback gas price in wei.
    default_gas_price: u128,
    /// Cap for fetched gas prices in wei.
    max_gas_price: u128,
    cached_gas_price: AtomicU64,
}

impl LegacyGasStrategy {
    pub fn new(default_gas_price: u128, max_gas_price: u128) -> Self {
        Self {
            default_gas_price,
            max_gas_price,
            cached_gas_price: AtomicU64::new(default_gas_price as u64),
        }
    }

    pub fn cached_gas_price(&self) -> u128 {
        self.cached_gas_price.load(Ordering::Relaxed) as u128
    }

    pub fn update_cache(&self, gas_price: u128) {
        let capped = gas_price.min(self.max_gas_price);
        self.cached_gas_price.store(capped as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl GasStrategy for LegacyGasStrategy {
    async fn fetch_params(&self, rpc_url: &str) -> Result<GasParams, ChainError> {
        use alloy::providers::{Provider, ProviderBuilder};

        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::InvalidConfig(format!("bad RPC url: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);

        let gas_price = match provider.get_gas_price().await {
            Ok(price) => price,
            Err(e) => {
                let fallback = self.cached_gas_price().max(self.default_gas_price);
                warn!(error = %e, fallback_wei = fallback, "eth_gasPrice failed, using cached price");
                fallback
            }
        };

        let capped_price = gas_price.min(self.max_gas_price);
        self.update_cache(capped_price);

        Ok(GasParams::Legacy {
            gas_price: capped_price,
        })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Legacy { gas_price } => {
                tx.set_gas_price(*gas_price);
            }
            GasParams::Eip1559 {
                max_fee_per_gas, ..
            } => {
                tx.set_gas_price(*max_fee_per_gas);
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "Legacy"
    }
}
