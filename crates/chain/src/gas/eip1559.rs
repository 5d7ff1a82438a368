//! EIP-1559 gas pricing strategy.
//!
//! Base fee plus priority tip, with `max_fee` derived from the latest base
//! fee and a configurable multiplier.

use super::{GasParams, GasStrategy};
use crate::error::ChainError;
use alloy::network::TransactionBuilder;
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// EIP-1559 gas pricing strategy.
#[derive(Debug)]
pub struct Eip1559GasStrategy {
    /// Default priority fee (tip) in wei.
    default_priority_fee: u128,
    /// Multiplier for max_fee relative to base_fee (e.g., 2.0 = survives ~6 full blocks).
    max_fee_multiplier: f64,
    /// Cap for fetched max_fee_per_gas in wei.
    max_fee_cap: u128,
    cached_base_fee: AtomicU64,
}

impl Eip1559GasStrategy {
    pub fn new(default_priority_fee: u128, max_fee_multiplier: f64) -> Self {
        Self {
            default_priority_fee,
            max_fee_multiplier,
            max_fee_cap: 500_000_000_000, // 500 gwei default cap
            cached_base_fee: AtomicU64::new(30_000_000_000),
        }
    }

    pub fn with_max_fee_cap(mut self, cap: u128) -> Self {
        self.max_fee_cap = cap;
        self
    }

    pub fn cached_base_fee(&self) -> u128 {
        self.cached_base_fee.load(Ordering::Relaxed) as u128
    }

    fn calculate_max_fee(&self, base_fee: u128, priority_fee: u128) -> u128 {
        let max_fee = ((base_fee as f64) * self.max_fee_multiplier) as u128 + priority_fee;
        max_fee.min(self.max_fee_cap)
    }
}

#[async_trait]
impl GasStrategy for Eip1559GasStrategy {
    async fn fetch_params(&self, rpc_url: &str) -> Result<GasParams, ChainError> {
        use alloy::providers::{Provider, ProviderBuilder};

        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::InvalidConfig(format!("bad RPC url: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url);

        let block = provider
            .get_block_by_number(alloy::eips::BlockNumberOrTag::Latest)
            .await?
            .ok_or_else(|| ChainError::RpcFatal("latest block not returned".into()))?;

        let base_fee = block
            .header
            .base_fee_per_gas
            .map(|b| b as u128)
            .unwrap_or_else(|| self.cached_base_fee());
        self.cached_base_fee.store(base_fee as u64, Ordering::Relaxed);

        let priority_fee = match provider.get_max_priority_fee_per_gas().await {
            Ok(fee) => fee.max(self.default_priority_fee),
            Err(e) => {
                warn!(error = %e, "eth_maxPriorityFeePerGas failed, using default tip");
                self.default_priority_fee
            }
        };

        let max_fee_per_gas = self.calculate_max_fee(base_fee, priority_fee);

        Ok(GasParams::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas: priority_fee.min(max_fee_per_gas),
            base_fee,
        })
    }

    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams) {
        match params {
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                ..
            } => {
                tx.set_max_fee_per_gas(*max_fee_per_gas);
                tx.set_max_priority_fee_per_gas(*max_priority_fee_per_gas);
            }
            GasParams::Legacy { gas_price } => {
                tx.set_max_fee_per_gas(*gas_price);
                tx.set_max_priority_fee_per_gas(self.default_priority_fee.min(*gas_price));
            }
        }
    }

    fn strategy_name(&self) -> &'static str {
        "EIP-1559"
    }
}
