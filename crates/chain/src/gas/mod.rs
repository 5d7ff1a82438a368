//! Gas strategy abstraction.
//!
//! Supports Legacy and EIP-1559 pricing. Strategies fetch fresh parameters
//! for first submission; [`GasParams::escalate`] derives replacement fees
//! for a stuck transaction.
//!
//! # Example
//!
//! ```rust,ignore
//! use keeper_chain::gas::{GasStrategy, LegacyGasStrategy, Eip1559GasStrategy};
//!
//! // Polygon-style legacy pricing
//! let legacy = LegacyGasStrategy::new(30_000_000_000, 500_000_000_000);
//!
//! // Base fee + tip
//! let eip1559 = Eip1559GasStrategy::new(30_000_000_000, 2.0);
//! ```

mod eip1559;
mod legacy;

pub use eip1559::Eip1559GasStrategy;
pub use legacy::LegacyGasStrategy;

use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::fmt::Debug;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ChainError;
use crate::retry::with_timeout;

/// Gas parameters fetched from the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GasParams {
    /// Legacy gas pricing (pre-EIP-1559).
    Legacy {
        /// Gas price in wei.
        gas_price: u128,
    },
    /// EIP-1559 gas pricing.
    Eip1559 {
        /// Maximum fee per gas in wei.
        max_fee_per_gas: u128,
        /// Maximum priority fee per gas in wei.
        max_priority_fee_per_gas: u128,
        /// Base fee seen when the parameters were built.
        base_fee: u128,
    },
}

impl GasParams {
    /// Get the effective gas price for estimation purposes.
    pub fn effective_gas_price(&self) -> u128 {
        match self {
            GasParams::Legacy { gas_price } => *gas_price,
            GasParams::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }

    /// Fees for a same-nonce replacement.
    ///
    /// The new price is `max(2 * last, network * multiplier)`, so it never
    /// decreases across successive replacements.
    pub fn escalate(&self, network_gas_price: u128, multiplier: f64) -> GasParams {
        let scaled = scale(network_gas_price, multiplier);
        match self {
            GasParams::Legacy { gas_price } => GasParams::Legacy {
                gas_price: gas_price.saturating_mul(2).max(scaled),
            },
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                base_fee,
            } => {
                let max_fee = max_fee_per_gas.saturating_mul(2).max(scaled);
                GasParams::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: max_priority_fee_per_gas
                        .saturating_mul(2)
                        .min(max_fee),
                    base_fee: *base_fee,
                }
            }
        }
    }

    pub fn gwei(&self) -> f64 {
        self.effective_gas_price() as f64 / 1e9
    }
}

fn scale(wei: u128, multiplier: f64) -> u128 {
    let scaled = wei as f64 * multiplier.max(0.0);
    if scaled >= u128::MAX as f64 {
        u128::MAX
    } else {
        scaled as u128
    }
}

/// Trait for gas pricing strategies.
///
/// Implementations fetch gas prices from the chain and apply them to
/// transaction requests.
#[async_trait]
pub trait GasStrategy: Send + Sync + Debug {
    /// Fetch current gas parameters from the given RPC URL.
    async fn fetch_params(&self, rpc_url: &str) -> Result<GasParams, ChainError>;

    /// Apply gas parameters to a transaction request in place.
    fn apply_gas(&self, tx: &mut TransactionRequest, params: &GasParams);

    /// Get the strategy name for logging/debugging.
    fn strategy_name(&self) -> &'static str;
}

/// Fetch fresh parameters under `limit` and store them in `cache`.
///
/// A failed or timed-out fetch falls back to the cached parameters; with an
/// empty cache the error is returned.
pub async fn fetch_or_cached(
    strategy: &dyn GasStrategy,
    rpc_url: &str,
    limit: Duration,
    cache: &RwLock<Option<GasParams>>,
) -> Result<GasParams, ChainError> {
    match with_timeout("eth_gasPrice", limit, strategy.fetch_params(rpc_url)).await {
        Ok(params) => {
            debug!(
                gas_gwei = params.gwei(),
                strategy = strategy.strategy_name(),
                "Gas params updated"
            );
            *cache.write() = Some(params.clone());
            Ok(params)
        }
        Err(e) => match cache.read().clone() {
            Some(params) => {
                warn!(error = %e, "Gas fetch failed, using cached params");
                Ok(params)
            }
            None => Err(e),
        },
    }
}

/// Create a gas strategy from configuration.
///
/// # Arguments
/// * `pricing_model` - "Legacy" or "Eip1559"
/// * `default_gas_price_gwei` - Default gas price in gwei (for Legacy)
/// * `max_gas_price_gwei` - Cap for freshly fetched prices, in gwei
/// * `priority_fee_gwei` - Priority fee in gwei (for EIP-1559)
pub fn create_gas_strategy(
    pricing_model: &str,
    default_gas_price_gwei: f64,
    max_gas_price_gwei: f64,
    priority_fee_gwei: Option<f64>,
) -> Box<dyn GasStrategy> {
    match pricing_model.to_lowercase().as_str() {
        "eip1559" | "eip-1559" => {
            let priority_fee = priority_fee_gwei.unwrap_or(30.0);
            Box::new(
                Eip1559GasStrategy::new((priority_fee * 1e9) as u128, 2.0)
                    .with_max_fee_cap((max_gas_price_gwei * 1e9) as u128),
            )
        }
        _ => Box::new(LegacyGasStrategy::new(
            (default_gas_price_gwei * 1e9) as u128,
            (max_gas_price_gwei * 1e9) as u128,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Node that accepts the request and never answers.
    #[derive(Debug)]
    struct SilentNode;

    #[async_trait]
    impl GasStrategy for SilentNode {
        async fn fetch_params(&self, _rpc_url: &str) -> Result<GasParams, ChainError> {
            std::future::pending().await
        }

        fn apply_gas(&self, _tx: &mut TransactionRequest, _params: &GasParams) {}

        fn strategy_name(&self) -> &'static str {
            "Silent"
        }
    }

    #[derive(Debug)]
    struct FixedGas(u128);

    #[async_trait]
    impl GasStrategy for FixedGas {
        async fn fetch_params(&self, _rpc_url: &str) -> Result<GasParams, ChainError> {
            Ok(GasParams::Legacy { gas_price: self.0 })
        }

        fn apply_gas(&self, _tx: &mut TransactionRequest, _params: &GasParams) {}

        fn strategy_name(&self) -> &'static str {
            "Fixed"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_node_times_out_without_cache() {
        let cache = RwLock::new(None);
        let result = fetch_or_cached(&SilentNode, "http://localhost:8545", Duration::from_secs(5), &cache).await;

        assert!(matches!(
            result,
            Err(ChainError::Timeout {
                operation: "eth_gasPrice",
                elapsed_ms: 5_000
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_node_falls_back_to_cache() {
        let cache = RwLock::new(None);
        let fresh = fetch_or_cached(&FixedGas(7), "http://localhost:8545", Duration::from_secs(5), &cache)
            .await
            .unwrap();
        assert_eq!(fresh, GasParams::Legacy { gas_price: 7 });
        assert_eq!(*cache.read(), Some(GasParams::Legacy { gas_price: 7 }));

        let fallback = fetch_or_cached(&SilentNode, "http://localhost:8545", Duration::from_secs(5), &cache)
            .await
            .unwrap();
        assert_eq!(fallback, GasParams::Legacy { gas_price: 7 });
    }

    #[test]
    fn test_gas_params_effective_price() {
        let legacy = GasParams::Legacy {
            gas_price: 1_000_000_000,
        };
        assert_eq!(legacy.effective_gas_price(), 1_000_000_000);

        let eip1559 = GasParams::Eip1559 {
            max_fee_per_gas: 50_000_000_000,
            max_priority_fee_per_gas: 2_000_000_000,
            base_fee: 30_000_000_000,
        };
        assert_eq!(eip1559.effective_gas_price(), 50_000_000_000);
    }

    #[test]
    fn test_escalate_doubles_when_network_is_calm() {
        let last = GasParams::Legacy {
            gas_price: 40_000_000_000,
        };
        let next = last.escalate(30_000_000_000, 1.5);
        assert_eq!(next.effective_gas_price(), 80_000_000_000);
    }

    #[test]
    fn test_escalate_follows_network_spike() {
        let last = GasParams::Legacy {
            gas_price: 40_000_000_000,
        };
        let next = last.escalate(200_000_000_000, 1.5);
        assert_eq!(next.effective_gas_price(), 300_000_000_000);
    }

    #[test]
    fn test_escalate_eip1559_keeps_tip_under_max_fee() {
        let last = GasParams::Eip1559 {
            max_fee_per_gas: 50_000_000_000,
            max_priority_fee_per_gas: 40_000_000_000,
            base_fee: 30_000_000_000,
        };
        match last.escalate(10_000_000_000, 1.0) {
            GasParams::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
                base_fee,
            } => {
                assert_eq!(max_fee_per_gas, 100_000_000_000);
                assert_eq!(max_priority_fee_per_gas, 80_000_000_000);
                assert_eq!(base_fee, 30_000_000_000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_escalation_is_monotonic() {
        let mut params = GasParams::Legacy { gas_price: 1 };
        let network = [5u128, 0, 100, 3, 1_000];
        for price in network {
            let next = params.escalate(price, 1.2);
            assert!(next.effective_gas_price() >= params.effective_gas_price());
            params = next;
        }
    }

    #[test]
    fn test_create_gas_strategy() {
        let legacy = create_gas_strategy("Legacy", 30.0, 500.0, None);
        assert_eq!(legacy.strategy_name(), "Legacy");

        let eip1559 = create_gas_strategy("Eip1559", 30.0, 500.0, Some(30.0));
        assert_eq!(eip1559.strategy_name(), "EIP-1559");

        // Unknown defaults to Legacy
        let unknown = create_gas_strategy("Unknown", 1.0, 10.0, None);
        assert_eq!(unknown.strategy_name(), "Legacy");
    }
}
