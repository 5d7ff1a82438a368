//! Keeper core logic.
//!
//! This crate provides the keeper's decision and orchestration layers:
//! - TOML configuration with built-in profiles and environment overrides
//! - Vault registry and per-cycle strategy discovery
//! - Debt-reduction decision engine (pure gates plus quote resolution)
//! - The keeper loop with rebalance cooldown, failure isolation and alerts
//!
//! Chain access lives in `keeper-chain`, aggregator quotes and alert sinks
//! in `keeper-api`.

pub mod config;
mod context;
mod decision;
mod error;
mod keeper;
mod registry;
#[cfg(test)]
mod testing;

pub use config::{
    AggregatorConfig, ContractsConfig, EnvConfig, EscalationSettings, GasConfig, GasPricingModel,
    KeeperConfig, LoopConfig, ProviderKind, RpcSettings, VaultEntry, DEFAULT_CONFIG_PATH,
};
pub use context::{CycleSummary, KeeperContext, StrategyOutcome};
pub use decision::{decide, resolve_action, Action, DebtReduction, Decision, NoOpReason};
pub use error::KeeperError;
pub use keeper::{Keeper, KeeperSettings};
pub use registry::{StrategyTarget, VaultRegistry};
