//! Configuration for the keeper.
//!
//! - Runtime settings (profiles, loop timing, escalation, aggregators, gas)
//! - Vault registry entries
//! - Process-level secrets from the environment

mod env;
mod keeper;
mod vaults;

pub use env::EnvConfig;
pub use keeper::{
    AggregatorConfig, ContractsConfig, EscalationSettings, GasConfig, GasPricingModel,
    KeeperConfig, LoopConfig, ProviderKind, RpcSettings, DEFAULT_CONFIG_PATH,
};
pub use vaults::VaultEntry;
