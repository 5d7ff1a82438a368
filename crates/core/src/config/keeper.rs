//! Keeper runtime configuration with profile support.
//!
//! Settings come from a TOML file (`KEEPER_CONFIG`, default `keeper.toml`)
//! laid over a named profile: the file's `profile` key, else
//! `KEEPER_PROFILE`. The file supplies contracts and vaults. A few
//! environment variables override the loaded values.

use super::vaults::VaultEntry;
use alloy::primitives::Address;
use anyhow::{bail, Context, Result};
use keeper_api::QuoteSettings;
use keeper_chain::{EscalationConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "keeper.toml";

/// Main configuration structure containing all keeper parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Main loop timing
    #[serde(default, rename = "loop")]
    pub loop_timing: LoopConfig,

    #[serde(default)]
    pub rpc: RpcSettings,

    /// Stuck transaction recovery
    #[serde(default)]
    pub escalation: EscalationSettings,

    /// Swap quote providers
    #[serde(default)]
    pub aggregators: AggregatorConfig,

    #[serde(default)]
    pub gas: GasConfig,

    /// Reader contracts shared by every strategy
    #[serde(default)]
    pub contracts: ContractsConfig,

    /// Vault registry
    #[serde(default)]
    pub vaults: Vec<VaultEntry>,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Main loop timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Sleep between registry passes (seconds)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Minimum time between two range rebalances across all strategies (seconds)
    #[serde(default = "default_rebalance_cooldown")]
    pub rebalance_cooldown_secs: u64,

    /// Alert once a strategy has needed a rebalance for this long (seconds)
    #[serde(default = "default_stuck_alert")]
    pub rebalance_stuck_alert_secs: u64,
}

fn default_interval() -> u64 {
    60
}
fn default_rebalance_cooldown() -> u64 {
    300
}
fn default_stuck_alert() -> u64 {
    3_600
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            rebalance_cooldown_secs: default_rebalance_cooldown(),
            rebalance_stuck_alert_secs: default_stuck_alert(),
        }
    }
}

impl LoopConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
    pub fn rebalance_cooldown(&self) -> Duration {
        Duration::from_secs(self.rebalance_cooldown_secs)
    }
    pub fn rebalance_stuck_alert(&self) -> Duration {
        Duration::from_secs(self.rebalance_stuck_alert_secs)
    }
}

/// RPC timeouts and read retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    #[serde(default = "default_rpc_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// First retry delay; doubles on each further attempt
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
}

fn default_rpc_timeout() -> u64 {
    15_000
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_base_delay() -> u64 {
    1_000
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_rpc_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
        }
    }
}

impl RpcSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}

/// Speed-up and drop-pending tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Empty poll cycles before a speed-up
    #[serde(default = "default_speed_up_threshold")]
    pub speed_up_threshold: u32,

    /// Multiplier on the network gas price for replacements
    #[serde(default = "default_gas_multiplier")]
    pub gas_multiplier: f64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_escalations")]
    pub max_escalations: u32,

    #[serde(default = "default_drop_attempts")]
    pub drop_pending_attempts: u32,

    #[serde(default = "default_drop_wait")]
    pub drop_pending_wait_cycles: u32,

    /// Give up waiting after this many cycles when escalation is disabled
    #[serde(default = "default_max_wait")]
    pub max_wait_cycles: u32,
}

fn default_true() -> bool {
    true
}
fn default_speed_up_threshold() -> u32 {
    10
}
fn default_gas_multiplier() -> f64 {
    1.5
}
fn default_poll_interval() -> u64 {
    1_000
}
fn default_max_escalations() -> u32 {
    5
}
fn default_drop_attempts() -> u32 {
    5
}
fn default_drop_wait() -> u32 {
    10
}
fn default_max_wait() -> u32 {
    300
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            speed_up_threshold: default_speed_up_threshold(),
            gas_multiplier: default_gas_multiplier(),
            poll_interval_ms: default_poll_interval(),
            max_escalations: default_max_escalations(),
            drop_pending_attempts: default_drop_attempts(),
            drop_pending_wait_cycles: default_drop_wait(),
            max_wait_cycles: default_max_wait(),
        }
    }
}

impl EscalationSettings {
    pub fn to_escalation_config(&self) -> EscalationConfig {
        EscalationConfig {
            enabled: self.enabled,
            speed_up_threshold: self.speed_up_threshold,
            gas_multiplier: self.gas_multiplier,
            max_escalations: self.max_escalations,
            drop_pending_attempts: self.drop_pending_attempts,
            drop_pending_wait_cycles: self.drop_pending_wait_cycles,
            max_wait_cycles: self.max_wait_cycles,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// Supported swap aggregators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "1inch", alias = "oneinch")]
    OneInch,
    #[serde(rename = "0x", alias = "zeroex")]
    ZeroEx,
    #[serde(rename = "openocean")]
    OpenOcean,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::OneInch => "1inch",
            Self::ZeroEx => "0x",
            Self::OpenOcean => "openocean",
        })
    }
}

/// Quote fan-out configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Per-provider request timeout (milliseconds)
    #[serde(default = "default_quote_timeout")]
    pub timeout_ms: u64,

    /// Slippage tolerance in basis points
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,

    /// Providers in priority order; earlier wins ties
    #[serde(default = "default_providers")]
    pub providers: Vec<ProviderKind>,

    #[serde(default = "default_true")]
    pub disable_estimate: bool,

    #[serde(default)]
    pub allow_partial_fill: bool,

    /// Optional protocol allow-list forwarded to providers
    #[serde(default)]
    pub protocols: Option<String>,

    /// Base URL overrides (self-hosted proxies, test servers)
    #[serde(default)]
    pub one_inch_url: Option<String>,
    #[serde(default)]
    pub zero_ex_url: Option<String>,
    #[serde(default)]
    pub open_ocean_url: Option<String>,
}

fn default_quote_timeout() -> u64 {
    5_000
}
fn default_slippage_bps() -> u16 {
    100
}
fn default_providers() -> Vec<ProviderKind> {
    vec![ProviderKind::OneInch, ProviderKind::ZeroEx, ProviderKind::OpenOcean]
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_quote_timeout(),
            slippage_bps: default_slippage_bps(),
            providers: default_providers(),
            disable_estimate: default_true(),
            allow_partial_fill: false,
            protocols: None,
            one_inch_url: None,
            zero_ex_url: None,
            open_ocean_url: None,
        }
    }
}

impl AggregatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn quote_settings(&self) -> QuoteSettings {
        QuoteSettings {
            slippage_bps: self.slippage_bps,
            disable_estimate: self.disable_estimate,
            allow_partial_fill: self.allow_partial_fill,
            protocols: self.protocols.clone(),
        }
    }
}

/// Gas pricing model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GasPricingModel {
    /// Legacy gas pricing (gas price only)
    Legacy,
    /// EIP-1559 (base fee + priority fee)
    Eip1559,
}

impl GasPricingModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Eip1559 => "eip1559",
        }
    }
}

/// Gas pricing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasConfig {
    #[serde(default = "default_pricing")]
    pub pricing: GasPricingModel,
    /// Fallback gas price when the node cannot be reached (in gwei)
    #[serde(default = "default_gas_price")]
    pub default_gas_price_gwei: f64,
    /// Cap applied to fetched prices (in gwei)
    #[serde(default = "default_max_gas_price")]
    pub max_gas_price_gwei: f64,
    /// Priority fee for EIP-1559 transactions (in gwei)
    #[serde(default)]
    pub priority_fee_gwei: Option<f64>,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

fn default_pricing() -> GasPricingModel {
    GasPricingModel::Legacy
}
fn default_gas_price() -> f64 {
    30.0
}
fn default_max_gas_price() -> f64 {
    500.0
}
fn default_gas_limit() -> u64 {
    5_000_000
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            pricing: default_pricing(),
            default_gas_price_gwei: default_gas_price(),
            max_gas_price_gwei: default_max_gas_price(),
            priority_fee_gwei: None,
            gas_limit: default_gas_limit(),
        }
    }
}

/// Shared reader contracts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractsConfig {
    /// Lens contract exposing `getLockedUnderlyingAmount`
    #[serde(default)]
    pub strategy_reader: Address,
    /// Contract exposing per-strategy `strategyConfig`
    #[serde(default)]
    pub debt_config: Address,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            loop_timing: LoopConfig::default(),
            rpc: RpcSettings::default(),
            escalation: EscalationSettings::default(),
            aggregators: AggregatorConfig::default(),
            gas: GasConfig::default(),
            contracts: ContractsConfig::default(),
            vaults: Vec::new(),
        }
    }
}

impl KeeperConfig {
    /// Load configuration from a TOML file, overlaid on the profile it names.
    pub fn from_file(path: impl AsRef<Path>, fallback_profile: &str) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&content, fallback_profile)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Parse `content` on top of a profile base.
    ///
    /// The file's `profile` key picks the base, `fallback_profile` is used
    /// when the key is absent. Tables merge key by key, every other value in
    /// the file replaces the profile's.
    pub fn from_toml_str(content: &str, fallback_profile: &str) -> Result<Self> {
        let overlay: toml::Table = toml::from_str(content)?;
        let profile = overlay
            .get("profile")
            .and_then(toml::Value::as_str)
            .unwrap_or(fallback_profile);

        let mut base = match toml::Value::try_from(Self::from_profile(profile))? {
            toml::Value::Table(table) => table,
            other => bail!("profile {profile} serialized to {}", other.type_str()),
        };
        merge_tables(&mut base, overlay);

        Ok(toml::Value::Table(base).try_into()?)
    }

    /// Slower loop, patient escalation, tight slippage.
    pub fn conservative() -> Self {
        Self {
            profile: "conservative".to_string(),
            loop_timing: LoopConfig {
                interval_secs: 120,
                rebalance_cooldown_secs: 600,
                rebalance_stuck_alert_secs: 7_200,
            },
            escalation: EscalationSettings {
                speed_up_threshold: 20,
                gas_multiplier: 1.25,
                max_escalations: 3,
                ..Default::default()
            },
            aggregators: AggregatorConfig {
                slippage_bps: 50,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Fast loop, early and steep escalation.
    pub fn aggressive() -> Self {
        Self {
            profile: "aggressive".to_string(),
            loop_timing: LoopConfig {
                interval_secs: 30,
                rebalance_cooldown_secs: 120,
                rebalance_stuck_alert_secs: 1_800,
            },
            escalation: EscalationSettings {
                speed_up_threshold: 5,
                gas_multiplier: 2.0,
                max_escalations: 8,
                ..Default::default()
            },
            aggregators: AggregatorConfig {
                timeout_ms: 3_000,
                slippage_bps: 150,
                ..Default::default()
            },
            gas: GasConfig {
                max_gas_price_gwei: 1_000.0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Profile by name. Supported values: default, conservative, aggressive.
    pub fn from_profile(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "conservative" | "safe" => Self::conservative(),
            "aggressive" | "aggro" => Self::aggressive(),
            _ => Self::default(),
        }
    }

    /// Load `KEEPER_CONFIG` (or `keeper.toml`) over the profile it names,
    /// or over `KEEPER_PROFILE` when the file has no `profile` key, then
    /// apply environment overrides.
    ///
    /// The file is required: profiles carry no contracts or vault registry.
    pub fn load() -> Result<Self> {
        let path = std::env::var("KEEPER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let profile = std::env::var("KEEPER_PROFILE").unwrap_or_else(|_| "default".to_string());
        if !Path::new(&path).exists() {
            bail!("Config file {path} not found, it must list contracts and vaults (profile {profile} supplies the rest)");
        }
        let mut config = Self::from_file(&path, &profile)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override loop interval and escalation knobs from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("LOOP_INTERVAL_SECS") {
            self.loop_timing.interval_secs = v
                .trim()
                .parse()
                .with_context(|| format!("LOOP_INTERVAL_SECS={v:?}"))?;
        }
        if let Some(v) = lookup("SPEED_UP_THRESHOLD") {
            self.escalation.speed_up_threshold = v
                .trim()
                .parse()
                .with_context(|| format!("SPEED_UP_THRESHOLD={v:?}"))?;
        }
        if let Some(v) = lookup("SPEED_UP_MULTIPLIER") {
            self.escalation.gas_multiplier = v
                .trim()
                .parse()
                .with_context(|| format!("SPEED_UP_MULTIPLIER={v:?}"))?;
        }
        Ok(())
    }

    /// Reject settings the keeper cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.loop_timing.interval_secs == 0 {
            bail!("loop.interval_secs must be positive");
        }
        if self.escalation.gas_multiplier.is_nan() || self.escalation.gas_multiplier < 1.0 {
            bail!(
                "escalation.gas_multiplier must be at least 1.0, got {}",
                self.escalation.gas_multiplier
            );
        }
        if self.escalation.poll_interval_ms == 0 {
            bail!("escalation.poll_interval_ms must be positive");
        }
        if self.aggregators.providers.is_empty() {
            bail!("aggregators.providers is empty");
        }
        if self.aggregators.slippage_bps > 5_000 {
            bail!("aggregators.slippage_bps {} exceeds 50%", self.aggregators.slippage_bps);
        }
        if self.contracts.strategy_reader.is_zero() {
            bail!("contracts.strategy_reader is not set");
        }
        if self.contracts.debt_config.is_zero() {
            bail!("contracts.debt_config is not set");
        }
        if self.vaults.is_empty() {
            bail!("vault registry is empty");
        }
        Ok(())
    }

    /// Log the current configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Keeper configuration loaded");
        tracing::info!(
            interval_secs = self.loop_timing.interval_secs,
            rebalance_cooldown_secs = self.loop_timing.rebalance_cooldown_secs,
            stuck_alert_secs = self.loop_timing.rebalance_stuck_alert_secs,
            "Loop timing"
        );
        tracing::info!(
            timeout_ms = self.rpc.timeout_ms,
            retry_attempts = self.rpc.retry_attempts,
            retry_base_delay_ms = self.rpc.retry_base_delay_ms,
            "RPC settings"
        );
        tracing::info!(
            enabled = self.escalation.enabled,
            speed_up_threshold = self.escalation.speed_up_threshold,
            gas_multiplier = self.escalation.gas_multiplier,
            max_escalations = self.escalation.max_escalations,
            "Escalation"
        );
        tracing::info!(
            providers = ?self.aggregators.providers,
            timeout_ms = self.aggregators.timeout_ms,
            slippage_bps = self.aggregators.slippage_bps,
            "Aggregators"
        );
        tracing::info!(
            pricing = self.gas.pricing.as_str(),
            default_gwei = self.gas.default_gas_price_gwei,
            max_gwei = self.gas.max_gas_price_gwei,
            gas_limit = self.gas.gas_limit,
            "Gas"
        );
        tracing::info!(
            vaults = self.vaults.len(),
            strategy_reader = %self.contracts.strategy_reader,
            debt_config = %self.contracts.debt_config,
            "Registry"
        );
    }
}

/// Recursively merge `overlay` into `base`.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(inner)) => {
                merge_tables(existing, inner);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
