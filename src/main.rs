//! Pair-strategy keeper.
//!
//! Watches leveraged pair strategies, repositions ranges that need it and
//! unwinds excess debt through the best aggregator route. Features:
//! - Sequential per-strategy processing on a single signer nonce sequence
//! - Concurrent quote fan-out across 1inch, 0x and OpenOcean
//! - Speed-up and drop-pending escalation for stuck transactions
//! - Alerts to the log, and to Telegram when configured

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keeper_api::{
    AggregatorQuoteService, AlertSink, MultiAlertSink, OneInchProvider, OpenOceanProvider,
    QuoteProvider, ZeroExProvider,
};
use keeper_chain::{
    ChainStateReader, Scheduler, TokioScheduler, TransactionEscalator, TransactionSenderBuilder,
    TransactionSubmitter,
};
use keeper_core::{EnvConfig, Keeper, KeeperConfig, KeeperSettings, ProviderKind, VaultRegistry};

const DEFAULT_LOG_FILTER: &str = "info,keeper_core=debug,keeper_chain=debug,keeper_api=debug";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting keeper");

    // KEEPER_CONFIG selects the file, KEEPER_PROFILE the fallback profile
    let config = KeeperConfig::load()?;
    config.validate()?;
    config.log_config();

    let env = EnvConfig::from_env()?;

    let keeper = initialize(&config, &env).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_ctrl_c(shutdown.clone()));

    keeper.run(shutdown).await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

async fn watch_ctrl_c(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received, finishing current work"),
        Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
    }
    shutdown.cancel();
}

/// Wire every component. Any error here is fatal.
async fn initialize(config: &KeeperConfig, env: &EnvConfig) -> Result<Keeper> {
    info!("Initializing components...");
    let scheduler: Arc<dyn Scheduler> = Arc::new(TokioScheduler);

    // State reader
    let reader = ChainStateReader::new(
        &env.rpc_url,
        config.contracts.strategy_reader,
        config.contracts.debt_config,
        scheduler.clone(),
    )?
    .with_retry(config.rpc.retry_policy())
    .with_timeout(config.rpc.timeout());

    let chain_id = reader.chain_id().await.context("RPC endpoint unreachable")?;
    if chain_id != env.chain_id {
        bail!("RPC reports chain id {chain_id}, CHAIN_ID is {}", env.chain_id);
    }
    let block = reader.block_number().await.context("eth_blockNumber failed")?;
    info!(chain_id = chain_id, block = block, "Connected to chain");

    for vault in &config.vaults {
        if !reader.has_code(vault.address).await? {
            warn!(vault = %vault.name, address = %vault.address, "Vault has no code, it will be skipped");
        }
    }

    // Transaction sender
    let gas = &config.gas;
    let sender = TransactionSenderBuilder::new(env.rpc_url.clone(), env.chain_id)
        .gas_from_config(
            gas.pricing.as_str(),
            gas.default_gas_price_gwei,
            gas.max_gas_price_gwei,
            gas.priority_fee_gwei,
        )
        .gas_limit(gas.gas_limit)
        .timeout(config.rpc.timeout())
        .build(&env.private_key)
        .await
        .context("Transaction sender initialization failed")?;
    info!(address = %sender.address, "Transaction sender initialized");

    let submitter = TransactionSubmitter::new(Arc::new(sender), scheduler);
    let escalator = TransactionEscalator::new(submitter, config.escalation.to_escalation_config());

    // Aggregators
    let quotes = build_quote_service(config, env);
    if quotes.is_empty() {
        bail!("No quote provider configured");
    }
    info!(providers = ?quotes.provider_names(), "Quote service initialized");

    let alerts = build_alert_sink(env);
    info!(alerts = ?alerts, "Alert sink initialized");

    let registry = VaultRegistry::new(config.vaults.clone());
    let keeper = Keeper::new(
        Arc::new(reader),
        quotes,
        escalator,
        alerts,
        registry,
        KeeperSettings::from(&config.loop_timing),
    );

    info!("All components initialized");
    Ok(keeper)
}

fn build_quote_service(config: &KeeperConfig, env: &EnvConfig) -> AggregatorQuoteService {
    let agg = &config.aggregators;
    let mut service = AggregatorQuoteService::new(agg.timeout()).with_settings(agg.quote_settings());

    for kind in &agg.providers {
        let provider: Arc<dyn QuoteProvider> = match kind {
            ProviderKind::OneInch => {
                let mut p = OneInchProvider::new(env.chain_id, env.oneinch_api_key.clone());
                if let Some(url) = &agg.one_inch_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
            ProviderKind::ZeroEx => {
                let mut p = ZeroExProvider::new(env.chain_id, env.zeroex_api_key.clone());
                if let Some(url) = &agg.zero_ex_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
            ProviderKind::OpenOcean => {
                let gas_price_wei = (config.gas.default_gas_price_gwei * 1e9) as u128;
                let mut p = OpenOceanProvider::new(env.chain_id, env.openocean_api_key.clone())
                    .with_gas_price(gas_price_wei);
                if let Some(url) = &agg.open_ocean_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
        };
        service = service.with_provider(provider);
    }

    service
}

fn build_alert_sink(env: &EnvConfig) -> Arc<dyn AlertSink> {
    if env.telegram().is_none() {
        warn!("TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID not set, alerts go to the log only");
    }
    Arc::new(MultiAlertSink::operator(env.telegram()))
}
