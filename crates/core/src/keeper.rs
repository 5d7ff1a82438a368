//! Keeper main loop.
//!
//! Each cycle walks the vault registry and, for every strategy, runs two
//! checks in order:
//!
//! 1. Range rebalance: when `needRebalance` is set, the strategy is not
//!    paused and the global rebalance cooldown has passed, submit
//!    `rebalanceNoSwaps`.
//! 2. Debt reduction: otherwise resolve an [`Action`] through the decision
//!    engine and submit `withdrawByAggStep` when one is needed.
//!
//! Strategies are processed one at a time because every transaction shares
//! the signer's nonce sequence. A failing strategy is logged and alerted and
//! never stops the loop.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::Address;
use keeper_api::{AggregatorQuoteService, AlertSink};
use keeper_chain::{
    encode_rebalance_no_swaps, PollPolicy, PollStep, Poller, Receipt, Scheduler, StateReader,
    TransactionEscalator,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::LoopConfig;
use crate::context::{CycleSummary, KeeperContext, StrategyOutcome};
use crate::decision::{resolve_action, Action};
use crate::error::KeeperError;
use crate::registry::{StrategyTarget, VaultRegistry};

/// Loop timing used by [`Keeper`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeeperSettings {
    pub interval: Duration,
    pub rebalance_cooldown: Duration,
    pub rebalance_stuck_alert: Duration,
}

impl Default for KeeperSettings {
    fn default() -> Self {
        (&LoopConfig::default()).into()
    }
}

impl From<&LoopConfig> for KeeperSettings {
    fn from(cfg: &LoopConfig) -> Self {
        Self {
            interval: cfg.interval(),
            rebalance_cooldown: cfg.rebalance_cooldown(),
            rebalance_stuck_alert: cfg.rebalance_stuck_alert(),
        }
    }
}

/// Long-running orchestrator.
pub struct Keeper {
    reader: Arc<dyn StateReader>,
    quotes: AggregatorQuoteService,
    escalator: TransactionEscalator,
    alerts: Arc<dyn AlertSink>,
    scheduler: Arc<dyn Scheduler>,
    registry: VaultRegistry,
    settings: KeeperSettings,
}

impl std::fmt::Debug for Keeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keeper")
            .field("vaults", &self.registry.len())
            .field("providers", &self.quotes.provider_names())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Keeper {
    /// The escalator's scheduler is the keeper's clock.
    pub fn new(
        reader: Arc<dyn StateReader>,
        quotes: AggregatorQuoteService,
        escalator: TransactionEscalator,
        alerts: Arc<dyn AlertSink>,
        registry: VaultRegistry,
        settings: KeeperSettings,
    ) -> Self {
        let scheduler = escalator.submitter().scheduler().clone();
        Self {
            reader,
            quotes,
            escalator,
            alerts,
            scheduler,
            registry,
            settings,
        }
    }

    /// Run cycles until `shutdown` is cancelled.
    ///
    /// Cancellation is checked between strategies and during the sleep
    /// between cycles. A transaction already broadcast is always driven to
    /// its outcome.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut ctx = KeeperContext::new();
        info!(
            vaults = self.registry.len(),
            interval_secs = self.settings.interval.as_secs(),
            providers = ?self.quotes.provider_names(),
            "Keeper started"
        );

        let mut cycles =
            Poller::new(PollPolicy::new(self.settings.interval, None)).with_cancellation(shutdown.clone());
        while let PollStep::Attempt(_) = cycles.tick(self.scheduler.as_ref()).await {
            let summary = self.run_cycle(&mut ctx, &shutdown).await;
            summary.log();
        }

        info!(cycles = ctx.cycle(), "Keeper stopped");
    }

    /// One pass over every vault and strategy.
    pub async fn run_cycle(&self, ctx: &mut KeeperContext, shutdown: &CancellationToken) -> CycleSummary {
        let mut summary = CycleSummary::new(ctx.begin_cycle());

        'vaults: for entry in self.registry.vaults() {
            if shutdown.is_cancelled() {
                break;
            }

            let targets = match self.registry.discover(entry, self.reader.as_ref()).await {
                Ok(targets) => targets,
                Err(e) => {
                    summary.failed += 1;
                    error!(vault = %entry.name, error = %e, "Strategy discovery failed");
                    self.alerts
                        .notify(&format!("[{}] strategy discovery failed: {e}", entry.name))
                        .await;
                    continue;
                }
            };
            summary.vaults += 1;

            for target in &targets {
                if shutdown.is_cancelled() {
                    info!("Shutdown requested, stopping cycle");
                    break 'vaults;
                }

                summary.processed += 1;
                match self.process_strategy(ctx, target).await {
                    Ok(outcome) => summary.record(&outcome),
                    Err(e) => {
                        summary.failed += 1;
                        self.report_failure(target, &e).await;
                    }
                }
            }
        }

        summary
    }

    #[instrument(skip_all, fields(vault = %target.vault_name, strategy = %target.strategy))]
    async fn process_strategy(
        &self,
        ctx: &mut KeeperContext,
        target: &StrategyTarget,
    ) -> Result<StrategyOutcome, KeeperError> {
        let now = self.scheduler.now_unix();
        let state = self.reader.read_position_state(target.strategy).await?;
        debug!(
            need_rebalance = state.need_rebalance,
            locked_percent = state.locked_percent,
            fuse_triggered = state.fuse_triggered(),
            withdraw_done = state.withdraw_done,
            "Position state"
        );

        if let Some(age) = ctx.observe_need_rebalance(
            target.strategy,
            state.need_rebalance,
            now,
            self.settings.rebalance_stuck_alert.as_secs(),
        ) {
            warn!(age_secs = age, "Rebalance pending for too long");
            self.alerts
                .notify(&format!(
                    "[{}] strategy {} has needed a rebalance for {}s",
                    target.vault_name, target.strategy, age
                ))
                .await;
        }

        if state.need_rebalance {
            if let Some(outcome) = self.check_rebalance(ctx, target, now).await? {
                return Ok(outcome);
            }
        }

        let config = self.reader.read_config(target.strategy).await?;
        let action = resolve_action(
            self.reader.as_ref(),
            &self.quotes,
            target.strategy,
            &state,
            &config,
            now,
        )
        .await?;

        self.execute(target, action).await
    }

    /// Submit `rebalanceNoSwaps` when the global cooldown allows it and the
    /// strategy is not paused. `None` falls through to the debt check.
    async fn check_rebalance(
        &self,
        ctx: &mut KeeperContext,
        target: &StrategyTarget,
        now: u64,
    ) -> Result<Option<StrategyOutcome>, KeeperError> {
        let cooldown = self.settings.rebalance_cooldown.as_secs();
        if !ctx.rebalance_cooldown_elapsed(now, cooldown) {
            debug!(
                last_rebalance_at = ?ctx.last_rebalance_at(),
                cooldown_secs = cooldown,
                "Rebalance cooldown active"
            );
            return Ok(None);
        }

        if let Some(splitter) = target.splitter {
            if self.reader.is_paused(splitter, target.strategy).await? {
                info!("Strategy paused, skipping rebalance");
                return Ok(None);
            }
        }

        let result = self.execute(target, Action::Rebalance).await;
        // Reverted rebalances count toward the cooldown as well.
        ctx.record_rebalance(self.scheduler.now_unix());
        result.map(Some)
    }

    async fn execute(&self, target: &StrategyTarget, action: Action) -> Result<StrategyOutcome, KeeperError> {
        let (data, summary) = match &action {
            Action::NoOp(reason) => {
                debug!(reason = %reason, "No action");
                return Ok(StrategyOutcome::NoOp(*reason));
            }
            Action::Rebalance => {
                info!("Submitting range rebalance");
                (encode_rebalance_no_swaps(), "range rebalanced".to_string())
            }
            Action::ReduceDebt(step) => {
                info!(
                    plan = %step.plan,
                    token = %step.token_to_swap,
                    amount = %step.amount_to_swap,
                    aggregator = %step.aggregator,
                    provider = step.quoted_by.unwrap_or("none"),
                    allow_pool_entry = step.allow_pool_entry,
                    "Submitting debt reduction step"
                );
                let summary = format!(
                    "debt reduced ({}, {} of {} via {})",
                    step.plan,
                    step.amount_to_swap,
                    step.token_to_swap,
                    step.quoted_by.unwrap_or("no swap")
                );
                (step.calldata(), summary)
            }
        };

        let receipt = self.escalator.submit_and_confirm(target.strategy, data).await?;
        self.report_success(target, &summary, &receipt).await;
        Ok(StrategyOutcome::Executed(action))
    }

    async fn report_success(&self, target: &StrategyTarget, summary: &str, receipt: &Receipt) {
        let events = target.events.decode_receipt(target.strategy, &receipt.logs);
        info!(
            tx_hash = %receipt.tx_hash,
            block = receipt.block_number.unwrap_or(0),
            gas_used = receipt.gas_used,
            events = events.len(),
            "{summary}"
        );

        let mut message = format!(
            "[{}] strategy {}: {} in tx {}",
            target.vault_name, target.strategy, summary, receipt.tx_hash
        );
        if !events.is_empty() {
            let rendered: Vec<String> = events.iter().map(ToString::to_string).collect();
            message.push_str(&format!(" | {}", rendered.join(", ")));
        }
        self.alerts.notify(&message).await;
    }

    async fn report_failure(&self, target: &StrategyTarget, err: &KeeperError) {
        error!(
            vault = %target.vault_name,
            strategy = %target.strategy,
            error = %err,
            "Strategy cycle failed"
        );

        let prefix = if err.is_escalation_failure() {
            "ESCALATION FAILED, operator attention required"
        } else if err.is_revert() {
            "transaction reverted"
        } else {
            "cycle failed"
        };
        self.alerts
            .notify(&format!(
                "[{}] strategy {}: {prefix}: {err}",
                target.vault_name, target.strategy
            ))
            .await;
    }

    pub fn registry(&self) -> &VaultRegistry {
        &self.registry
    }

    pub fn signer(&self) -> Address {
        self.escalator.submitter().backend().address()
    }
}
