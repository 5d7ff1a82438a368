//! State carried by the orchestrator from one strategy step to the next.

use alloy::primitives::Address;
use std::collections::{HashMap, HashSet};
use tracing::info;

use crate::decision::{Action, NoOpReason};

/// Cross-strategy state owned by the keeper loop.
#[derive(Debug, Default)]
pub struct KeeperContext {
    cycle: u64,
    /// Unix seconds of the last range rebalance submitted for any strategy.
    last_rebalance_at: Option<u64>,
    /// strategy -> first cycle time `needRebalance` was seen set
    need_rebalance_since: HashMap<Address, u64>,
    stuck_alerted: HashSet<Address>,
}

impl KeeperContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Start a new registry pass and return its number.
    pub fn begin_cycle(&mut self) -> u64 {
        self.cycle += 1;
        self.cycle
    }

    pub fn last_rebalance_at(&self) -> Option<u64> {
        self.last_rebalance_at
    }

    pub fn rebalance_cooldown_elapsed(&self, now: u64, cooldown_secs: u64) -> bool {
        self.last_rebalance_at
            .map_or(true, |last| now.saturating_sub(last) >= cooldown_secs)
    }

    pub fn record_rebalance(&mut self, now: u64) {
        self.last_rebalance_at = Some(now);
    }

    /// Track how long `strategy` has needed a rebalance.
    ///
    /// Returns the age once, the first time it reaches `alert_after_secs`.
    /// Clearing the flag resets the tracking.
    pub fn observe_need_rebalance(
        &mut self,
        strategy: Address,
        need_rebalance: bool,
        now: u64,
        alert_after_secs: u64,
    ) -> Option<u64> {
        if !need_rebalance {
            self.need_rebalance_since.remove(&strategy);
            self.stuck_alerted.remove(&strategy);
            return None;
        }

        let since = *self.need_rebalance_since.entry(strategy).or_insert(now);
        let age = now.saturating_sub(since);
        if age >= alert_after_secs && self.stuck_alerted.insert(strategy) {
            Some(age)
        } else {
            None
        }
    }
}

/// Result of processing one strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyOutcome {
    NoOp(NoOpReason),
    Executed(Action),
}

/// Counters for one registry pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub cycle: u64,
    pub vaults: usize,
    pub processed: usize,
    pub rebalanced: usize,
    pub reduced_debt: usize,
    pub no_op: usize,
    pub failed: usize,
}

impl CycleSummary {
    pub fn new(cycle: u64) -> Self {
        Self {
            cycle,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: &StrategyOutcome) {
        match outcome {
            StrategyOutcome::NoOp(_) => self.no_op += 1,
            StrategyOutcome::Executed(Action::Rebalance) => self.rebalanced += 1,
            StrategyOutcome::Executed(Action::ReduceDebt(_)) => self.reduced_debt += 1,
            StrategyOutcome::Executed(Action::NoOp(_)) => self.no_op += 1,
        }
    }

    pub fn acted(&self) -> usize {
        self.rebalanced + self.reduced_debt
    }

    pub fn log(&self) {
        info!(
            cycle = self.cycle,
            vaults = self.vaults,
            processed = self.processed,
            acted = self.acted(),
            rebalanced = self.rebalanced,
            reduced_debt = self.reduced_debt,
            no_op = self.no_op,
            failed = self.failed,
            "Cycle complete"
        );
    }
}
