//! Debt-reduction decision engine.
//!
//! [`decide`] is a pure function of the position snapshot, the strategy's
//! thresholds and the current time. It either stops with a [`NoOpReason`]
//! or names the unwind plan to quote. [`resolve_action`] performs the
//! reads and quotes that turn an unwind into a concrete [`Action`].

use alloy::primitives::{Address, Bytes, U256};
use keeper_api::AggregatorQuoteService;
use keeper_chain::{encode_withdraw_by_agg_step, PlanKind, PositionState, RebalanceConfig, StateReader};
use tracing::{debug, instrument};

use crate::error::KeeperError;

/// Why no transaction is needed this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoOpReason {
    NoAssets,
    RebalanceRequired,
    FuseNothingToUnwind,
    UnderDelayedThreshold,
    CooldownNotElapsed,
    ZeroSwapAmount,
}

impl std::fmt::Display for NoOpReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NoAssets => "no assets",
            Self::RebalanceRequired => "rebalance required first",
            Self::FuseNothingToUnwind => "fuse active, nothing left to unwind",
            Self::UnderDelayedThreshold => "under delayed threshold",
            Self::CooldownNotElapsed => "cooldown not elapsed",
            Self::ZeroSwapAmount => "zero swap amount",
        })
    }
}

/// Outcome of the pure gate checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    NoOp(NoOpReason),
    /// Quote the next unwind step of `plan`.
    Unwind { plan: PlanKind, fuse_triggered: bool },
}

/// Apply the debt-reduction gates in order; the first match wins.
pub fn decide(state: &PositionState, config: &RebalanceConfig, now: u64) -> Decision {
    if state.total_assets.is_zero() {
        return Decision::NoOp(NoOpReason::NoAssets);
    }
    // A pending range rebalance changes the debt composition.
    if state.need_rebalance {
        return Decision::NoOp(NoOpReason::RebalanceRequired);
    }

    let fuse_triggered = state.fuse_triggered();

    if fuse_triggered && state.locked_percent == 0 && state.withdraw_done {
        return Decision::NoOp(NoOpReason::FuseNothingToUnwind);
    }

    if !fuse_triggered {
        if state.locked_percent <= config.locked_percent_for_delayed_rebalance {
            return Decision::NoOp(NoOpReason::UnderDelayedThreshold);
        }
        let since_last = now.saturating_sub(state.last_rebalance_no_swap);
        if state.locked_percent < config.locked_percent_for_forced_rebalance
            && since_last < config.rebalance_debt_delay_secs
        {
            return Decision::NoOp(NoOpReason::CooldownNotElapsed);
        }
    }

    let plan = if fuse_triggered {
        PlanKind::SwapRepay
    } else {
        PlanKind::RepaySwapRepay
    };
    Decision::Unwind {
        plan,
        fuse_triggered,
    }
}

/// One `withdrawByAggStep` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebtReduction {
    pub token_to_swap: Address,
    pub amount_to_swap: U256,
    /// Router the swap calldata targets; zero for swap-less steps.
    pub aggregator: Address,
    pub swap_data: Bytes,
    pub plan: PlanKind,
    pub allow_pool_entry: bool,
    /// Provider whose quote was selected.
    pub quoted_by: Option<&'static str>,
}

impl DebtReduction {
    pub fn calldata(&self) -> Bytes {
        encode_withdraw_by_agg_step(
            self.token_to_swap,
            self.aggregator,
            self.amount_to_swap,
            self.swap_data.clone(),
            self.plan,
            self.allow_pool_entry,
        )
    }
}

/// What the keeper does for one strategy this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NoOp(NoOpReason),
    /// Range repositioning without a swap.
    Rebalance,
    ReduceDebt(DebtReduction),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoOp(_) => "noop",
            Self::Rebalance => "rebalance",
            Self::ReduceDebt(_) => "reduce_debt",
        }
    }
}

/// Run [`decide`] and, for an unwind, fetch the step size and a swap route.
#[instrument(skip_all, fields(strategy = %strategy))]
pub async fn resolve_action(
    reader: &dyn StateReader,
    quotes: &AggregatorQuoteService,
    strategy: Address,
    state: &PositionState,
    config: &RebalanceConfig,
    now: u64,
) -> Result<Action, KeeperError> {
    let (plan, fuse_triggered) = match decide(state, config, now) {
        Decision::NoOp(reason) => return Ok(Action::NoOp(reason)),
        Decision::Unwind {
            plan,
            fuse_triggered,
        } => (plan, fuse_triggered),
    };

    let (token_to_swap, amount_to_swap) = reader.quote_withdraw(strategy, plan.encode()).await?;
    debug!(
        plan = %plan,
        token = %token_to_swap,
        amount = %amount_to_swap,
        "Withdraw step quoted"
    );

    if amount_to_swap.is_zero() {
        if !fuse_triggered {
            return Ok(Action::NoOp(NoOpReason::ZeroSwapAmount));
        }
        // Still advances the unwind even without a swap.
        return Ok(Action::ReduceDebt(DebtReduction {
            token_to_swap,
            amount_to_swap,
            aggregator: Address::ZERO,
            swap_data: Bytes::new(),
            plan,
            allow_pool_entry: false,
            quoted_by: None,
        }));
    }

    let token_out = state.counterpart(token_to_swap);
    let quote = quotes
        .get_best_quote(token_to_swap, token_out, amount_to_swap, strategy)
        .await?;

    Ok(Action::ReduceDebt(DebtReduction {
        token_to_swap,
        amount_to_swap,
        aggregator: quote.target,
        swap_data: quote.call_data,
        plan,
        allow_pool_entry: !fuse_triggered,
        quoted_by: Some(quote.provider),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{quotes, MockReader, TOKEN_A, TOKEN_B};
    use keeper_chain::FuseStatus;
    use std::sync::Arc;

    const NOW: u64 = 1_700_000_000;
    const STRATEGY: Address = Address::new([0x51; 20]);

    fn state() -> PositionState {
        PositionState {
            token_a: TOKEN_A,
            token_b: TOKEN_B,
            fuse_status_a: FuseStatus::Off,
            fuse_status_b: FuseStatus::Off,
            need_rebalance: false,
            locked_percent: 10,
            withdraw_done: false,
            last_rebalance_no_swap: NOW - 601,
            total_assets: U256::from(1_000_000u64),
        }
    }

    fn config() -> RebalanceConfig {
        RebalanceConfig {
            locked_percent_for_delayed_rebalance: 3,
            locked_percent_for_forced_rebalance: 50,
            rebalance_debt_delay_secs: 600,
        }
    }

    fn fused(mut s: PositionState) -> PositionState {
        s.fuse_status_b = FuseStatus::OnUpperLimit;
        s
    }

    #[test]
    fn test_need_rebalance_always_noop() {
        for fuse in [FuseStatus::Disabled, FuseStatus::Off, FuseStatus::OnLowerLimit, FuseStatus::OnUpperLimit] {
            for locked in [0u8, 5, 50, 100] {
                let mut s = state();
                s.need_rebalance = true;
                s.fuse_status_a = fuse;
                s.locked_percent = locked;
                assert_eq!(
                    decide(&s, &config(), NOW),
                    Decision::NoOp(NoOpReason::RebalanceRequired)
                );
            }
        }
    }

    #[test]
    fn test_empty_position() {
        let mut s = state();
        s.total_assets = U256::ZERO;
        s.need_rebalance = true;
        assert_eq!(decide(&s, &config(), NOW), Decision::NoOp(NoOpReason::NoAssets));
    }

    #[test]
    fn test_fuse_with_nothing_left() {
        let mut s = fused(state());
        s.locked_percent = 0;
        s.withdraw_done = true;
        assert_eq!(
            decide(&s, &config(), NOW),
            Decision::NoOp(NoOpReason::FuseNothingToUnwind)
        );
    }

    #[test]
    fn test_fuse_with_withdraw_pending_unwinds() {
        let mut s = fused(state());
        s.locked_percent = 0;
        s.withdraw_done = false;
        assert_eq!(
            decide(&s, &config(), NOW),
            Decision::Unwind {
                plan: PlanKind::SwapRepay,
                fuse_triggered: true
            }
        );
    }

    #[test]
    fn test_under_delayed_threshold() {
        for locked in 0..=3u8 {
            let mut s = state();
            s.locked_percent = locked;
            assert_eq!(
                decide(&s, &config(), NOW),
                Decision::NoOp(NoOpReason::UnderDelayedThreshold)
            );
        }
    }

    #[test]
    fn test_cooldown() {
        let mut s = state();
        s.last_rebalance_no_swap = NOW - 599;
        assert_eq!(
            decide(&s, &config(), NOW),
            Decision::NoOp(NoOpReason::CooldownNotElapsed)
        );

        // forced threshold skips the cooldown
        s.locked_percent = 50;
        assert!(matches!(decide(&s, &config(), NOW), Decision::Unwind { .. }));

        // a timestamp ahead of `now` counts as just rebalanced
        let mut s = state();
        s.last_rebalance_no_swap = NOW + 10;
        assert_eq!(
            decide(&s, &config(), NOW),
            Decision::NoOp(NoOpReason::CooldownNotElapsed)
        );
    }

    #[test]
    fn test_cooldown_does_not_apply_under_fuse() {
        let mut s = fused(state());
        s.last_rebalance_no_swap = NOW;
        s.locked_percent = 1;
        assert_eq!(
            decide(&s, &config(), NOW),
            Decision::Unwind {
                plan: PlanKind::SwapRepay,
                fuse_triggered: true
            }
        );
    }

    #[test]
    fn test_never_selects_swap_only() {
        for fuse in [FuseStatus::Off, FuseStatus::OnLowerLimit] {
            for locked in 0..=100u8 {
                let mut s = state();
                s.fuse_status_a = fuse;
                s.locked_percent = locked;
                if let Decision::Unwind { plan, .. } = decide(&s, &config(), NOW) {
                    assert_ne!(plan, PlanKind::SwapOnly);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_resolve_routine_reduction() {
        let reader = MockReader::new().with_withdraw_quote(TOKEN_A, U256::from(5_000u64));
        let quotes = quotes(&[("a", 100), ("b", 120)]);

        let action = resolve_action(&reader, &quotes, STRATEGY, &state(), &config(), NOW)
            .await
            .unwrap();

        let calls = reader.withdraw_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, STRATEGY);
        assert_eq!(PlanKind::decode(&calls[0].1), Some(PlanKind::RepaySwapRepay));

        match action {
            Action::ReduceDebt(step) => {
                assert_eq!(step.plan, PlanKind::RepaySwapRepay);
                assert!(step.allow_pool_entry);
                assert_eq!(step.quoted_by, Some("b"));
                assert_eq!(step.token_to_swap, TOKEN_A);
                assert_eq!(step.amount_to_swap, U256::from(5_000u64));
                assert!(!step.swap_data.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_zero_amount() {
        let reader = Arc::new(MockReader::new().with_withdraw_quote(TOKEN_B, U256::ZERO));
        let quotes = quotes(&[("a", 100)]);

        let action = resolve_action(reader.as_ref(), &quotes, STRATEGY, &state(), &config(), NOW)
            .await
            .unwrap();
        assert_eq!(action, Action::NoOp(NoOpReason::ZeroSwapAmount));

        let action = resolve_action(reader.as_ref(), &quotes, STRATEGY, &fused(state()), &config(), NOW)
            .await
            .unwrap();
        match action {
            Action::ReduceDebt(step) => {
                assert_eq!(step.plan, PlanKind::SwapRepay);
                assert!(step.amount_to_swap.is_zero());
                assert!(step.swap_data.is_empty());
                assert!(!step.allow_pool_entry);
                assert_eq!(step.quoted_by, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_fails_when_no_quote() {
        let reader = MockReader::new().with_withdraw_quote(TOKEN_A, U256::from(1u64));
        let quotes = quotes(&[]);

        let err = resolve_action(&reader, &quotes, STRATEGY, &state(), &config(), NOW)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KeeperError::Quote(keeper_api::QuoteError::AllAggregatorsFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_noop_skips_reads() {
        let reader = MockReader::new();
        let mut s = state();
        s.locked_percent = 2;

        let action = resolve_action(&reader, &quotes(&[]), STRATEGY, &s, &config(), NOW)
            .await
            .unwrap();
        assert_eq!(action, Action::NoOp(NoOpReason::UnderDelayedThreshold));
        assert!(reader.withdraw_calls().is_empty());
    }

    #[test]
    fn test_calldata_targets_aggregator() {
        let step = DebtReduction {
            token_to_swap: TOKEN_A,
            amount_to_swap: U256::from(1u64),
            aggregator: Address::repeat_byte(0x77),
            swap_data: Bytes::from(vec![1, 2, 3]),
            plan: PlanKind::RepaySwapRepay,
            allow_pool_entry: true,
            quoted_by: Some("a"),
        };
        assert_eq!(
            step.calldata(),
            encode_withdraw_by_agg_step(
                TOKEN_A,
                Address::repeat_byte(0x77),
                U256::from(1u64),
                Bytes::from(vec![1, 2, 3]),
                PlanKind::RepaySwapRepay,
                true
            )
        );
    }
}
