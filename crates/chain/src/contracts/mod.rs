//! Contract bindings for pair-based leveraged strategies.
//!
//! The keeper consumes already-deployed contracts through narrow
//! interfaces:
//! - `IPairStrategy`: position state, debt-unwind quoting and the two
//!   keeper write paths (`rebalanceNoSwaps`, `withdrawByAggStep`)
//! - `IStrategyReader`: locked-amount estimation
//! - `IRebalanceDebtConfig`: per-strategy debt-reduction thresholds
//! - `IVault` / `ISplitter`: strategy discovery and pause state
//!
//! Calldata for the write paths is built here as raw bytes so the
//! transaction escalator can rebroadcast it unchanged.

mod plan;

pub use plan::{
    PlanKind, ENTRY_TO_POOL_DISABLED, ENTRY_TO_POOL_IS_ALLOWED, PLAN_REPAY_SWAP_REPAY,
    PLAN_SWAP_ONLY, PLAN_SWAP_REPAY,
};

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol;
use alloy::sol_types::SolCall;

sol! {
    /// Pair-based converter strategy (UniswapV3 / Algebra / Kyber / Pancake variants).
    #[sol(rpc)]
    interface IPairStrategy {
        function needRebalance() external view returns (bool);

        function getDefaultState() external view returns (
            address[] memory addr,
            int24[] memory tickData,
            uint256[] memory nums,
            bool[] memory boolValues
        );

        function quoteWithdrawByAgg(bytes memory planEntryData) external returns (
            address tokenToSwap,
            uint256 amountToSwap
        );

        function rebalanceNoSwaps(bool checkNeedRebalance) external;

        function withdrawByAggStep(
            address tokenToSwap,
            address aggregator,
            uint256 amountToSwap,
            bytes memory swapData,
            bytes memory planEntryData,
            uint256 entryToPool
        ) external returns (bool completed);
    }

    /// Read helper that estimates the locked part of a strategy's assets.
    #[sol(rpc)]
    interface IStrategyReader {
        function getLockedUnderlyingAmount(address strategy) external view returns (
            uint256 estimatedUnderlyingAmount,
            uint256 totalAssets
        );
    }

    /// Keeper thresholds for debt reduction, one entry per strategy.
    #[sol(rpc)]
    interface IRebalanceDebtConfig {
        function strategyConfig(address strategy) external view returns (
            uint256 lockedPercentForDelayedRebalance,
            uint256 lockedPercentForForcedRebalance,
            uint256 rebalanceDebtDelay
        );
    }

    #[sol(rpc)]
    interface IVault {
        function splitter() external view returns (address);
    }

    #[sol(rpc)]
    interface ISplitter {
        function strategiesLength() external view returns (uint256);
        function strategies(uint256 index) external view returns (address);
        function pausedStrategies(address strategy) external view returns (bool);
    }
}

/// Index of each field in `getDefaultState().nums`.
pub mod default_state {
    pub const FUSE_STATUS_A: usize = 1;
    pub const FUSE_STATUS_B: usize = 2;
    pub const WITHDRAW_DONE: usize = 3;
    pub const LAST_REBALANCE_NO_SWAP: usize = 12;
    /// Minimum `nums` length the keeper needs.
    pub const NUMS_LEN: usize = 13;
}

/// Calldata for `rebalanceNoSwaps(true)`.
pub fn encode_rebalance_no_swaps() -> Bytes {
    IPairStrategy::rebalanceNoSwapsCall {
        checkNeedRebalance: true,
    }
    .abi_encode()
    .into()
}

/// Calldata for one `withdrawByAggStep` call.
pub fn encode_withdraw_by_agg_step(
    token_to_swap: Address,
    aggregator: Address,
    amount_to_swap: U256,
    swap_data: Bytes,
    plan: PlanKind,
    allow_pool_entry: bool,
) -> Bytes {
    let entry_to_pool = if allow_pool_entry {
        ENTRY_TO_POOL_IS_ALLOWED
    } else {
        ENTRY_TO_POOL_DISABLED
    };

    IPairStrategy::withdrawByAggStepCall {
        tokenToSwap: token_to_swap,
        aggregator,
        amountToSwap: amount_to_swap,
        swapData: swap_data,
        planEntryData: plan.encode(),
        entryToPool: U256::from(entry_to_pool),
    }
    .abi_encode()
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rebalance_calldata_selector() {
        let data = encode_rebalance_no_swaps();
        assert_eq!(&data[..4], IPairStrategy::rebalanceNoSwapsCall::SELECTOR.as_slice());
        // selector + one bool word
        assert_eq!(data.len(), 4 + 32);
        assert_eq!(data[data.len() - 1], 1);
    }

    #[test]
    fn test_withdraw_step_calldata_roundtrip() {
        let token = Address::repeat_byte(0x11);
        let aggregator = Address::repeat_byte(0x22);
        let data = encode_withdraw_by_agg_step(
            token,
            aggregator,
            U256::from(1_000u64),
            Bytes::from(vec![0xde, 0xad]),
            PlanKind::RepaySwapRepay,
            true,
        );

        let decoded = IPairStrategy::withdrawByAggStepCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.tokenToSwap, token);
        assert_eq!(decoded.aggregator, aggregator);
        assert_eq!(decoded.amountToSwap, U256::from(1_000u64));
        assert_eq!(decoded.swapData, Bytes::from(vec![0xde, 0xad]));
        assert_eq!(decoded.entryToPool, U256::from(ENTRY_TO_POOL_IS_ALLOWED));
        assert_eq!(
            PlanKind::decode(&decoded.planEntryData),
            Some(PlanKind::RepaySwapRepay)
        );
    }

    #[test]
    fn test_pool_entry_disabled_flag() {
        let data = encode_withdraw_by_agg_step(
            Address::ZERO,
            Address::ZERO,
            U256::ZERO,
            Bytes::new(),
            PlanKind::SwapRepay,
            false,
        );
        let decoded = IPairStrategy::withdrawByAggStepCall::abi_decode(&data, true).unwrap();
        assert_eq!(decoded.entryToPool, U256::from(ENTRY_TO_POOL_DISABLED));
    }
}
