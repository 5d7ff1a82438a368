//! Plan entry data for debt-unwind steps.
//!
//! Layout: `abi.encode(uint256 planKind, uint256 propNotUnderlying18)`.
//! Only the first word identifies the plan.

use alloy::primitives::{Bytes, U256};
use alloy::sol_types::SolValue;

pub const PLAN_SWAP_REPAY: u8 = 0;
pub const PLAN_REPAY_SWAP_REPAY: u8 = 1;
/// Encodable, but never selected by the automatic decision path.
pub const PLAN_SWAP_ONLY: u8 = 2;

pub const ENTRY_TO_POOL_DISABLED: u8 = 0;
pub const ENTRY_TO_POOL_IS_ALLOWED: u8 = 1;

/// Debt-unwind sequence a withdrawal step follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlanKind {
    /// Swap collateral, then repay. Used while a fuse is triggered.
    SwapRepay = PLAN_SWAP_REPAY,
    /// Repay, swap, repay again. Used for routine debt reduction.
    RepaySwapRepay = PLAN_REPAY_SWAP_REPAY,
    SwapOnly = PLAN_SWAP_ONLY,
}

impl PlanKind {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            PLAN_SWAP_REPAY => Some(Self::SwapRepay),
            PLAN_REPAY_SWAP_REPAY => Some(Self::RepaySwapRepay),
            PLAN_SWAP_ONLY => Some(Self::SwapOnly),
            _ => None,
        }
    }

    /// Target proportion of the non-underlying asset (18 decimals).
    /// `U256::MAX` keeps the current proportions.
    fn prop_not_underlying(self) -> U256 {
        match self {
            Self::RepaySwapRepay => U256::MAX,
            Self::SwapRepay | Self::SwapOnly => U256::ZERO,
        }
    }

    pub fn encode(self) -> Bytes {
        (U256::from(self.id()), self.prop_not_underlying())
            .abi_encode()
            .into()
    }

    pub fn decode(data: &[u8]) -> Option<Self> {
        let word = data.get(..32)?;
        let kind = U256::from_be_slice(word);
        if kind > U256::from(u8::MAX) {
            return None;
        }
        Self::from_id(kind.to::<u8>())
    }
}

impl std::fmt::Display for PlanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SwapRepay => "swap-repay",
            Self::RepaySwapRepay => "repay-swap-repay",
            Self::SwapOnly => "swap-only",
        };
        f.write_str(name)
    }
}
