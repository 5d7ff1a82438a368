//! Typed decoding of keeper transaction logs.
//!
//! Each platform variant gets a static table mapping
//! `(ContractKind, event name)` to a decoder. The table is picked once per
//! vault; decoding a receipt is a topic lookup, never a name-string search.

use alloy::primitives::{Address, Log, LogData, B256, U256};
use alloy::sol;
use alloy::sol_types::SolEvent;
use serde::{Deserialize, Serialize};

sol! {
    event Rebalanced(uint256 loss, uint256 profitToCover, uint256 coveredByRewards);
    event RebalancedDebt(uint256 loss, uint256 profitToCover, uint256 coveredByRewards);
    event FuseStatusChanged(uint256 fuseStatus);
    event RewardsClaimed(address[] tokens, uint256[] amounts);
    event OnRepayBorrow(address poolAdapter, uint256 amountToRepay, address receiver, bool closePosition);
}

/// Liquidity platform a strategy is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformVariant {
    #[default]
    UniswapV3,
    Algebra,
    Kyber,
    Pancake,
}

/// Which contract emitted a log, relative to the strategy being served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractKind {
    /// The strategy itself.
    Strategy,
    /// The lending converter the strategy borrows through.
    Converter,
}

/// Decoded event relevant to keeper reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyEvent {
    Rebalanced {
        loss: U256,
        profit_to_cover: U256,
        covered_by_rewards: U256,
    },
    RebalancedDebt {
        loss: U256,
        profit_to_cover: U256,
        covered_by_rewards: U256,
    },
    FuseStatusChanged {
        status: U256,
    },
    RewardsClaimed {
        tokens: Vec<Address>,
        amounts: Vec<U256>,
    },
    RepaidBorrow {
        amount: U256,
        close_position: bool,
    },
}

impl std::fmt::Display for StrategyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rebalanced { loss, profit_to_cover, covered_by_rewards } => write!(
                f,
                "Rebalanced(loss={loss}, profitToCover={profit_to_cover}, coveredByRewards={covered_by_rewards})"
            ),
            Self::RebalancedDebt { loss, profit_to_cover, covered_by_rewards } => write!(
                f,
                "RebalancedDebt(loss={loss}, profitToCover={profit_to_cover}, coveredByRewards={covered_by_rewards})"
            ),
            Self::FuseStatusChanged { status } => write!(f, "FuseStatusChanged({status})"),
            Self::RewardsClaimed { tokens, .. } => write!(f, "RewardsClaimed({} tokens)", tokens.len()),
            Self::RepaidBorrow { amount, close_position } => {
                write!(f, "RepaidBorrow(amount={amount}, close={close_position})")
            }
        }
    }
}

pub type DecodeFn = fn(&LogData) -> Option<StrategyEvent>;

/// One row of a decoder table.
#[derive(Debug, Clone, Copy)]
pub struct EventDecoder {
    pub contract: ContractKind,
    pub name: &'static str,
    pub topic: B256,
    pub decode: DecodeFn,
}

fn decode_rebalanced(data: &LogData) -> Option<StrategyEvent> {
    let ev = Rebalanced::decode_log_data(data, true).ok()?;
    Some(StrategyEvent::Rebalanced {
        loss: ev.loss,
        profit_to_cover: ev.profitToCover,
        covered_by_rewards: ev.coveredByRewards,
    })
}

fn decode_rebalanced_debt(data: &LogData) -> Option<StrategyEvent> {
    let ev = RebalancedDebt::decode_log_data(data, true).ok()?;
    Some(StrategyEvent::RebalancedDebt {
        loss: ev.loss,
        profit_to_cover: ev.profitToCover,
        covered_by_rewards: ev.coveredByRewards,
    })
}

fn decode_fuse_status(data: &LogData) -> Option<StrategyEvent> {
    let ev = FuseStatusChanged::decode_log_data(data, true).ok()?;
    Some(StrategyEvent::FuseStatusChanged {
        status: ev.fuseStatus,
    })
}

fn decode_rewards_claimed(data: &LogData) -> Option<StrategyEvent> {
    let ev = RewardsClaimed::decode_log_data(data, true).ok()?;
    Some(StrategyEvent::RewardsClaimed {
        tokens: ev.tokens,
        amounts: ev.amounts,
    })
}

fn decode_repay_borrow(data: &LogData) -> Option<StrategyEvent> {
    let ev = OnRepayBorrow::decode_log_data(data, true).ok()?;
    Some(StrategyEvent::RepaidBorrow {
        amount: ev.amountToRepay,
        close_position: ev.closePosition,
    })
}

const REBALANCED: EventDecoder = EventDecoder {
    contract: ContractKind::Strategy,
    name: "Rebalanced",
    topic: Rebalanced::SIGNATURE_HASH,
    decode: decode_rebalanced,
};

const REBALANCED_DEBT: EventDecoder = EventDecoder {
    contract: ContractKind::Strategy,
    name: "RebalancedDebt",
    topic: RebalancedDebt::SIGNATURE_HASH,
    decode: decode_rebalanced_debt,
};

const FUSE_STATUS_CHANGED: EventDecoder = EventDecoder {
    contract: ContractKind::Strategy,
    name: "FuseStatusChanged",
    topic: FuseStatusChanged::SIGNATURE_HASH,
    decode: decode_fuse_status,
};

const REWARDS_CLAIMED: EventDecoder = EventDecoder {
    contract: ContractKind::Strategy,
    name: "RewardsClaimed",
    topic: RewardsClaimed::SIGNATURE_HASH,
    decode: decode_rewards_claimed,
};

const ON_REPAY_BORROW: EventDecoder = EventDecoder {
    contract: ContractKind::Converter,
    name: "OnRepayBorrow",
    topic: OnRepayBorrow::SIGNATURE_HASH,
    decode: decode_repay_borrow,
};

static CONCENTRATED_EVENTS: [EventDecoder; 4] =
    [REBALANCED, REBALANCED_DEBT, FUSE_STATUS_CHANGED, ON_REPAY_BORROW];

// Farming variants additionally claim rewards during rebalance.
static FARMING_EVENTS: [EventDecoder; 5] = [
    REBALANCED,
    REBALANCED_DEBT,
    FUSE_STATUS_CHANGED,
    REWARDS_CLAIMED,
    ON_REPAY_BORROW,
];

/// Decoder table selected for one platform variant.
#[derive(Debug, Clone, Copy)]
pub struct EventTable {
    platform: PlatformVariant,
    decoders: &'static [EventDecoder],
}

impl EventTable {
    pub fn for_platform(platform: PlatformVariant) -> Self {
        let decoders: &'static [EventDecoder] = match platform {
            PlatformVariant::UniswapV3 | PlatformVariant::Algebra => &CONCENTRATED_EVENTS,
            PlatformVariant::Kyber | PlatformVariant::Pancake => &FARMING_EVENTS,
        };
        Self { platform, decoders }
    }

    pub fn platform(&self) -> PlatformVariant {
        self.platform
    }

    /// Look up the decoder for a known `(contract, name)` pair.
    pub fn decoder(&self, contract: ContractKind, name: &str) -> Option<&EventDecoder> {
        self.decoders
            .iter()
            .find(|d| d.contract == contract && d.name == name)
    }

    /// Decode a single log emitted by a contract of the given kind.
    pub fn decode(&self, contract: ContractKind, log: &Log) -> Option<(&'static str, StrategyEvent)> {
        let topic = log.data.topics().first()?;
        self.decoders
            .iter()
            .find(|d| d.contract == contract && d.topic == *topic)
            .and_then(|d| (d.decode)(&log.data).map(|ev| (d.name, ev)))
    }

    /// Decode every recognised log of a receipt. Logs from `strategy` are
    /// matched against strategy events, all others against converter events.
    pub fn decode_receipt(&self, strategy: Address, logs: &[Log]) -> Vec<StrategyEvent> {
        logs.iter()
            .filter_map(|log| {
                let kind = if log.address == strategy {
                    ContractKind::Strategy
                } else {
                    ContractKind::Converter
                };
                self.decode(kind, log).map(|(_, ev)| ev)
            })
            .collect()
    }
}
