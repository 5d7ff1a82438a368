//! Keeper chain interaction layer.
//!
//! This crate provides:
//! - Contract bindings for pair strategies, vaults and splitters
//! - Typed position state reads with bounded retry
//! - Transaction signing, submission and receipt polling
//! - Speed-up and drop-pending escalation for stuck transactions
//! - Gas strategy abstraction (Legacy + EIP-1559)
//! - A scheduler/poller abstraction so all waiting is testable
//! - Typed event decoding per platform variant

pub mod contracts;
mod error;
mod escalator;
mod events;
pub mod gas;
mod provider;
mod retry;
mod scheduler;
mod signer;
mod state;
mod submitter;

pub use contracts::{
    encode_rebalance_no_swaps, encode_withdraw_by_agg_step, PlanKind, ENTRY_TO_POOL_DISABLED,
    ENTRY_TO_POOL_IS_ALLOWED, PLAN_REPAY_SWAP_REPAY, PLAN_SWAP_ONLY, PLAN_SWAP_REPAY,
};
pub use error::ChainError;
pub use escalator::{EscalationConfig, TransactionEscalator};
pub use events::{ContractKind, EventDecoder, EventTable, PlatformVariant, StrategyEvent};
pub use gas::{GasParams, GasStrategy};
pub use provider::{ChainStateReader, DEFAULT_RPC_TIMEOUT};
pub use retry::{retry_rpc, with_timeout, RetryPolicy};
pub use scheduler::{ManualScheduler, PollPolicy, PollStep, Poller, Scheduler, TokioScheduler};
pub use signer::{parse_private_key, NonceManager, TransactionSender, TransactionSenderBuilder};
pub use state::{
    locked_percent, FuseStatus, PositionState, RebalanceConfig, StateReader,
};
pub use submitter::{
    AccountNonces, PendingTransaction, Receipt, TransactionSubmitter, TxBackend, TxRequest,
    DEFAULT_RECEIPT_POLL,
};
