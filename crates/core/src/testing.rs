//! In-memory collaborators for keeper tests.

use alloy::primitives::{keccak256, Address, Bytes, Log, LogData, B256, U256};
use alloy::sol_types::SolValue;
use async_trait::async_trait;
use keeper_api::{AggregatorQuoteService, AlertSink, Quote, QuoteError, QuoteProvider, QuoteRequest};
use keeper_chain::{
    AccountNonces, ChainError, FuseStatus, GasParams, PositionState, RebalanceConfig, Receipt,
    StateReader, TxBackend, TxRequest,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const TOKEN_A: Address = Address::new([0xa0; 20]);
pub const TOKEN_B: Address = Address::new([0xb0; 20]);
pub const SIGNER: Address = Address::new([0x5e; 20]);

/// A healthy position with nothing to do.
pub fn idle_state() -> PositionState {
    PositionState {
        token_a: TOKEN_A,
        token_b: TOKEN_B,
        fuse_status_a: FuseStatus::Off,
        fuse_status_b: FuseStatus::Off,
        need_rebalance: false,
        locked_percent: 0,
        withdraw_done: false,
        last_rebalance_no_swap: 0,
        total_assets: U256::from(1_000_000u64),
    }
}

#[derive(Debug, Default)]
pub struct MockReader {
    pub states: Mutex<HashMap<Address, PositionState>>,
    pub config: RebalanceConfig,
    pub withdraw_quote: Option<(Address, U256)>,
    pub withdraw_calls: Mutex<Vec<(Address, Bytes)>>,
    /// vault -> splitter; vaults missing here have no code
    pub splitters: HashMap<Address, Address>,
    pub strategies: HashMap<Address, Vec<Address>>,
    pub paused: HashSet<Address>,
    /// Strategies whose state read fails
    pub broken: HashSet<Address>,
}

impl MockReader {
    pub fn new() -> Self {
        Self {
            config: RebalanceConfig {
                locked_percent_for_delayed_rebalance: 3,
                locked_percent_for_forced_rebalance: 50,
                rebalance_debt_delay_secs: 600,
            },
            ..Default::default()
        }
    }

    pub fn with_withdraw_quote(mut self, token: Address, amount: U256) -> Self {
        self.withdraw_quote = Some((token, amount));
        self
    }

    pub fn with_vault(mut self, vault: Address, splitter: Address, strategies: Vec<Address>) -> Self {
        self.splitters.insert(vault, splitter);
        for strategy in &strategies {
            self.states.lock().insert(*strategy, idle_state());
        }
        self.strategies.insert(splitter, strategies);
        self
    }

    pub fn set_state(&self, strategy: Address, state: PositionState) {
        self.states.lock().insert(strategy, state);
    }

    pub fn withdraw_calls(&self) -> Vec<(Address, Bytes)> {
        self.withdraw_calls.lock().clone()
    }
}

#[async_trait]
impl StateReader for MockReader {
    async fn read_position_state(&self, strategy: Address) -> Result<PositionState, ChainError> {
        if self.broken.contains(&strategy) {
            return Err(ChainError::RpcTransient("connection reset".into()));
        }
        self.states
            .lock()
            .get(&strategy)
            .cloned()
            .ok_or_else(|| ChainError::RpcFatal(format!("execution reverted: {strategy}")))
    }

    async fn read_config(&self, _strategy: Address) -> Result<RebalanceConfig, ChainError> {
        Ok(self.config)
    }

    async fn quote_withdraw(
        &self,
        strategy: Address,
        plan_entry_data: Bytes,
    ) -> Result<(Address, U256), ChainError> {
        self.withdraw_calls.lock().push((strategy, plan_entry_data));
        self.withdraw_quote
            .ok_or_else(|| ChainError::RpcFatal("quoteWithdrawByAgg reverted".into()))
    }

    async fn splitter_of(&self, vault: Address) -> Result<Option<Address>, ChainError> {
        Ok(self.splitters.get(&vault).copied())
    }

    async fn strategies_of(&self, splitter: Address) -> Result<Vec<Address>, ChainError> {
        Ok(self.strategies.get(&splitter).cloned().unwrap_or_default())
    }

    async fn is_paused(&self, _splitter: Address, strategy: Address) -> Result<bool, ChainError> {
        Ok(self.paused.contains(&strategy))
    }
}

/// Quote provider returning a fixed output amount.
#[derive(Debug)]
pub struct FixedQuote {
    pub name: &'static str,
    pub amount_out: u64,
}

#[async_trait]
impl QuoteProvider for FixedQuote {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        Ok(Quote {
            provider: self.name,
            token_in: request.token_in,
            token_out: request.token_out,
            amount_in: request.amount_in,
            amount_out: U256::from(self.amount_out),
            target: Address::repeat_byte(0xee),
            call_data: Bytes::from(vec![0x12, 0x34, 0x56, 0x78]),
        })
    }
}

/// Quote provider that always errors.
#[derive(Debug)]
pub struct FailingQuote(pub &'static str);

#[async_trait]
impl QuoteProvider for FailingQuote {
    fn name(&self) -> &'static str {
        self.0
    }

    async fn quote(&self, _request: &QuoteRequest) -> Result<Quote, QuoteError> {
        Err(QuoteError::Provider {
            provider: self.0,
            reason: "HTTP 503".into(),
        })
    }
}

pub fn quotes(providers: &[(&'static str, u64)]) -> AggregatorQuoteService {
    providers.iter().fold(
        AggregatorQuoteService::new(Duration::from_secs(5)),
        |service, &(name, amount_out)| {
            service.with_provider(Arc::new(FixedQuote { name, amount_out }))
        },
    )
}

/// Backend that mines every transaction on its first receipt query.
#[derive(Debug, Default)]
pub struct MockChain {
    pub(crate) next_nonce: AtomicU64,
    pub broadcasts: Mutex<Vec<TxRequest>>,
    /// Transactions to these targets revert
    pub reverting: HashSet<Address>,
    /// Nothing is ever mined and replacements are rejected
    pub stalled: bool,
    /// Logs attached to receipts of transactions sent to a target
    pub logs: HashMap<Address, Vec<Log>>,
}

impl MockChain {
    pub fn sent(&self) -> Vec<TxRequest> {
        self.broadcasts.lock().clone()
    }

    fn hash_of(index: usize) -> B256 {
        B256::from(U256::from(index as u64 + 1))
    }
}

#[async_trait]
impl TxBackend for MockChain {
    fn address(&self) -> Address {
        SIGNER
    }

    fn reserve_nonce(&self) -> u64 {
        self.next_nonce.fetch_add(1, Ordering::SeqCst)
    }

    async fn gas_params(&self) -> Result<GasParams, ChainError> {
        Ok(GasParams::Legacy {
            gas_price: 30_000_000_000,
        })
    }

    async fn network_gas_price(&self) -> Result<u128, ChainError> {
        Ok(30_000_000_000)
    }

    async fn broadcast(&self, tx: &TxRequest) -> Result<B256, ChainError> {
        let mut broadcasts = self.broadcasts.lock();
        let replacement = !tx.data.is_empty() && broadcasts.iter().any(|prev| prev.nonce == tx.nonce);
        if self.stalled && replacement {
            return Err(ChainError::RpcFatal("replacement transaction underpriced".into()));
        }
        broadcasts.push(tx.clone());
        Ok(Self::hash_of(broadcasts.len() - 1))
    }

    async fn receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError> {
        if self.stalled {
            return Ok(None);
        }
        let broadcasts = self.broadcasts.lock();
        let Some(tx) = (0..broadcasts.len())
            .find(|i| Self::hash_of(*i) == hash)
            .map(|i| &broadcasts[i])
        else {
            return Ok(None);
        };

        Ok(Some(Receipt {
            tx_hash: hash,
            block_number: Some(42),
            gas_used: 300_000,
            success: !self.reverting.contains(&tx.to),
            logs: self.logs.get(&tx.to).cloned().unwrap_or_default(),
        }))
    }

    async fn nonces(&self) -> Result<AccountNonces, ChainError> {
        let n = self.next_nonce.load(Ordering::SeqCst);
        Ok(AccountNonces {
            confirmed: n,
            pending: n,
        })
    }

    async fn sync_nonce(&self) -> Result<u64, ChainError> {
        Ok(self.next_nonce.load(Ordering::SeqCst))
    }
}

/// `Rebalanced(loss, profitToCover, coveredByRewards)` emitted by `emitter`.
pub fn rebalanced_log(emitter: Address, loss: u64) -> Log {
    let topic = keccak256("Rebalanced(uint256,uint256,uint256)");
    let data = (U256::from(loss), U256::ZERO, U256::ZERO).abi_encode();
    Log {
        address: emitter,
        data: LogData::new_unchecked(vec![topic], data.into()),
    }
}

#[derive(Debug, Default)]
pub struct RecordingAlerts {
    pub messages: Mutex<Vec<String>>,
}

impl RecordingAlerts {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn notify(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}
