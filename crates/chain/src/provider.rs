//! RPC-backed [`StateReader`].
//! Uses Alloy typed contract calls; every call carries a deadline and is
//! retried on transient failures.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, Bytes, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::contracts::{
    default_state, IPairStrategy, IRebalanceDebtConfig, ISplitter, IStrategyReader, IVault,
};
use crate::error::ChainError;
use crate::retry::{retry_rpc, with_timeout, RetryPolicy};
use crate::scheduler::Scheduler;
use crate::state::{
    locked_percent, word_to_u64, FuseStatus, PositionState, RebalanceConfig, StateReader,
};

/// Default deadline for a single RPC read.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(15);

/// Reads strategy state over HTTP JSON-RPC.
#[derive(Clone)]
pub struct ChainStateReader {
    url: Url,
    strategy_reader: Address,
    debt_config: Address,
    scheduler: Arc<dyn Scheduler>,
    retry: RetryPolicy,
    timeout: Duration,
}

/// Raw `getDefaultState` fields the keeper consumes.
#[derive(Debug, PartialEq, Eq)]
struct DefaultState {
    token_a: Address,
    token_b: Address,
    fuse_status_a: FuseStatus,
    fuse_status_b: FuseStatus,
    withdraw_done: bool,
    last_rebalance_no_swap: u64,
}

impl DefaultState {
    /// Decode the `(addr, nums)` pair returned by `getDefaultState`.
    fn from_raw(strategy: Address, addr: &[Address], nums: &[U256]) -> Result<Self, ChainError> {
        if addr.len() < 2 || nums.len() < default_state::NUMS_LEN {
            return Err(ChainError::RpcFatal(format!(
                "getDefaultState of {strategy} returned {} addresses and {} nums",
                addr.len(),
                nums.len()
            )));
        }

        let fuse = |index: usize| {
            let value = word_to_u64(nums[index]);
            FuseStatus::from_raw(value).ok_or_else(|| {
                ChainError::RpcFatal(format!("unknown fuse status {value} for {strategy}"))
            })
        };

        Ok(Self {
            token_a: addr[0],
            token_b: addr[1],
            fuse_status_a: fuse(default_state::FUSE_STATUS_A)?,
            fuse_status_b: fuse(default_state::FUSE_STATUS_B)?,
            withdraw_done: !nums[default_state::WITHDRAW_DONE].is_zero(),
            last_rebalance_no_swap: word_to_u64(nums[default_state::LAST_REBALANCE_NO_SWAP]),
        })
    }
}

impl ChainStateReader {
    pub fn new(
        rpc_url: &str,
        strategy_reader: Address,
        debt_config: Address,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self, ChainError> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::InvalidConfig(format!("bad RPC url {rpc_url}: {e}")))?;

        Ok(Self {
            url,
            strategy_reader,
            debt_config,
            scheduler,
            retry: RetryPolicy::default(),
            timeout: DEFAULT_RPC_TIMEOUT,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn provider(&self) -> impl Provider {
        ProviderBuilder::new().on_http(self.url.clone())
    }

    /// Chain ID reported by the node. Used for the startup reachability check.
    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        let chain_id = retry_rpc(self.scheduler.as_ref(), &self.retry, "eth_chainId", || async {
            with_timeout("eth_chainId", self.timeout, self.provider().get_chain_id()).await
        })
        .await?;
        info!(chain_id = chain_id, "RPC endpoint reachable");
        Ok(chain_id)
    }

    pub async fn block_number(&self) -> Result<u64, ChainError> {
        retry_rpc(self.scheduler.as_ref(), &self.retry, "eth_blockNumber", || async {
            with_timeout("eth_blockNumber", self.timeout, self.provider().get_block_number()).await
        })
        .await
    }

    /// Whether any bytecode is deployed at `address`.
    pub async fn has_code(&self, address: Address) -> Result<bool, ChainError> {
        let code = retry_rpc(self.scheduler.as_ref(), &self.retry, "eth_getCode", || async {
            with_timeout("eth_getCode", self.timeout, self.provider().get_code_at(address)).await
        })
        .await?;
        Ok(!code.is_empty())
    }

    async fn need_rebalance(&self, strategy: Address) -> Result<bool, ChainError> {
        retry_rpc(self.scheduler.as_ref(), &self.retry, "needRebalance", || async {
            let provider = self.provider();
            let contract = IPairStrategy::new(strategy, &provider);
            let result =
                with_timeout("needRebalance", self.timeout, contract.needRebalance().call())
                    .await?;
            Ok(result._0)
        })
        .await
    }

    async fn default_state(&self, strategy: Address) -> Result<DefaultState, ChainError> {
        let raw = retry_rpc(self.scheduler.as_ref(), &self.retry, "getDefaultState", || async {
            let provider = self.provider();
            let contract = IPairStrategy::new(strategy, &provider);
            with_timeout("getDefaultState", self.timeout, contract.getDefaultState().call()).await
        })
        .await?;

        DefaultState::from_raw(strategy, &raw.addr, &raw.nums)
    }

    async fn locked_amount(&self, strategy: Address) -> Result<(U256, U256), ChainError> {
        retry_rpc(self.scheduler.as_ref(), &self.retry, "getLockedUnderlyingAmount", || async {
            let provider = self.provider();
            let reader = IStrategyReader::new(self.strategy_reader, &provider);
            let result = with_timeout(
                "getLockedUnderlyingAmount",
                self.timeout,
                reader.getLockedUnderlyingAmount(strategy).call(),
            )
            .await?;
            Ok((result.estimatedUnderlyingAmount, result.totalAssets))
        })
        .await
    }
}

#[async_trait]
impl StateReader for ChainStateReader {
    #[instrument(skip(self), fields(strategy = %strategy))]
    async fn read_position_state(&self, strategy: Address) -> Result<PositionState, ChainError> {
        let (need_rebalance, state, (locked, total_assets)) = tokio::try_join!(
            self.need_rebalance(strategy),
            self.default_state(strategy),
            self.locked_amount(strategy),
        )?;

        let position = PositionState {
            token_a: state.token_a,
            token_b: state.token_b,
            fuse_status_a: state.fuse_status_a,
            fuse_status_b: state.fuse_status_b,
            need_rebalance,
            locked_percent: locked_percent(locked, total_assets),
            withdraw_done: state.withdraw_done,
            last_rebalance_no_swap: state.last_rebalance_no_swap,
            total_assets,
        };

        debug!(
            need_rebalance = position.need_rebalance,
            locked_percent = position.locked_percent,
            fuse_a = ?position.fuse_status_a,
            fuse_b = ?position.fuse_status_b,
            withdraw_done = position.withdraw_done,
            total_assets = %position.total_assets,
            "Position state read"
        );

        Ok(position)
    }

    async fn read_config(&self, strategy: Address) -> Result<RebalanceConfig, ChainError> {
        let raw = retry_rpc(self.scheduler.as_ref(), &self.retry, "strategyConfig", || async {
            let provider = self.provider();
            let config = IRebalanceDebtConfig::new(self.debt_config, &provider);
            with_timeout(
                "strategyConfig",
                self.timeout,
                config.strategyConfig(strategy).call(),
            )
            .await
        })
        .await?;

        let percent = |word: U256| word_to_u64(word).min(100) as u8;
        Ok(RebalanceConfig {
            locked_percent_for_delayed_rebalance: percent(raw.lockedPercentForDelayedRebalance),
            locked_percent_for_forced_rebalance: percent(raw.lockedPercentForForcedRebalance),
            rebalance_debt_delay_secs: word_to_u64(raw.rebalanceDebtDelay),
        })
    }

    async fn quote_withdraw(
        &self,
        strategy: Address,
        plan_entry_data: Bytes,
    ) -> Result<(Address, U256), ChainError> {
        retry_rpc(self.scheduler.as_ref(), &self.retry, "quoteWithdrawByAgg", || async {
            let provider = self.provider();
            let contract = IPairStrategy::new(strategy, &provider);
            let result = with_timeout(
                "quoteWithdrawByAgg",
                self.timeout,
                contract.quoteWithdrawByAgg(plan_entry_data.clone()).call(),
            )
            .await?;
            Ok((result.tokenToSwap, result.amountToSwap))
        })
        .await
    }

    async fn splitter_of(&self, vault: Address) -> Result<Option<Address>, ChainError> {
        if !self.has_code(vault).await? {
            return Ok(None);
        }

        let splitter = retry_rpc(self.scheduler.as_ref(), &self.retry, "splitter", || async {
            let provider = self.provider();
            let contract = IVault::new(vault, &provider);
            let result = with_timeout("splitter", self.timeout, contract.splitter().call()).await?;
            Ok(result._0)
        })
        .await?;

        Ok((splitter != Address::ZERO).then_some(splitter))
    }

    async fn strategies_of(&self, splitter: Address) -> Result<Vec<Address>, ChainError> {
        let length = retry_rpc(self.scheduler.as_ref(), &self.retry, "strategiesLength", || async {
            let provider = self.provider();
            let contract = ISplitter::new(splitter, &provider);
            let result =
                with_timeout("strategiesLength", self.timeout, contract.strategiesLength().call())
                    .await?;
            Ok(word_to_u64(result._0))
        })
        .await?;

        let mut strategies = Vec::with_capacity(length.min(64) as usize);
        for index in 0..length {
            let strategy = retry_rpc(self.scheduler.as_ref(), &self.retry, "strategies", || async {
                let provider = self.provider();
                let contract = ISplitter::new(splitter, &provider);
                let result = with_timeout(
                    "strategies",
                    self.timeout,
                    contract.strategies(U256::from(index)).call(),
                )
                .await?;
                Ok(result._0)
            })
            .await?;
            strategies.push(strategy);
        }

        Ok(strategies)
    }

    async fn is_paused(&self, splitter: Address, strategy: Address) -> Result<bool, ChainError> {
        retry_rpc(self.scheduler.as_ref(), &self.retry, "pausedStrategies", || async {
            let provider = self.provider();
            let contract = ISplitter::new(splitter, &provider);
            let result = with_timeout(
                "pausedStrategies",
                self.timeout,
                contract.pausedStrategies(strategy).call(),
            )
            .await?;
            Ok(result._0)
        })
        .await
    }
}

impl std::fmt::Debug for ChainStateReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStateReader")
            .field("url", &self.url.as_str())
            .field("strategy_reader", &self.strategy_reader)
            .field("debt_config", &self.debt_config)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
