//! Transaction signer and sender for keeper transactions.
//! Uses Alloy providers for type-safe RPC interactions.
//!
//! - Cached nonce: atomic counter avoids an RPC call per transaction
//! - Gas pricing through a configurable [`GasStrategy`]
//! - Every RPC call carries a deadline

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::ChainError;
use crate::gas::{create_gas_strategy, fetch_or_cached, GasParams, GasStrategy, LegacyGasStrategy};
use crate::retry::with_timeout;
use crate::submitter::{AccountNonces, Receipt, TxBackend, TxRequest};

/// Cached nonce manager for fast transaction submission.
/// Tracks the nonce locally with atomic operations.
#[derive(Debug)]
pub struct NonceManager {
    /// Next nonce to hand out
    current: AtomicU64,
    /// Last nonce read from chain
    last_synced: AtomicU64,
}

impl NonceManager {
    pub fn new(initial_nonce: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_nonce),
            last_synced: AtomicU64::new(initial_nonce),
        }
    }

    /// Get next nonce and increment counter.
    #[inline]
    pub fn next(&self) -> u64 {
        self.current.fetch_add(1, Ordering::SeqCst)
    }

    #[inline]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }

    pub fn last_synced(&self) -> u64 {
        self.last_synced.load(Ordering::SeqCst)
    }

    /// Move forward to the chain value if the chain is ahead.
    pub fn sync(&self, chain_nonce: u64) {
        self.current.fetch_max(chain_nonce, Ordering::SeqCst);
        self.last_synced.store(chain_nonce, Ordering::SeqCst);
    }

    /// Reset nonce to chain value (after revert or abandoned nonce).
    pub fn reset(&self, chain_nonce: u64) {
        self.current.store(chain_nonce, Ordering::SeqCst);
        self.last_synced.store(chain_nonce, Ordering::SeqCst);
    }
}

/// Transaction sender with configurable gas strategy.
pub struct TransactionSender {
    url: Url,
    wallet: EthereumWallet,
    pub address: Address,
    chain_id: u64,
    nonce_manager: NonceManager,
    default_gas_limit: u64,
    gas_strategy: Box<dyn GasStrategy>,
    /// Last successfully fetched gas parameters
    cached_gas_params: parking_lot::RwLock<Option<GasParams>>,
    timeout: Duration,
}

/// Default gas limit for keeper calls. `withdrawByAggStep` with a
/// multi-hop aggregator route is the most expensive path.
const DEFAULT_KEEPER_GAS_LIMIT: u64 = 5_000_000;

const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Builder for TransactionSender with flexible configuration.
pub struct TransactionSenderBuilder {
    rpc_url: String,
    chain_id: u64,
    gas_strategy: Option<Box<dyn GasStrategy>>,
    gas_limit: Option<u64>,
    timeout: Duration,
}

impl TransactionSenderBuilder {
    pub fn new(rpc_url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            chain_id,
            gas_strategy: None,
            gas_limit: None,
            timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn gas_strategy(mut self, strategy: Box<dyn GasStrategy>) -> Self {
        self.gas_strategy = Some(strategy);
        self
    }

    pub fn gas_limit(mut self, limit: u64) -> Self {
        self.gas_limit = Some(limit);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set gas strategy from config parameters.
    pub fn gas_from_config(
        mut self,
        pricing_model: &str,
        default_gas_price_gwei: f64,
        max_gas_price_gwei: f64,
        priority_fee_gwei: Option<f64>,
    ) -> Self {
        self.gas_strategy = Some(create_gas_strategy(
            pricing_model,
            default_gas_price_gwei,
            max_gas_price_gwei,
            priority_fee_gwei,
        ));
        self
    }

    /// Parse the key, read the starting nonce and warm the gas cache.
    pub async fn build(self, private_key: &str) -> Result<TransactionSender, ChainError> {
        let signer = parse_private_key(private_key)?;
        let address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let url: Url = self
            .rpc_url
            .parse()
            .map_err(|e| ChainError::InvalidConfig(format!("bad RPC url: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url.clone());

        let initial_nonce = with_timeout(
            "eth_getTransactionCount",
            self.timeout,
            provider.get_transaction_count(address).pending(),
        )
        .await?;

        let gas_strategy = self.gas_strategy.unwrap_or_else(|| {
            Box::new(LegacyGasStrategy::new(
                30_000_000_000,  // 30 gwei default
                500_000_000_000, // 500 gwei max
            ))
        });

        let initial_gas_params = match with_timeout(
            "eth_gasPrice",
            self.timeout,
            gas_strategy.fetch_params(&self.rpc_url),
        )
        .await
        {
            Ok(params) => Some(params),
            Err(e) => {
                warn!(error = %e, "Initial gas fetch failed");
                None
            }
        };

        info!(
            address = %address,
            chain_id = self.chain_id,
            initial_nonce = initial_nonce,
            gas_strategy = gas_strategy.strategy_name(),
            "Transaction sender initialized"
        );

        Ok(TransactionSender {
            url,
            wallet,
            address,
            chain_id: self.chain_id,
            nonce_manager: NonceManager::new(initial_nonce),
            default_gas_limit: self.gas_limit.unwrap_or(DEFAULT_KEEPER_GAS_LIMIT),
            gas_strategy,
            cached_gas_params: parking_lot::RwLock::new(initial_gas_params),
            timeout: self.timeout,
        })
    }
}

/// Parse a hex private key, with or without `0x`.
pub fn parse_private_key(private_key: &str) -> Result<PrivateKeySigner, ChainError> {
    private_key
        .trim()
        .trim_start_matches("0x")
        .parse::<PrivateKeySigner>()
        .map_err(|e| ChainError::Signer(e.to_string()))
}

impl TransactionSender {
    pub fn gas_strategy_name(&self) -> &'static str {
        self.gas_strategy.strategy_name()
    }

    pub fn cached_gas_params(&self) -> Option<GasParams> {
        self.cached_gas_params.read().clone()
    }

    pub fn current_nonce(&self) -> u64 {
        self.nonce_manager.current()
    }

    fn provider(&self) -> impl Provider {
        ProviderBuilder::new().on_http(self.url.clone())
    }

    fn build_request(&self, tx: &TxRequest) -> TransactionRequest {
        let mut request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(tx.to)
            .with_input(tx.data.clone())
            .with_value(tx.value)
            .with_nonce(tx.nonce)
            .with_gas_limit(tx.gas_limit.unwrap_or(self.default_gas_limit))
            .with_chain_id(self.chain_id);
        self.gas_strategy.apply_gas(&mut request, &tx.gas);
        request
    }
}

#[async_trait]
impl TxBackend for TransactionSender {
    fn address(&self) -> Address {
        self.address
    }

    fn reserve_nonce(&self) -> u64 {
        self.nonce_manager.next()
    }

    async fn gas_params(&self) -> Result<GasParams, ChainError> {
        fetch_or_cached(
            self.gas_strategy.as_ref(),
            self.url.as_str(),
            self.timeout,
            &self.cached_gas_params,
        )
        .await
    }

    async fn network_gas_price(&self) -> Result<u128, ChainError> {
        with_timeout("eth_gasPrice", self.timeout, self.provider().get_gas_price()).await
    }

    async fn broadcast(&self, tx: &TxRequest) -> Result<B256, ChainError> {
        let request = self.build_request(tx);

        debug!(
            to = %tx.to,
            nonce = tx.nonce,
            calldata_len = tx.data.len(),
            gas_gwei = tx.gas.gwei(),
            "Broadcasting transaction"
        );

        let provider = ProviderBuilder::new()
            .wallet(self.wallet.clone())
            .on_http(self.url.clone());

        let pending =
            with_timeout("eth_sendRawTransaction", self.timeout, provider.send_transaction(request))
                .await?;
        Ok(*pending.tx_hash())
    }

    async fn receipt(&self, hash: B256) -> Result<Option<Receipt>, ChainError> {
        let receipt = with_timeout(
            "eth_getTransactionReceipt",
            self.timeout,
            self.provider().get_transaction_receipt(hash),
        )
        .await?;

        Ok(receipt.map(|r| Receipt {
            tx_hash: r.transaction_hash,
            block_number: r.block_number,
            gas_used: r.gas_used,
            success: r.status(),
            logs: r.inner.logs().iter().map(|log| log.inner.clone()).collect(),
        }))
    }

    async fn nonces(&self) -> Result<AccountNonces, ChainError> {
        let provider = self.provider();
        let (confirmed, pending) = tokio::try_join!(
            with_timeout(
                "eth_getTransactionCount",
                self.timeout,
                provider.get_transaction_count(self.address).latest(),
            ),
            with_timeout(
                "eth_getTransactionCount",
                self.timeout,
                provider.get_transaction_count(self.address).pending(),
            ),
        )?;
        Ok(AccountNonces { confirmed, pending })
    }

    async fn sync_nonce(&self) -> Result<u64, ChainError> {
        let chain_nonce = with_timeout(
            "eth_getTransactionCount",
            self.timeout,
            self.provider().get_transaction_count(self.address).pending(),
        )
        .await?;
        self.nonce_manager.reset(chain_nonce);
        debug!(nonce = chain_nonce, "Nonce synced from chain");
        Ok(chain_nonce)
    }
}

impl std::fmt::Debug for TransactionSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionSender")
            .field("address", &self.address)
            .field("chain_id", &self.chain_id)
            .field("url", &self.url.as_str())
            .field("gas_strategy", &self.gas_strategy.strategy_name())
            .finish_non_exhaustive()
    }
}
