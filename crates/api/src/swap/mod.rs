//! Swap quote aggregation for debt unwinding.
//!
//! Each [`QuoteProvider`] wraps one third-party aggregator API and
//! normalizes its response into a [`Quote`]. [`AggregatorQuoteService`]
//! queries every configured provider concurrently and keeps the best
//! output.
//!
//! # Supported Providers
//!
//! - `one_inch`: 1inch swap API
//! - `zero_ex`: 0x swap API
//! - `open_ocean`: OpenOcean swap API
//!
//! # Example
//!
//! ```rust,ignore
//! use keeper_api::swap::{AggregatorQuoteService, OneInchProvider, ZeroExProvider};
//!
//! let service = AggregatorQuoteService::new(Duration::from_secs(5))
//!     .with_provider(Arc::new(OneInchProvider::new(137, api_key)))
//!     .with_provider(Arc::new(ZeroExProvider::new(137, zero_ex_key)));
//!
//! let quote = service.get_best_quote(usdc, weth, amount, strategy).await?;
//! ```

mod one_inch;
mod open_ocean;
mod zero_ex;

pub use one_inch::OneInchProvider;
pub use open_ocean::OpenOceanProvider;
pub use zero_ex::ZeroExProvider;

use crate::error::QuoteError;
use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use futures::future::join_all;
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Parameters sent to every provider for one quote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteRequest {
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    /// Account that will execute the swap calldata.
    pub requester: Address,
    /// Slippage tolerance in basis points (e.g., 100 = 1%)
    pub slippage_bps: u16,
    pub disable_estimate: bool,
    pub allow_partial_fill: bool,
    /// Optional provider-specific protocol allow-list.
    pub protocols: Option<String>,
}

impl QuoteRequest {
    pub fn new(token_in: Address, token_out: Address, amount_in: U256, requester: Address) -> Self {
        Self {
            token_in,
            token_out,
            amount_in,
            requester,
            slippage_bps: 100,
            disable_estimate: true,
            allow_partial_fill: false,
            protocols: None,
        }
    }

    /// Slippage as a percentage string ("1", "0.5").
    pub fn slippage_percent(&self) -> String {
        format_bps(self.slippage_bps, 100)
    }

    /// Slippage as a fraction string ("0.01", "0.005").
    pub fn slippage_fraction(&self) -> String {
        format_bps(self.slippage_bps, 10_000)
    }
}

fn format_bps(bps: u16, divisor: u32) -> String {
    let value = f64::from(bps) / f64::from(divisor);
    let s = format!("{value:.6}");
    let trimmed = s.trim_end_matches('0').trim_end_matches('.');
    trimmed.to_string()
}

/// Request-level defaults applied by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteSettings {
    pub slippage_bps: u16,
    pub disable_estimate: bool,
    pub allow_partial_fill: bool,
    pub protocols: Option<String>,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            slippage_bps: 100,
            disable_estimate: true,
            allow_partial_fill: false,
            protocols: None,
        }
    }
}

/// Normalized swap route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub provider: &'static str,
    pub token_in: Address,
    pub token_out: Address,
    pub amount_in: U256,
    pub amount_out: U256,
    /// Contract the calldata must be sent to.
    pub target: Address,
    pub call_data: Bytes,
}

/// One swap aggregator API.
#[async_trait]
pub trait QuoteProvider: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError>;
}

/// Fan-out client over several quote providers.
///
/// Provider order is priority order: on equal `amount_out` the earlier
/// provider wins.
#[derive(Debug, Clone)]
pub struct AggregatorQuoteService {
    providers: Vec<Arc<dyn QuoteProvider>>,
    timeout: Duration,
    settings: QuoteSettings,
}

impl AggregatorQuoteService {
    pub fn new(timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            timeout,
            settings: QuoteSettings::default(),
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn QuoteProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_settings(mut self, settings: QuoteSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Best quote for swapping `amount_in` of `token_in` into `token_out`.
    ///
    /// Providers run concurrently, each under the service timeout. Failed
    /// providers are skipped; if none succeed the call fails with
    /// [`QuoteError::AllAggregatorsFailed`].
    #[instrument(skip_all, fields(token_in = %token_in, token_out = %token_out, amount_in = %amount_in))]
    pub async fn get_best_quote(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
        requester: Address,
    ) -> Result<Quote, QuoteError> {
        let request = QuoteRequest {
            token_in,
            token_out,
            amount_in,
            requester,
            slippage_bps: self.settings.slippage_bps,
            disable_estimate: self.settings.disable_estimate,
            allow_partial_fill: self.settings.allow_partial_fill,
            protocols: self.settings.protocols.clone(),
        };

        let results = join_all(
            self.providers
                .iter()
                .map(|provider| self.quote_with_timeout(provider.as_ref(), &request)),
        )
        .await;

        let mut best: Option<Quote> = None;
        let mut reasons = Vec::new();

        for result in results {
            match result {
                Ok(quote) => {
                    debug!(
                        provider = quote.provider,
                        amount_out = %quote.amount_out,
                        "Quote received"
                    );
                    // Strictly greater: ties keep the higher-priority provider.
                    if best.as_ref().map_or(true, |b| quote.amount_out > b.amount_out) {
                        best = Some(quote);
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Quote provider failed");
                    reasons.push(e.to_string());
                }
            }
        }

        match best {
            Some(quote) => {
                info!(
                    provider = quote.provider,
                    amount_out = %quote.amount_out,
                    target = %quote.target,
                    failed = reasons.len(),
                    "Best quote selected"
                );
                Ok(quote)
            }
            None => Err(QuoteError::AllAggregatorsFailed {
                attempted: self.providers.len(),
                reasons,
            }),
        }
    }

    async fn quote_with_timeout(
        &self,
        provider: &dyn QuoteProvider,
        request: &QuoteRequest,
    ) -> Result<Quote, QuoteError> {
        match tokio::time::timeout(self.timeout, provider.quote(request)).await {
            Ok(result) => result,
            Err(_) => Err(QuoteError::Timeout {
                provider: provider.name(),
                timeout_ms: self.timeout.as_millis(),
            }),
        }
    }
}

/// Send a request and decode its JSON body.
///
/// Non-success status and transport errors map to [`QuoteError::Provider`];
/// a body of the wrong shape maps to [`QuoteError::MalformedResponse`].
pub(crate) async fn fetch_json<T: DeserializeOwned>(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, QuoteError> {
    let response = request
        .send()
        .await
        .map_err(|e| QuoteError::provider(provider, e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| QuoteError::provider(provider, e))?;

    if !status.is_success() {
        let snippet: String = body.chars().take(200).collect();
        return Err(QuoteError::provider(provider, format!("HTTP {status}: {snippet}")));
    }

    serde_json::from_str(&body).map_err(|e| QuoteError::malformed(provider, e))
}

/// Build a [`Quote`] from the raw string fields every aggregator returns.
pub(crate) fn normalize(
    provider: &'static str,
    request: &QuoteRequest,
    to: &str,
    data: &str,
    amount_out: &str,
) -> Result<Quote, QuoteError> {
    let target: Address = to
        .parse()
        .map_err(|e| QuoteError::malformed(provider, format!("target {to:?}: {e}")))?;

    let call_data = hex::decode(data.trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|e| QuoteError::malformed(provider, format!("calldata: {e}")))?;
    if call_data.is_empty() {
        return Err(QuoteError::malformed(provider, "empty calldata"));
    }

    let amount_out: U256 = amount_out
        .parse()
        .map_err(|e| QuoteError::malformed(provider, format!("amount {amount_out:?}: {e}")))?;

    Ok(Quote {
        provider,
        token_in: request.token_in,
        token_out: request.token_out,
        amount_in: request.amount_in,
        amount_out,
        target,
        call_data,
    })
}
