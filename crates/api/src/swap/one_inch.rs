//! 1inch swap API adapter.

use super::{fetch_json, normalize, Quote, QuoteProvider, QuoteRequest};
use crate::error::QuoteError;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

const NAME: &str = "1inch";

/// 1inch aggregation API client.
#[derive(Clone)]
pub struct OneInchProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for OneInchProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OneInchProvider")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl OneInchProvider {
    pub fn new(chain_id: u64, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("https://api.1inch.dev/swap/v5.2/{chain_id}"),
            api_key,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn query(request: &QuoteRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("fromTokenAddress", request.token_in.to_string()),
            ("toTokenAddress", request.token_out.to_string()),
            ("amount", request.amount_in.to_string()),
            ("fromAddress", request.requester.to_string()),
            ("slippage", request.slippage_percent()),
            ("disableEstimate", request.disable_estimate.to_string()),
            ("allowPartialFill", request.allow_partial_fill.to_string()),
        ];
        if let Some(protocols) = &request.protocols {
            query.push(("protocols", protocols.clone()));
        }
        query
    }

    fn convert_response(request: &QuoteRequest, response: OneInchSwapResponse) -> Result<Quote, QuoteError> {
        normalize(
            NAME,
            request,
            &response.tx.to,
            &response.tx.data,
            &response.to_token_amount,
        )
    }
}

#[async_trait]
impl QuoteProvider for OneInchProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip_all, fields(provider = NAME))]
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        let url = format!("{}/swap", self.base_url);
        debug!(url = %url, amount = %request.amount_in, "Requesting 1inch swap");

        let mut builder = self.client.get(&url).query(&Self::query(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response: OneInchSwapResponse = fetch_json(NAME, builder).await?;
        Self::convert_response(request, response)
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct OneInchSwapResponse {
    #[serde(rename = "toTokenAmount", alias = "toAmount")]
    to_token_amount: String,
    tx: OneInchTx,
}

#[derive(Debug, Deserialize)]
struct OneInchTx {
    to: String,
    data: String,
}
