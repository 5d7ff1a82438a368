//! OpenOcean swap API adapter.

use super::{fetch_json, normalize, Quote, QuoteProvider, QuoteRequest};
use crate::error::QuoteError;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

const NAME: &str = "openocean";

/// OpenOcean v4 API client. Amounts are sent in raw token units.
#[derive(Clone)]
pub struct OpenOceanProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    /// Gas price hint in wei passed to the router builder.
    gas_price_wei: Option<u128>,
}

impl std::fmt::Debug for OpenOceanProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenOceanProvider")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .field("gas_price_wei", &self.gas_price_wei)
            .finish()
    }
}

impl OpenOceanProvider {
    pub fn new(chain_id: u64, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("https://open-api.openocean.finance/v4/{chain_id}"),
            api_key,
            gas_price_wei: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_gas_price(mut self, gas_price_wei: u128) -> Self {
        self.gas_price_wei = Some(gas_price_wei);
        self
    }

    fn query(&self, request: &QuoteRequest) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("inTokenAddress", request.token_in.to_string()),
            ("outTokenAddress", request.token_out.to_string()),
            ("amountDecimals", request.amount_in.to_string()),
            ("account", request.requester.to_string()),
            ("slippage", request.slippage_percent()),
        ];
        if let Some(gas_price) = self.gas_price_wei {
            query.push(("gasPriceDecimals", gas_price.to_string()));
        }
        if let Some(protocols) = &request.protocols {
            query.push(("enabledDexIds", protocols.clone()));
        }
        query
    }

    fn convert_response(request: &QuoteRequest, response: OpenOceanResponse) -> Result<Quote, QuoteError> {
        if response.code != 200 {
            return Err(QuoteError::provider(
                NAME,
                format!(
                    "code {}: {}",
                    response.code,
                    response.error_msg.unwrap_or_default()
                ),
            ));
        }

        let data = response
            .data
            .ok_or_else(|| QuoteError::malformed(NAME, "missing data"))?;
        normalize(NAME, request, &data.to, &data.data, &data.out_amount)
    }
}

#[async_trait]
impl QuoteProvider for OpenOceanProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip_all, fields(provider = NAME))]
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        let url = format!("{}/swap", self.base_url);
        debug!(url = %url, amount = %request.amount_in, "Requesting OpenOcean swap");

        let mut builder = self.client.get(&url).query(&self.query(request));
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key);
        }

        let response: OpenOceanResponse = fetch_json(NAME, builder).await?;
        Self::convert_response(request, response)
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct OpenOceanResponse {
    code: u32,
    data: Option<OpenOceanSwap>,
    #[serde(rename = "errorMsg", alias = "error")]
    error_msg: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenOceanSwap {
    to: String,
    data: String,
    #[serde(rename = "outAmount")]
    out_amount: String,
}
