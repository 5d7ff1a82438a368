//! 0x swap API adapter.

use super::{fetch_json, normalize, Quote, QuoteProvider, QuoteRequest};
use crate::error::QuoteError;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

const NAME: &str = "0x";

/// 0x swap API client.
#[derive(Clone)]
pub struct ZeroExProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for ZeroExProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZeroExProvider")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl ZeroExProvider {
    pub fn new(chain_id: u64, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: Self::default_base_url(chain_id).to_string(),
            api_key,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 0x serves each chain from its own host.
    fn default_base_url(chain_id: u64) -> &'static str {
        match chain_id {
            10 => "https://optimism.api.0x.org",
            56 => "https://bsc.api.0x.org",
            137 => "https://polygon.api.0x.org",
            8453 => "https://base.api.0x.org",
            42161 => "https://arbitrum.api.0x.org",
            _ => "https://api.0x.org",
        }
    }

    fn query(request: &QuoteRequest) -> Vec<(&'static str, String)> {
        vec![
            ("sellToken", request.token_in.to_string()),
            ("buyToken", request.token_out.to_string()),
            ("sellAmount", request.amount_in.to_string()),
            ("takerAddress", request.requester.to_string()),
            ("slippagePercentage", request.slippage_fraction()),
            ("skipValidation", request.disable_estimate.to_string()),
        ]
    }

    fn convert_response(request: &QuoteRequest, response: ZeroExQuoteResponse) -> Result<Quote, QuoteError> {
        normalize(NAME, request, &response.to, &response.data, &response.buy_amount)
    }
}

#[async_trait]
impl QuoteProvider for ZeroExProvider {
    fn name(&self) -> &'static str {
        NAME
    }

    #[instrument(skip_all, fields(provider = NAME))]
    async fn quote(&self, request: &QuoteRequest) -> Result<Quote, QuoteError> {
        let url = format!("{}/swap/v1/quote", self.base_url);
        debug!(url = %url, amount = %request.amount_in, "Requesting 0x quote");

        let mut builder = self.client.get(&url).query(&Self::query(request));
        if let Some(key) = &self.api_key {
            builder = builder.header("0x-api-key", key);
        }

        let response: ZeroExQuoteResponse = fetch_json(NAME, builder).await?;
        Self::convert_response(request, response)
    }
}

// API response types

#[derive(Debug, Deserialize)]
struct ZeroExQuoteResponse {
    to: String,
    data: String,
    #[serde(rename = "buyAmount")]
    buy_amount: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};

    fn request() -> QuoteRequest {
        QuoteRequest::new(
            Address::repeat_byte(0xaa),
            Address::repeat_byte(0xbb),
            U256::from(10u64).pow(U256::from(18u64)),
            Address::repeat_byte(0xcc),
        )
    }

    #[test]
    fn test_chain_hosts() {
        assert_eq!(
            ZeroExProvider::new(137, None).base_url,
            "https://polygon.api.0x.org"
        );
        assert_eq!(ZeroExProvider::new(1, None).base_url, "https://api.0x.org");
    }

    #[test]
    fn test_query_uses_fraction_slippage() {
        let query = ZeroExProvider::query(&request());
        assert!(query.contains(&("slippagePercentage", "0.01".to_string())));
        assert!(query.contains(&("sellAmount", "1000000000000000000".to_string())));
    }

    #[test]
    fn test_parse_quote_response() {
        let body = r#"{
            "chainId": 137,
            "price": "1843.12",
            "to": "0xdef1c0ded9bec7f1a1670819833240f027b25eff",
            "data": "0x415565b0000000000000000000000000",
            "value": "0",
            "gas": "350000",
            "buyAmount": "1843120000",
            "sellAmount": "1000000000000000000",
            "allowanceTarget": "0xdef1c0ded9bec7f1a1670819833240f027b25eff"
        }"#;

        let response: ZeroExQuoteResponse = serde_json::from_str(body).unwrap();
        let quote = ZeroExProvider::convert_response(&request(), response).unwrap();

        assert_eq!(quote.provider, "0x");
        assert_eq!(quote.amount_out, U256::from(1_843_120_000u64));
        assert_eq!(quote.call_data.len(), 16);
    }

    #[test]
    fn test_validation_error_body_is_rejected() {
        let body = r#"{"code": 100, "reason": "Validation Failed", "validationErrors": []}"#;
        assert!(serde_json::from_str::<ZeroExQuoteResponse>(body).is_err());
    }
}
