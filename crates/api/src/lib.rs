//! HTTP clients for the keeper's off-chain collaborators.
//!
//! This crate provides:
//! - Swap quote aggregation across 1inch, 0x and OpenOcean
//! - Alert sinks (Telegram, log-only, fan-out)

mod alert;
mod error;
pub mod swap;

pub use alert::{AlertSink, LogAlertSink, MultiAlertSink, TelegramAlertSink};
pub use error::QuoteError;
pub use swap::{
    AggregatorQuoteService, OneInchProvider, OpenOceanProvider, Quote, QuoteProvider, QuoteRequest,
    QuoteSettings, ZeroExProvider,
};
