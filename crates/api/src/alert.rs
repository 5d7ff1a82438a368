//! Outbound alert channels.
//!
//! Alerting is best effort: [`AlertSink::notify`] never fails. Delivery
//! problems are logged locally and swallowed.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Best-effort outbound messaging channel.
#[async_trait]
pub trait AlertSink: Send + Sync + Debug {
    async fn notify(&self, message: &str);
}

/// Writes alerts to the log at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, message: &str) {
        warn!(alert = %message, "ALERT");
    }
}

/// Telegram bot alert sink with duplicate suppression.
#[derive(Clone)]
pub struct TelegramAlertSink {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
    timeout: Duration,
    /// Identical messages within this window are dropped.
    dedup_window: Duration,
    /// message -> last time it was sent
    recent: Arc<DashMap<String, Instant>>,
}

impl Debug for TelegramAlertSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramAlertSink")
            .field("base_url", &self.base_url)
            .field("chat_id", &self.chat_id)
            .field("timeout", &self.timeout)
            .field("dedup_window", &self.dedup_window)
            .field("recent", &self.recent.len())
            .finish()
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramAlertSink {
    pub fn new(bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: "https://api.telegram.org".to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
            timeout: Duration::from_secs(10),
            dedup_window: Duration::from_secs(300),
            recent: Arc::new(DashMap::new()),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Record `message` as sent at `now` unless it was already sent inside
    /// the dedup window.
    fn should_send(&self, message: &str, now: Instant) -> bool {
        // Drop stale entries so the map stays bounded by the window.
        self.recent
            .retain(|_, sent_at| now.saturating_duration_since(*sent_at) < self.dedup_window);

        match self.recent.get(message) {
            Some(_) => false,
            None => {
                self.recent.insert(message.to_string(), now);
                true
            }
        }
    }

    async fn send(&self, message: &str) -> Result<(), String> {
        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text: message,
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            // reqwest errors embed the url, which carries the bot token
            .map_err(|e| e.without_url().to_string())?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(format!("HTTP {status}: {snippet}"));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertSink for TelegramAlertSink {
    async fn notify(&self, message: &str) {
        debug!(alert = %message, "Sending Telegram alert");

        if !self.should_send(message, Instant::now()) {
            debug!("Duplicate alert suppressed");
            return;
        }

        if let Err(e) = self.send(message).await {
            warn!(error = %e, "Failed to deliver Telegram alert");
        }
    }
}

/// Fans one message out to several sinks.
#[derive(Debug, Default, Clone)]
pub struct MultiAlertSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl MultiAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operator alerting: always the log, plus Telegram when a bot token
    /// and chat id are configured.
    pub fn operator(telegram: Option<(&str, &str)>) -> Self {
        let sink = Self::new().with_sink(Arc::new(LogAlertSink));
        match telegram {
            Some((token, chat_id)) => sink.with_sink(Arc::new(TelegramAlertSink::new(token, chat_id))),
            None => sink,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for MultiAlertSink {
    async fn notify(&self, message: &str) {
        futures::future::join_all(self.sinks.iter().map(|sink| sink.notify(message))).await;
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;

    /// Records every message it receives.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        pub messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        async fn notify(&self, message: &str) {
            self.messages.lock().push(message.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::RecordingSink;
    use super::*;

    #[test]
    fn test_dedup_window() {
        let sink = TelegramAlertSink::new("token", "42").with_dedup_window(Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(sink.should_send("fuse triggered", t0));
        assert!(!sink.should_send("fuse triggered", t0 + Duration::from_secs(30)));
        assert!(sink.should_send("another strategy", t0 + Duration::from_secs(30)));
        assert!(sink.should_send("fuse triggered", t0 + Duration::from_secs(61)));
    }

    #[test]
    fn test_debug_hides_token() {
        let sink = TelegramAlertSink::new("123:secret", "42");
        let dbg = format!("{sink:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("42"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_does_not_panic() {
        let sink = TelegramAlertSink::new("token", "42")
            .with_base_url("http://127.0.0.1:1")
            .with_timeout(Duration::from_millis(200));
        sink.notify("hello").await;
    }

    #[tokio::test]
    async fn test_multi_sink_fans_out() {
        let a = Arc::new(RecordingSink::default());
        let b = Arc::new(RecordingSink::default());
        let multi = MultiAlertSink::new()
            .with_sink(a.clone())
            .with_sink(b.clone())
            .with_sink(Arc::new(LogAlertSink));

        multi.notify("escalation failed").await;

        assert_eq!(multi.len(), 3);
        assert_eq!(*a.messages.lock(), vec!["escalation failed".to_string()]);
        assert_eq!(*b.messages.lock(), vec!["escalation failed".to_string()]);
    }

    #[test]
    fn test_operator_sinks() {
        assert_eq!(MultiAlertSink::operator(None).len(), 1);
        assert_eq!(MultiAlertSink::operator(Some(("123:abc", "-100"))).len(), 2);
    }
}
