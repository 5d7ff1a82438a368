//! Process-level secrets and endpoints read from the environment.

use anyhow::{Context, Result};

/// Values that never live in the config file.
#[derive(Clone)]
pub struct EnvConfig {
    pub rpc_url: String,
    pub private_key: String,
    pub chain_id: u64,
    pub oneinch_api_key: Option<String>,
    pub zeroex_api_key: Option<String>,
    pub openocean_api_key: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl std::fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvConfig")
            .field("rpc_url", &self.rpc_url)
            .field("private_key", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("oneinch_api_key", &self.oneinch_api_key.is_some())
            .field("zeroex_api_key", &self.zeroex_api_key.is_some())
            .field("openocean_api_key", &self.openocean_api_key.is_some())
            .field("telegram", &self.telegram().is_some())
            .finish()
    }
}

impl EnvConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let rpc_url = get("RPC_URL").context("RPC_URL not set")?;
        let private_key = get("PRIVATE_KEY").context("PRIVATE_KEY not set")?;
        let chain_id = get("CHAIN_ID")
            .context("CHAIN_ID not set")?
            .trim()
            .parse()
            .context("CHAIN_ID must be an integer")?;

        Ok(Self {
            rpc_url,
            private_key,
            chain_id,
            oneinch_api_key: get("ONEINCH_API_KEY"),
            zeroex_api_key: get("ZEROEX_API_KEY"),
            openocean_api_key: get("OPENOCEAN_API_KEY"),
            telegram_bot_token: get("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: get("TELEGRAM_CHAT_ID"),
        })
    }

    /// Bot token and chat id, when both are present.
    pub fn telegram(&self) -> Option<(&str, &str)> {
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat)) => Some((token.as_str(), chat.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        move |k: &str| map.get(k).map(|v| v.to_string())
    }

    #[test]
    fn test_required_values() {
        let env = EnvConfig::from_lookup(lookup(&[
            ("RPC_URL", "http://localhost:8545"),
            ("PRIVATE_KEY", "0xabc"),
            ("CHAIN_ID", "137"),
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("ZEROEX_API_KEY", ""),
        ]))
        .unwrap();

        assert_eq!(env.chain_id, 137);
        assert!(env.zeroex_api_key.is_none());
        // chat id missing
        assert!(env.telegram().is_none());
        assert!(!format!("{env:?}").contains("0xabc"));
    }

    #[test]
    fn test_missing_values() {
        let err = EnvConfig::from_lookup(lookup(&[("RPC_URL", "http://x")])).unwrap_err();
        assert!(err.to_string().contains("PRIVATE_KEY"));

        let err = EnvConfig::from_lookup(lookup(&[
            ("RPC_URL", "http://x"),
            ("PRIVATE_KEY", "0x1"),
            ("CHAIN_ID", "polygon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("CHAIN_ID"));
    }
}
