//! Configuration parsing for the vx5 client.
//!
//! The runner reads its settings from a single JSON config file: the
//! WebSocket endpoint, connection tuning knobs, optional API credentials,
//! and a list of channels to subscribe to at startup.
//!
//! # Example config
//!
//! ```json
//! {
//!   "ws_endpoint": "wss://ws.example.com:8443/ws/v5/private",
//!   "dial_timeout_ms": 5000,
//!   "ping_interval_sec": 10,
//!   "credentials": {
//!     "api_key": "...",
//!     "secret_key": "...",
//!     "passphrase": "..."
//!   },
//!   "subscriptions": [
//!     { "channel": "tickers", "instId": "BTC-USDT" },
//!     { "channel": "books", "instId": "BTC-USDT" }
//!   ]
//! }
//! ```

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

/// API credentials for the private endpoint.
///
/// Immutable once set; owned by the client instance after login.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// API key.
    pub api_key: String,
    /// Secret key used for HMAC-SHA256 signing.
    pub secret_key: String,
    /// API passphrase.
    pub passphrase: String,
    /// Optional sub-account identifier.
    pub account_id: Option<String>,
}

// Secrets stay out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("secret_key", &"<redacted>")
            .field("passphrase", &"<redacted>")
            .field("account_id", &self.account_id)
            .finish()
    }
}

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// WebSocket endpoint URL.
    pub ws_endpoint: String,

    /// Dial timeout in milliseconds (default: 5000).
    pub dial_timeout_ms: Option<u64>,

    /// Heartbeat ping interval in seconds (default: 10).
    pub ping_interval_sec: Option<u64>,

    /// Optional credentials for the private endpoint.
    pub credentials: Option<Credentials>,

    /// Channel argument groups to subscribe to at startup.
    #[serde(default)]
    pub subscriptions: Vec<HashMap<String, String>>,
}

impl AppConfig {
    /// Effective dial timeout.
    pub fn dial_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.dial_timeout_ms.unwrap_or(5000))
    }

    /// Effective heartbeat interval.
    pub fn ping_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ping_interval_sec.unwrap_or(10))
    }
}

/// Load and parse a config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}
