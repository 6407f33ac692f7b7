//! Client configuration

use crate::connection::ConnectionSettings;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub socket_url: String,
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub typing_idle_ms: u64,
    pub dedup_window_ms: i64,
    pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000".to_string(),
            socket_url: "http://localhost:5000".to_string(),
            reconnect_delay_ms: 3000,
            connect_timeout_ms: 20_000,
            typing_idle_ms: 1000,
            dedup_window_ms: 1000,
            request_timeout_secs: 30,
        }
    }
}

impl ClientConfig {
    pub fn load(data_dir: &Path) -> Result<Self> {
        let config_path = data_dir.join("config.json");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let config_path = data_dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Applies `IISPPR_API_URL` and `IISPPR_SOCKET_URL` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("IISPPR_API_URL") {
            self.api_base_url = url;
        }
        if let Ok(url) = std::env::var("IISPPR_SOCKET_URL") {
            self.socket_url = url;
        }
        self
    }

    pub fn http_url(&self) -> String {
        self.api_base_url.trim_end_matches('/').to_string()
    }

    /// Socket.IO websocket endpoint derived from `socket_url`.
    pub fn ws_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.socket_url)?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(Error::Connection(format!(
                    "unsupported socket scheme: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::Connection("cannot set socket scheme".into()))?;
        url.set_path("/socket.io/");
        url.set_query(Some("EIO=4&transport=websocket"));
        Ok(url.to_string())
    }

    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
        }
    }

    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
