use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::lsp::{ClientConfig, Snippet};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write config to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_force_delay_ms")]
    pub force_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            force_delay_ms: default_force_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_lsp_host")]
    pub lsp_host: String,
    #[serde(default = "default_language_id")]
    pub language_id: String,
    #[serde(default = "default_document_uri")]
    pub document_uri: String,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub snippets: Vec<Snippet>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            lsp_host: default_lsp_host(),
            language_id: default_language_id(),
            document_uri: default_document_uri(),
            reconnect: ReconnectConfig::default(),
            health_check_interval_ms: default_health_check_interval_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            snippets: Vec::new(),
        }
    }
}

impl BridgeConfig {
    /// Runtime settings for the LSP client
    ///
    /// Zero intervals and delays are raised to 1ms, and the maximum
    /// reconnect delay never drops below the base delay.
    pub fn client_config(&self) -> ClientConfig {
        let base_delay_ms = at_least_one_ms("reconnect.base_delay_ms", self.reconnect.base_delay_ms);
        ClientConfig {
            language_id: self.language_id.clone(),
            document_uri: self.document_uri.clone(),
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect.max_delay_ms.max(base_delay_ms)),
            force_reconnect_delay: Duration::from_millis(at_least_one_ms(
                "reconnect.force_delay_ms",
                self.reconnect.force_delay_ms,
            )),
            health_check_interval: Duration::from_millis(at_least_one_ms(
                "health_check_interval_ms",
                self.health_check_interval_ms,
            )),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}

fn at_least_one_ms(field: &str, value: u64) -> u64 {
    if value == 0 {
        warn!(field, "zero is not a usable period, using 1ms");
        1
    } else {
        value
    }
}

fn default_lsp_host() -> String {
    // Environment variable wins over the local pylsp default
    std::env::var("LSP_HOST").unwrap_or_else(|_| "localhost:2087".to_string())
}

fn default_language_id() -> String {
    "python".to_string()
}

fn default_document_uri() -> String {
    "inmemory://model.py".to_string()
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_force_delay_ms() -> u64 {
    500
}

fn default_health_check_interval_ms() -> u64 {
    5000
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

pub fn default_config_path() -> PathBuf {
    let Some(dirs) = ProjectDirs::from("com", "zaguan", "lsp-bridge") else {
        return Path::new("lsp-bridge.json").to_path_buf();
    };
    dirs.config_dir().join("config.json")
}

pub fn load_config(path: &Path) -> BridgeConfig {
    let Ok(bytes) = fs::read(path) else {
        return BridgeConfig::default();
    };
    serde_json::from_slice::<BridgeConfig>(&bytes).unwrap_or_else(|e| {
        warn!(path = %path.display(), "invalid config, using defaults: {}", e);
        BridgeConfig::default()
    })
}

pub fn save_config(path: &Path, cfg: &BridgeConfig) -> Result<(), ConfigError> {
    let json = serde_json::to_vec_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, json).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}
