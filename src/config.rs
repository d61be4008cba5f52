// =============================================================================
// Bridge Configuration — endpoints and ticker pairs with atomic save
// =============================================================================
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields never
// breaks loading an older config file. Environment variables take precedence
// over the file so deployments can be repointed without editing JSON.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn default_datahub_url() -> String {
    "https://atomikdatahub-production.up.railway.app".to_string()
}

fn default_api_base() -> String {
    "https://api.atomiktrading.io".to_string()
}

/// Endpoint and instrument configuration for the bridging core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the tick-data service (http/https; the WebSocket URL is
    /// derived from it).
    #[serde(default = "default_datahub_url")]
    pub datahub_url: String,

    /// Optional API key appended to the data-service WebSocket URL.
    #[serde(default)]
    pub datahub_api_key: String,

    /// Base URL of the backend REST API (accounts, order control).
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Display:contract ticker pairs, e.g. "NQ:NQH6,ES:ESH6".
    #[serde(default)]
    pub futures_tickers: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            datahub_url: default_datahub_url(),
            datahub_api_key: String::new(),
            api_base: default_api_base(),
            futures_tickers: String::new(),
        }
    }
}

impl BridgeConfig {
    /// Build a config from the environment, starting from defaults.
    ///
    /// Reads `.env` first (ignored if absent), then applies
    /// `ATOMIK_DATAHUB_URL`, `ATOMIK_DATAHUB_API_KEY`, `ATOMIK_API_BASE`,
    /// and `ATOMIK_FUTURES_TICKERS`.
    pub fn from_env() -> Self {
        let _ = dotenv::dotenv();

        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Apply environment overrides on top of the current values.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("ATOMIK_DATAHUB_URL") {
            if !url.is_empty() {
                self.datahub_url = url;
            }
        }
        if let Ok(key) = std::env::var("ATOMIK_DATAHUB_API_KEY") {
            self.datahub_api_key = key;
        }
        if let Ok(base) = std::env::var("ATOMIK_API_BASE") {
            if !base.is_empty() {
                self.api_base = base;
            }
        }
        if let Ok(tickers) = std::env::var("ATOMIK_FUTURES_TICKERS") {
            self.futures_tickers = tickers;
        }
    }

    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read bridge config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse bridge config from {}", path.display()))?;

        info!(
            path = %path.display(),
            datahub_url = %config.datahub_url,
            api_base = %config.api_base,
            "bridge config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise bridge config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "bridge config saved (atomic)");
        Ok(())
    }

    /// WebSocket URL of the tick-data service, derived from `datahub_url` by
    /// an http → ws scheme rewrite plus the `/ws` path and optional api key.
    pub fn ws_url(&self) -> String {
        let base = if let Some(rest) = self.datahub_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.datahub_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.datahub_url.clone()
        };
        let base = base.trim_end_matches('/');

        if self.datahub_api_key.is_empty() {
            format!("{base}/ws")
        } else {
            format!("{base}/ws?api_key={}", self.datahub_api_key)
        }
    }
}
