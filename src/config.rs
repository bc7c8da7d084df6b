//! TOML configuration parsing and startup validation.
//!
//! All components receive their settings from a [`Config`] loaded once at
//! startup by [`load_config`]. Provider credentials are resolved here, so a
//! missing key aborts the process before the first request instead of
//! failing per request.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub provider: ProviderConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Inline credential. Prefer `api_key_env` outside of tests.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default)]
    pub embedding_dims: Option<usize>,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub stream_idle_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_KEY".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_connect_timeout_secs() -> u64 {
    10
}

impl ProviderConfig {
    /// The resolved credential. Only `None` on a config that did not go
    /// through [`load_config`] or [`Config::resolve_credentials`].
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
        }
    }
}

fn default_max_attempts() -> u32 {
    6
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            separator: default_separator(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_separator() -> String {
    "\n\n".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_key_env")]
    pub key_env: String,
    #[serde(default = "default_function")]
    pub function: String,
    /// Per-call bound for remote stores.
    #[serde(default = "default_store_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
            table: default_table(),
            url: None,
            key: None,
            key_env: default_key_env(),
            function: default_function(),
            timeout_secs: default_store_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_table() -> String {
    "chunks".to_string()
}
fn default_key_env() -> String {
    "SUPABASE_KEY".to_string()
}
fn default_function() -> String {
    "match_documents".to_string()
}
fn default_store_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

impl Config {
    /// Fill in credentials from the environment where they are not given
    /// inline. Fails if a required credential is absent.
    pub fn resolve_credentials(&mut self) -> Result<()> {
        if self.provider.api_key().is_none() {
            let key = std::env::var(&self.provider.api_key_env).ok();
            match key.filter(|k| !k.trim().is_empty()) {
                Some(k) => self.provider.api_key = Some(k),
                None => bail!(
                    "provider API key is missing: set {} or provider.api_key",
                    self.provider.api_key_env
                ),
            }
        }

        if self.store.backend == "supabase" && self.store.key.is_none() {
            let key = std::env::var(&self.store.key_env).ok();
            match key.filter(|k| !k.trim().is_empty()) {
                Some(k) => self.store.key = Some(k),
                None => bail!(
                    "supabase key is missing: set {} or store.key",
                    self.store.key_env
                ),
            }
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.retrieval.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }

        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be >= 1");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            bail!("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }

        if !(0.0..=2.0).contains(&self.provider.temperature) {
            bail!("provider.temperature must be in [0.0, 2.0]");
        }
        if self.provider.embedding_dims == Some(0) {
            bail!("provider.embedding_dims must be > 0 when set");
        }
        if self.provider.request_timeout_secs == 0 || self.provider.stream_idle_timeout_secs == 0 {
            bail!("provider timeouts must be > 0");
        }
        if self.store.timeout_secs == 0 || self.store.connect_timeout_secs == 0 {
            bail!("store timeouts must be > 0");
        }

        match self.store.backend.as_str() {
            "memory" => {}
            "sqlite" => {
                if self.store.path.is_none() {
                    bail!("store.path is required when backend is 'sqlite'");
                }
            }
            "supabase" => {
                if self.store.url.is_none() {
                    bail!("store.url is required when backend is 'supabase'");
                }
            }
            other => bail!(
                "Unknown store backend: '{}'. Must be memory, sqlite, or supabase.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.validate()?;
    config.resolve_credentials()?;

    Ok(config)
}
