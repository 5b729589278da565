use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::relay::plan::Limits;

/// Hard caps imposed by Discord on a single message.
const PLATFORM_MAX_TEXT: usize = 2000;
const PLATFORM_MAX_FILES: usize = 10;
const PLATFORM_MAX_EMBEDS: usize = 10;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub watcher: WatcherConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Ordered list of channels every relayed message is sent to.
    #[serde(default)]
    pub destination_channel_ids: Vec<u64>,
    #[serde(default = "default_include_header")]
    pub include_header: bool,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimitsConfig {
    #[serde(default = "default_max_text")]
    pub max_text: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_embeds")]
    pub max_embeds: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_ingest_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub source_channel_ids: Vec<u64>,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_watcher_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_include_header() -> bool {
    true
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_max_text() -> usize {
    PLATFORM_MAX_TEXT
}

fn default_max_files() -> usize {
    PLATFORM_MAX_FILES
}

fn default_max_embeds() -> usize {
    PLATFORM_MAX_EMBEDS
}

fn default_bind() -> String {
    "0.0.0.0:5001".to_string()
}

fn default_ingest_path() -> String {
    "/receive_message".to_string()
}

fn default_endpoint() -> String {
    "http://localhost:5001/receive_message".to_string()
}

fn default_watcher_timeout_secs() -> u64 {
    5
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            destination_channel_ids: Vec::new(),
            include_header: default_include_header(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            send_timeout_secs: default_send_timeout_secs(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_text: default_max_text(),
            max_files: default_max_files(),
            max_embeds: default_max_embeds(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            path: default_ingest_path(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            source_channel_ids: Vec::new(),
            endpoint: default_endpoint(),
            timeout_secs: default_watcher_timeout_secs(),
        }
    }
}

/// Parse a comma-separated list of channel IDs.
///
/// Entries that are not plain non-zero integers are ignored, duplicates are
/// dropped and the order of first appearance is kept.
pub fn parse_channel_ids(raw: &str) -> Vec<u64> {
    let mut ids = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Ok(id) = part.parse::<u64>() {
            if id != 0 && !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// The error worth reporting from a `.env` load. A missing file is normal
/// outside development.
fn dotenv_problem(result: dotenvy::Result<PathBuf>) -> Option<dotenvy::Error> {
    match result {
        Ok(path) => {
            debug!("Loaded environment from {}", path.display());
            None
        }
        Err(e) if e.not_found() => None,
        Err(e) => Some(e),
    }
}

impl Config {
    /// Load `path` if it exists, then fill gaps from the environment.
    pub fn load(path: &Path) -> Result<Self> {
        if let Some(e) = dotenv_problem(dotenvy::dotenv()) {
            warn!("Ignoring unreadable .env file: {e}");
        }

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).context("Invalid TOML")
    }

    /// Fill empty values from environment variables.
    ///
    /// Values present in the config file always win.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.relay.bot_token.is_empty() {
            if let Some(token) = lookup("DISCORD_TOKEN_RELAY") {
                self.relay.bot_token = token;
            }
        }
        if self.relay.destination_channel_ids.is_empty() {
            if let Some(raw) = lookup("TARGET_OUTPUT_CHANNEL_IDS") {
                self.relay.destination_channel_ids = parse_channel_ids(&raw);
            }
        }
        if let Some(port) = lookup("RELAY_PORT").and_then(|p| p.trim().parse::<u16>().ok()) {
            let host = self
                .ingest
                .bind
                .rsplit_once(':')
                .map(|(host, _)| host.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.ingest.bind = format!("{host}:{port}");
        }
        if self.watcher.bot_token.is_empty() {
            if let Some(token) = lookup("DISCORD_TOKEN_WATCHER") {
                self.watcher.bot_token = token;
            }
        }
        if self.watcher.source_channel_ids.is_empty() {
            if let Some(raw) = lookup("TARGET_INPUT_CHANNEL_IDS") {
                self.watcher.source_channel_ids = parse_channel_ids(&raw);
            }
        }
        if let Some(endpoint) = lookup("RELAY_ENDPOINT") {
            if !endpoint.trim().is_empty() {
                self.watcher.endpoint = endpoint.trim().to_string();
            }
        }
    }

    /// Checks that hold regardless of which mode is started.
    pub fn validate(&self) -> Result<()> {
        let limits = &self.relay.limits;
        if limits.max_text == 0 || limits.max_text > PLATFORM_MAX_TEXT {
            anyhow::bail!("relay.limits.max_text must be between 1 and {PLATFORM_MAX_TEXT}");
        }
        if limits.max_files == 0 || limits.max_files > PLATFORM_MAX_FILES {
            anyhow::bail!("relay.limits.max_files must be between 1 and {PLATFORM_MAX_FILES}");
        }
        if limits.max_embeds == 0 || limits.max_embeds > PLATFORM_MAX_EMBEDS {
            anyhow::bail!("relay.limits.max_embeds must be between 1 and {PLATFORM_MAX_EMBEDS}");
        }
        if self.relay.fetch_timeout_secs == 0 || self.relay.send_timeout_secs == 0 {
            anyhow::bail!("relay timeouts must be at least one second");
        }
        if self.watcher.timeout_secs == 0 {
            anyhow::bail!("watcher.timeout_secs must be at least one second");
        }
        if !self.ingest.path.starts_with('/') {
            anyhow::bail!("ingest.path must start with '/'");
        }
        if self.relay.destination_channel_ids.contains(&0)
            || self.watcher.source_channel_ids.contains(&0)
        {
            anyhow::bail!("channel IDs must be non-zero");
        }
        Ok(())
    }

    /// Requirements for `discord-relay relay`.
    pub fn require_relay(&self) -> Result<()> {
        if self.relay.bot_token.trim().is_empty() {
            anyhow::bail!("relay.bot_token is not set (or DISCORD_TOKEN_RELAY)");
        }
        if self.relay.destination_channel_ids.is_empty() {
            anyhow::bail!(
                "No destination channels configured (relay.destination_channel_ids or TARGET_OUTPUT_CHANNEL_IDS)"
            );
        }
        Ok(())
    }

    /// Requirements for `discord-relay watch`.
    pub fn require_watcher(&self) -> Result<()> {
        if self.watcher.bot_token.trim().is_empty() {
            anyhow::bail!("watcher.bot_token is not set (or DISCORD_TOKEN_WATCHER)");
        }
        if self.watcher.source_channel_ids.is_empty() {
            anyhow::bail!(
                "No source channels configured (watcher.source_channel_ids or TARGET_INPUT_CHANNEL_IDS)"
            );
        }
        Ok(())
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_text: self.relay.limits.max_text,
            max_files: self.relay.limits.max_files,
            max_embeds: self.relay.limits.max_embeds,
        }
    }
}
