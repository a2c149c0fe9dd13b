use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::format::DEFAULT_NO_TEXT_PLACEHOLDER;
use crate::timestamp::ClockZone;
use crate::users::DEFAULT_UNKNOWN_SENDER;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub source: WorkspaceConfig,
    pub target: WorkspaceConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub slack: SlackApiConfig,
    #[serde(default)]
    pub display: DisplayConfig,
}

/// A workspace and the channel used in it.
#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    pub token: String,
    pub channel_id: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Page size of each history fetch.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_replies_limit")]
    pub replies_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_webhook_path")]
    pub path: String,
    /// Legacy Events API verification token. Unchecked when absent.
    #[serde(default)]
    pub verification_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SlackApiConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: usize,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DisplayConfig {
    /// `local`, `utc` or a fixed offset such as `+09:00`.
    #[serde(default)]
    pub timezone: ClockZone,
    #[serde(default = "default_no_text_placeholder")]
    pub no_text_placeholder: String,
    #[serde(default = "default_unknown_sender")]
    pub unknown_sender: String,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    10
}

fn default_history_limit() -> usize {
    10
}

fn default_replies_limit() -> usize {
    200
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_webhook_path() -> String {
    "/slack/events".to_string()
}

fn default_api_base() -> String {
    "https://slack.com/api".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_retry_max_attempts() -> usize {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_no_text_placeholder() -> String {
    DEFAULT_NO_TEXT_PLACEHOLDER.to_string()
}

fn default_unknown_sender() -> String {
    DEFAULT_UNKNOWN_SENDER.to_string()
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            interval_secs: default_interval_secs(),
            history_limit: default_history_limit(),
            replies_limit: default_replies_limit(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_bind_address(),
            path: default_webhook_path(),
            verification_token: None,
        }
    }
}

impl Default for SlackApiConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            timezone: ClockZone::default(),
            no_text_placeholder: default_no_text_placeholder(),
            unknown_sender: default_unknown_sender(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (section, workspace) in [("source", &self.source), ("target", &self.target)] {
            if workspace.token.trim().is_empty() {
                bail!("[{section}] token must not be empty");
            }
            if workspace.channel_id.trim().is_empty() {
                bail!("[{section}] channel_id must not be empty");
            }
        }
        if !self.poller.enabled && !self.webhook.enabled {
            bail!("Nothing to do: enable [poller] and/or [webhook]");
        }
        if self.poller.interval_secs == 0 {
            bail!("[poller] interval_secs must be greater than zero");
        }
        if self.poller.history_limit == 0 || self.poller.replies_limit == 0 {
            bail!("[poller] history_limit and replies_limit must be greater than zero");
        }
        if !self.webhook.path.starts_with('/') {
            bail!("[webhook] path must start with '/'");
        }
        Ok(())
    }
}
