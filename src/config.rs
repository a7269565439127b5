//! Environment-supplied client configuration.
//!
//! Every setting is optional; unset variables keep their defaults. Variables:
//! `INBOX_API_ENDPOINT`, `INBOX_API_KEY`, `INBOX_DEFAULT_PAGE_SIZE`,
//! `INBOX_POLL_INTERVAL` (ms), `INBOX_ENABLE_POLLING`,
//! `INBOX_REQUEST_TIMEOUT_MS`, `INBOX_BULK_CONCURRENCY`, `INBOX_CREDENTIAL_DB`.

use std::{path::PathBuf, time::Duration};

use crate::{core::cursor::RetreatMode, types::PageSize};

/// Largest page the remote inbox will serve.
pub const MAX_PAGE_SIZE: PageSize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: expected a number, got {value:?}")]
    NotANumber { var: &'static str, value: String },
    #[error("{var}: {value} is out of range ({reason})")]
    OutOfRange {
        var: &'static str,
        value: u64,
        reason: &'static str,
    },
}

#[derive(Debug, Clone)]
pub struct InboxConfig {
    pub api_base_url: String,
    /// Fallback credential used when nothing is stored locally.
    pub api_key: Option<String>,
    pub page_size: PageSize,
    pub poll_interval: Duration,
    pub polling_enabled: bool,
    pub request_timeout: Duration,
    /// Cap on concurrent calls per bulk operation; `None` dispatches all at once.
    pub bulk_concurrency: Option<usize>,
    pub credential_db: PathBuf,
    pub retreat_mode: RetreatMode,
    pub event_channel_capacity: usize,
    pub command_channel_capacity: usize,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000".to_string(),
            api_key: None,
            page_size: 100,
            poll_interval: Duration::from_millis(5000),
            polling_enabled: true,
            request_timeout: Duration::from_secs(30),
            bulk_concurrency: None,
            credential_db: PathBuf::from("inboxsync.db"),
            retreat_mode: RetreatMode::FirstPage,
            event_channel_capacity: 1024,
            command_channel_capacity: 256,
        }
    }
}

impl InboxConfig {
    /// Reads the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(url) = non_empty(lookup("INBOX_API_ENDPOINT")) {
            cfg.api_base_url = url.trim_end_matches('/').to_string();
        }
        cfg.api_key = non_empty(lookup("INBOX_API_KEY"));

        if let Some(size) = parse_u64("INBOX_DEFAULT_PAGE_SIZE", lookup("INBOX_DEFAULT_PAGE_SIZE"))? {
            if size == 0 || size > u64::from(MAX_PAGE_SIZE) {
                return Err(ConfigError::OutOfRange {
                    var: "INBOX_DEFAULT_PAGE_SIZE",
                    value: size,
                    reason: "must be 1..=1000",
                });
            }
            cfg.page_size = size as PageSize;
        }

        if let Some(ms) = parse_u64("INBOX_POLL_INTERVAL", lookup("INBOX_POLL_INTERVAL"))? {
            if ms == 0 {
                return Err(ConfigError::OutOfRange {
                    var: "INBOX_POLL_INTERVAL",
                    value: ms,
                    reason: "must be positive",
                });
            }
            cfg.poll_interval = Duration::from_millis(ms);
        }

        if let Some(flag) = lookup("INBOX_ENABLE_POLLING") {
            cfg.polling_enabled = flag.trim() != "false";
        }

        if let Some(ms) = parse_u64("INBOX_REQUEST_TIMEOUT_MS", lookup("INBOX_REQUEST_TIMEOUT_MS"))? {
            if ms == 0 {
                return Err(ConfigError::OutOfRange {
                    var: "INBOX_REQUEST_TIMEOUT_MS",
                    value: ms,
                    reason: "must be positive",
                });
            }
            cfg.request_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parse_u64("INBOX_BULK_CONCURRENCY", lookup("INBOX_BULK_CONCURRENCY"))? {
            cfg.bulk_concurrency = (n > 0).then_some(n as usize);
        }

        if let Some(path) = non_empty(lookup("INBOX_CREDENTIAL_DB")) {
            cfg.credential_db = PathBuf::from(path);
        }

        Ok(cfg)
    }

    /// Interval handed to the poll scheduler; `None` when polling is off.
    pub fn effective_poll_interval(&self) -> Option<Duration> {
        self.polling_enabled.then_some(self.poll_interval)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_u64(var: &'static str, value: Option<String>) -> Result<Option<u64>, ConfigError> {
    match non_empty(value) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::NotANumber { var, value: raw }),
    }
}
