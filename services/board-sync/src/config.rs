//! Sync client configuration (env-driven).

use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{bail, Context, Result};
use edsb_board::BoardConfig;

use crate::notify::NotifierKind;

/// Board sync configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote key-value API base URL (example: http://localhost:8787).
    pub api_url: String,

    /// Optional bearer token for the API.
    pub api_token: Option<String>,

    /// Directory of the file-backed local cache.
    pub cache_dir: PathBuf,

    /// Configured zones, in display order.
    pub zones: BoardConfig,

    /// Debounce delay for active-board saves.
    pub save_debounce: Duration,

    /// Periodic queue flush interval.
    pub flush_interval: Duration,

    /// HTTP request timeout.
    pub request_timeout: Duration,

    /// Cross-tab change notification mechanism.
    pub notifier: NotifierKind,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = var("EDSB_API_URL").unwrap_or_else(|| "http://localhost:8787".to_string());

        let api_token = var("EDSB_API_TOKEN").filter(|t| !t.trim().is_empty());

        let cache_dir = var("EDSB_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./.edsb-cache"));

        let zone_names = var("EDSB_ZONES").unwrap_or_else(|| "A,B,C,Triage Hold".to_string());
        let zones = BoardConfig::from_zone_names(
            zone_names
                .split(',')
                .map(str::trim)
                .filter(|z| !z.is_empty()),
        );
        if zones.zones.is_empty() {
            bail!("EDSB_ZONES must name at least one zone.");
        }

        let save_debounce_ms: u64 = parse_var(&var, "EDSB_SAVE_DEBOUNCE_MS")?.unwrap_or(300);
        let save_debounce = Duration::from_millis(save_debounce_ms.max(10));

        let flush_interval_ms: u64 = parse_var(&var, "EDSB_FLUSH_INTERVAL_MS")?.unwrap_or(15_000);
        let flush_interval = Duration::from_millis(flush_interval_ms.max(250));

        let timeout_ms: u64 = parse_var(&var, "EDSB_REQUEST_TIMEOUT_MS")?.unwrap_or(10_000);
        let request_timeout = Duration::from_millis(timeout_ms.max(1));

        let notifier = parse_var(&var, "EDSB_NOTIFIER")?.unwrap_or_default();

        let log_level = var("EDSB_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            api_url,
            api_token,
            cache_dir,
            zones,
            save_debounce,
            flush_interval,
            request_timeout,
            notifier,
            log_level,
        })
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|v| v.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("{name} has an invalid value."))
}
