//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so a client can start with zero
//! configuration against a local ledger.

use std::time::Duration;

use murmur_core::{PollerConfig, SessionConfig};
use murmur_shared::constants::{
    DEFAULT_INCREMENTAL_PAGE_SIZE, DEFAULT_MESSAGE_PAGE_SIZE, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_REFRESH_PAGE_SIZE, DEFAULT_SESSION_TTL_MINUTES,
};
use murmur_shared::Address;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Session key lifetime.
    /// Env: `MURMUR_SESSION_TTL_MINUTES`
    /// Default: `30`
    pub session_ttl_minutes: u32,

    /// Delay between scheduled activity polls.
    /// Env: `MURMUR_POLL_INTERVAL_MS`
    /// Default: `15000`
    pub poll_interval: Duration,

    /// Page size of a full activity refresh and of "load more".
    /// Env: `MURMUR_REFRESH_PAGE_SIZE`
    /// Default: `20`
    pub refresh_page_size: usize,

    /// Page size of each scheduled poll.
    /// Env: `MURMUR_INCREMENTAL_PAGE_SIZE`
    /// Default: `5`
    pub incremental_page_size: usize,

    /// Messages per history page.
    /// Env: `MURMUR_MESSAGE_PAGE_SIZE`
    /// Default: `50`
    pub message_page_size: usize,

    /// Package whose keys a session authorizes.
    /// Env: `MURMUR_PACKAGE_ID`
    /// Default: the zero address (local ledger only).
    pub package_id: Address,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session_ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            refresh_page_size: DEFAULT_REFRESH_PAGE_SIZE,
            incremental_page_size: DEFAULT_INCREMENTAL_PAGE_SIZE,
            message_page_size: DEFAULT_MESSAGE_PAGE_SIZE,
            package_id: Address::zero(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(n) = parse_positive::<u32>(&var, "MURMUR_SESSION_TTL_MINUTES") {
            config.session_ttl_minutes = n;
        }

        if let Some(ms) = parse_positive::<u64>(&var, "MURMUR_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(n) = parse_positive::<usize>(&var, "MURMUR_REFRESH_PAGE_SIZE") {
            config.refresh_page_size = n;
        }

        if let Some(n) = parse_positive::<usize>(&var, "MURMUR_INCREMENTAL_PAGE_SIZE") {
            config.incremental_page_size = n;
        }

        if let Some(n) = parse_positive::<usize>(&var, "MURMUR_MESSAGE_PAGE_SIZE") {
            config.message_page_size = n;
        }

        if let Some(raw) = var("MURMUR_PACKAGE_ID") {
            match Address::parse(&raw) {
                Ok(id) => config.package_id = id,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid MURMUR_PACKAGE_ID, using default");
                }
            }
        }

        // RUST_LOG is read by tracing-subscriber's EnvFilter directly.

        config
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ttl_minutes: self.session_ttl_minutes,
            package_id: self.package_id.clone(),
        }
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            refresh_page_size: self.refresh_page_size,
            incremental_page_size: self.incremental_page_size,
            interval: self.poll_interval,
            ..PollerConfig::default()
        }
    }
}

fn parse_positive<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    let raw = var(key)?;
    match raw.trim().parse::<T>() {
        Ok(n) if n > T::default() => Some(n),
        _ => {
            tracing::warn!(value = %raw, key, "Invalid value, using default");
            None
        }
    }
}
