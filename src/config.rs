//! Configuration loading and management

use std::time::Duration;

use anyhow::{Context, Result};

/// Link-local address of the metadata server
const DEFAULT_METADATA_HOST: &str = "169.254.169.254";

/// Watcher configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the metadata service, ending with a slash
    pub metadata_url: String,

    /// How long the server may hold a watch request open
    pub watch_timeout: Duration,

    /// Back-off after the watched key was reported absent
    pub not_found_delay: Duration,

    /// Back-off after a transport failure
    pub error_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            metadata_url: metadata_url_for_host(DEFAULT_METADATA_HOST),
            watch_timeout: Duration::from_secs(60),
            not_found_delay: Duration::from_secs(60),
            error_delay: Duration::from_secs(5),
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("GCE_METADATA_HOST") {
            config.metadata_url = metadata_url_for_host(&host);
        }
        if let Some(url) = lookup("SHUTDOWN_WATCHER_METADATA_URL") {
            config.metadata_url = with_trailing_slash(url);
        }

        if let Some(secs) = seconds(&lookup, "SHUTDOWN_WATCHER_TIMEOUT_SEC")? {
            config.watch_timeout = secs;
        }
        if let Some(secs) = seconds(&lookup, "SHUTDOWN_WATCHER_NOT_FOUND_DELAY_SEC")? {
            config.not_found_delay = secs;
        }
        if let Some(secs) = seconds(&lookup, "SHUTDOWN_WATCHER_ERROR_DELAY_SEC")? {
            config.error_delay = secs;
        }

        Ok(config)
    }
}

fn metadata_url_for_host(host: &str) -> String {
    format!("http://{}/computeMetadata/v1/", host.trim_end_matches('/'))
}

fn with_trailing_slash(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

fn seconds(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<Duration>> {
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .with_context(|| format!("{} must be a whole number of seconds, got {:?}", name, raw))
        })
        .transpose()
}
