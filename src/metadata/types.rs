//! Key, token and outcome types for metadata watches

use super::MetadataError;

/// Path of one metadata attribute, relative to the metadata base URL
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey(String);

impl WatchKey {
    /// The attribute announcing a pending instance stop
    pub const STOP_STATE: &'static str = "instance/shutdown-details/stop-state";

    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self(path.trim_start_matches('/').to_string())
    }

    pub fn stop_state() -> Self {
        Self::new(Self::STOP_STATE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-issued version marker (the `ETag` of the last observed value)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeToken(String);

impl ChangeToken {
    /// Sent before any value was observed; never matches a real token, so
    /// the server answers at once with the current value.
    pub const INITIAL: &'static str = "NONE";

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChangeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of one watch attempt
#[derive(Debug)]
pub enum WatchOutcome {
    /// The key exists and currently holds this value
    Found(String),
    /// The key does not exist for this instance
    NotPresent,
    /// The attempt failed and may be retried
    TransportError(MetadataError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_key_strips_leading_slash() {
        let key = WatchKey::new("/instance/shutdown-details/stop-state");
        assert_eq!(key, WatchKey::stop_state());
        assert_eq!(key.to_string(), "instance/shutdown-details/stop-state");
    }
}
