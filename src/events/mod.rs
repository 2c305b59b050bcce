//! Watcher-to-driver contract
//!
//! The host agent's dispatch loop knows watchers only through
//! [`EventWatcher`]: an identifier, the event names it handles, and a
//! single entry point invoked again and again until it answers
//! [`Decision::Stop`] or fails.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Identifier of the graceful shutdown watcher
pub const WATCHER_ID: &str = "graceful-shutdown-watcher";

/// The only event the graceful shutdown watcher handles
pub const RUN_SCRIPT_EVENT: &str = "graceful-shutdown-watcher,run-script";

/// What the driver should do after one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Invoke the watcher again
    Continue,
    /// The watcher is done for the life of the instance
    Stop,
}

impl Decision {
    /// The "continue polling" flag in boolean form
    pub fn should_continue(self) -> bool {
        matches!(self, Decision::Continue)
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Continue => write!(f, "CONTINUE"),
            Decision::Stop => write!(f, "STOP"),
        }
    }
}

/// Errors surfaced to the driver
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatcherError {
    /// The caller's cancellation token fired; the driver must not re-invoke
    #[error("watch cancelled")]
    Cancelled,
}

/// A pluggable watcher driven by the host agent's dispatch loop
#[async_trait]
pub trait EventWatcher: Send {
    /// Stable identifier of this watcher
    fn id(&self) -> &'static str;

    /// Event names this watcher produces
    fn events(&self) -> Vec<&'static str>;

    /// Perform one unit of work for `event_type`.
    ///
    /// `Err(WatcherError::Cancelled)` implies the driver stops calling.
    async fn run(
        &mut self,
        cancel: &CancellationToken,
        event_type: &str,
    ) -> Result<Decision, WatcherError>;
}
