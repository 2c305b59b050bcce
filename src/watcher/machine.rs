//! Core watcher state machine
//!
//! Each call to [`ShutdownWatcher::step`] performs exactly one watch of the
//! stop-state key and tells the driver whether to call again.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::dispatch::ScriptDispatcher;
use crate::events::{Decision, EventWatcher, WatcherError, RUN_SCRIPT_EVENT, WATCHER_ID};
use crate::metadata::{KeyWatch, WatchOutcome};

/// Stop-state value announcing an imminent instance stop
pub const PENDING_STOP: &str = "PENDING_STOP";

/// The three states of the watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Waiting for the stop-state key to change
    Idle,
    /// Dispatching the graceful shutdown scripts
    Acting,
    /// Scripts dispatched; terminal
    Stopped,
}

impl Default for State {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Idle => write!(f, "Idle"),
            State::Acting => write!(f, "Acting"),
            State::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Back-off applied before the driver's next call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delays {
    /// After the key was reported absent
    pub not_found: Duration,
    /// After a transport failure
    pub transport_error: Duration,
}

impl Default for Delays {
    fn default() -> Self {
        Self {
            not_found: Duration::from_secs(60),
            transport_error: Duration::from_secs(5),
        }
    }
}

impl From<&Config> for Delays {
    fn from(config: &Config) -> Self {
        Self {
            not_found: config.not_found_delay,
            transport_error: config.error_delay,
        }
    }
}

/// Watches the stop-state key and dispatches the graceful shutdown scripts
///
/// The dispatcher fires at most once per watcher: after it ran the watcher
/// stays [`State::Stopped`] and further calls return [`Decision::Stop`]
/// without touching the metadata service, whether or not the driver honors
/// the first `Stop`.
pub struct ShutdownWatcher<W> {
    client: W,
    dispatcher: Arc<dyn ScriptDispatcher>,
    delays: Delays,
    state: State,
}

impl<W: KeyWatch> ShutdownWatcher<W> {
    /// Create a watcher around a key client and a dispatcher
    pub fn new(client: W, dispatcher: Arc<dyn ScriptDispatcher>) -> Self {
        Self {
            client,
            dispatcher,
            delays: Delays::default(),
            state: State::Idle,
        }
    }

    pub fn with_delays(mut self, delays: Delays) -> Self {
        self.delays = delays;
        self
    }

    /// Get the current state
    #[cfg(test)]
    pub fn state(&self) -> State {
        self.state
    }

    /// Perform one watch attempt and decide what the driver does next
    pub async fn step(&mut self, cancel: &CancellationToken) -> Result<Decision, WatcherError> {
        if self.state == State::Stopped {
            debug!("watcher already stopped, not watching again");
            return Ok(Decision::Stop);
        }

        match self.client.watch(cancel).await? {
            WatchOutcome::NotPresent => {
                debug!(key = %self.client.key(), "stop-state key not present");
                Self::back_off(cancel, self.delays.not_found).await
            }
            WatchOutcome::TransportError(e) => {
                error!(error = %e, key = %self.client.key(), "error watching graceful shutdown metadata");
                Self::back_off(cancel, self.delays.transport_error).await
            }
            WatchOutcome::Found(value) if value.trim() == PENDING_STOP => {
                self.transition_to(State::Acting);
                self.dispatcher.run_action().await;
                self.transition_to(State::Stopped);
                Ok(Decision::Stop)
            }
            WatchOutcome::Found(value) => {
                debug!(value = value.trim(), "no stop pending");
                Ok(Decision::Continue)
            }
        }
    }

    /// Sleep for `delay` unless cancelled first
    async fn back_off(cancel: &CancellationToken, delay: Duration) -> Result<Decision, WatcherError> {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("back-off cancelled");
                Err(WatcherError::Cancelled)
            }
            _ = tokio::time::sleep(delay) => Ok(Decision::Continue),
        }
    }

    fn transition_to(&mut self, new_state: State) {
        info!(from = %self.state, to = %new_state, "watcher state transition");
        self.state = new_state;
    }
}

#[async_trait]
impl<W: KeyWatch> EventWatcher for ShutdownWatcher<W> {
    fn id(&self) -> &'static str {
        WATCHER_ID
    }

    fn events(&self) -> Vec<&'static str> {
        vec![RUN_SCRIPT_EVENT]
    }

    async fn run(
        &mut self,
        cancel: &CancellationToken,
        event_type: &str,
    ) -> Result<Decision, WatcherError> {
        debug!(event = event_type, "running graceful shutdown watcher");
        self.step(cancel).await
    }
}
