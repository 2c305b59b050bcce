//! Script dispatch module
//!
//! Starts the local graceful shutdown scripts once a stop is announced.
//! Dispatch is best effort: failures are logged here and never reach the
//! watcher, since the instance stops whether or not the scripts ran.

mod runner;
mod systemd;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

pub use runner::ScriptRunnerDispatcher;
pub use systemd::SystemdDispatcher;

/// Argument selecting the graceful shutdown action of the script runner
pub const GRACEFUL_SHUTDOWN_ACTION: &str = "graceful-shutdown";

/// Starts the graceful shutdown scripts
#[async_trait]
pub trait ScriptDispatcher: std::fmt::Debug + Send + Sync {
    /// Run the action. Never fails; problems are logged.
    async fn run_action(&self);
}

/// Reasons a dispatch attempt did not complete
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("failed to resolve agent executable path: {0}")]
    ExecutablePath(#[source] std::io::Error),

    #[error("agent executable {0} has no parent directory")]
    NoParentDir(String),

    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    ExitStatus {
        program: String,
        status: std::process::ExitStatus,
    },
}

/// Used where no graceful shutdown script convention exists
#[derive(Debug)]
pub struct UnsupportedPlatform {
    os: &'static str,
}

#[async_trait]
impl ScriptDispatcher for UnsupportedPlatform {
    async fn run_action(&self) {
        warn!(os = self.os, "graceful shutdown scripts are not supported on this platform");
    }
}

/// The dispatcher matching the host platform's conventions
pub fn platform_dispatcher() -> Arc<dyn ScriptDispatcher> {
    dispatcher_for(std::env::consts::OS)
}

fn dispatcher_for(os: &'static str) -> Arc<dyn ScriptDispatcher> {
    match os {
        "linux" => Arc::new(SystemdDispatcher::default()),
        "windows" => Arc::new(ScriptRunnerDispatcher::default()),
        _ => Arc::new(UnsupportedPlatform { os }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_per_platform() {
        assert!(format!("{:?}", dispatcher_for("linux")).starts_with("SystemdDispatcher"));
        assert!(format!("{:?}", dispatcher_for("windows")).starts_with("ScriptRunnerDispatcher"));
        assert!(format!("{:?}", dispatcher_for("macos")).starts_with("UnsupportedPlatform"));
    }

    #[tokio::test]
    async fn test_unsupported_platform_does_nothing() {
        dispatcher_for("freebsd").run_action().await;
    }
}
