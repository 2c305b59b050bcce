//! Dispatch through a systemd unit

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info};

use super::{DispatchError, ScriptDispatcher};

/// Unit that invokes the script runner with the graceful shutdown action
pub const DEFAULT_UNIT: &str = "google-graceful-shutdown-scripts.service";

/// Starts a service unit and leaves the scripts to it
#[derive(Debug, Clone)]
pub struct SystemdDispatcher {
    systemctl: String,
    unit: String,
}

impl Default for SystemdDispatcher {
    fn default() -> Self {
        Self::new("systemctl", DEFAULT_UNIT)
    }
}

impl SystemdDispatcher {
    pub fn new(systemctl: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            systemctl: systemctl.into(),
            unit: unit.into(),
        }
    }

    async fn start_unit(&self) -> Result<(), DispatchError> {
        let status = Command::new(&self.systemctl)
            .arg("start")
            .arg(&self.unit)
            .status()
            .await
            .map_err(|source| DispatchError::Spawn {
                program: self.systemctl.clone(),
                source,
            })?;

        if !status.success() {
            return Err(DispatchError::ExitStatus {
                program: self.systemctl.clone(),
                status,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ScriptDispatcher for SystemdDispatcher {
    async fn run_action(&self) {
        info!(unit = %self.unit, "starting graceful shutdown scripts");
        if let Err(e) = self.start_unit().await {
            error!(error = %e, unit = %self.unit, "failed to run graceful shutdown script");
        }
    }
}
