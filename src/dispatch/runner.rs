//! Dispatch by running the script runner next to the agent binary

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info};

use super::{DispatchError, ScriptDispatcher, GRACEFUL_SHUTDOWN_ACTION};

/// Script runner shipped alongside the agent on platforms without systemd
pub const DEFAULT_RUNNER: &str = "GCEMetadataScriptRunner.exe";

/// Runs the script runner directly and waits for it to exit
#[derive(Debug, Clone)]
pub struct ScriptRunnerDispatcher {
    runner_name: String,
    /// Overrides the running executable's location
    agent_executable: Option<PathBuf>,
}

impl Default for ScriptRunnerDispatcher {
    fn default() -> Self {
        Self {
            runner_name: DEFAULT_RUNNER.to_string(),
            agent_executable: None,
        }
    }
}

impl ScriptRunnerDispatcher {
    /// Resolve the runner relative to `agent_executable` instead of the
    /// current process
    #[cfg(test)]
    pub fn with_agent_executable(mut self, agent_executable: impl Into<PathBuf>) -> Self {
        self.agent_executable = Some(agent_executable.into());
        self
    }

    #[cfg(test)]
    pub fn with_runner_name(mut self, runner_name: impl Into<String>) -> Self {
        self.runner_name = runner_name.into();
        self
    }

    /// Path of the script runner: a sibling of the agent executable
    pub fn runner_path(&self) -> Result<PathBuf, DispatchError> {
        let exe = match &self.agent_executable {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(DispatchError::ExecutablePath)?,
        };
        sibling(&exe, &self.runner_name)
    }

    async fn run_runner(&self) -> Result<(), DispatchError> {
        let runner = self.runner_path()?;
        let program = runner.display().to_string();

        let status = Command::new(&runner)
            .arg(GRACEFUL_SHUTDOWN_ACTION)
            .status()
            .await
            .map_err(|source| DispatchError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(DispatchError::ExitStatus { program, status });
        }
        Ok(())
    }
}

fn sibling(exe: &Path, name: &str) -> Result<PathBuf, DispatchError> {
    exe.parent()
        .map(|dir| dir.join(name))
        .ok_or_else(|| DispatchError::NoParentDir(exe.display().to_string()))
}

#[async_trait]
impl ScriptDispatcher for ScriptRunnerDispatcher {
    async fn run_action(&self) {
        info!(runner = %self.runner_name, "starting graceful shutdown scripts");
        if let Err(e) = self.run_runner().await {
            error!(error = %e, "failed to run graceful shutdown script");
        }
    }
}
