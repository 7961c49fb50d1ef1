//! Bootstrap of the model install tool.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;

use crate::process::{CommandSpec, ProcessRunner};

pub const DEFAULT_INSTALL_SCRIPT: &str =
    "https://raw.githubusercontent.com/mlOS-foundation/axon/main/install.sh";

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Install script failed: {0}")]
    Script(String),

    #[error("Install tool verification failed: {0}")]
    Verify(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    pub path: PathBuf,
    /// Output of `version`, trimmed.
    pub version: String,
    /// Whether this call ran the install script.
    pub installed_now: bool,
    pub duration_ms: u64,
}

pub struct InstallTool {
    runner: Arc<dyn ProcessRunner>,
    path: PathBuf,
    script_url: String,
}

impl InstallTool {
    pub fn new(runner: Arc<dyn ProcessRunner>, path: PathBuf) -> Self {
        Self {
            runner,
            path,
            script_url: DEFAULT_INSTALL_SCRIPT.to_string(),
        }
    }

    pub fn with_script_url(mut self, url: impl Into<String>) -> Self {
        self.script_url = url.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Install when missing, then verify with `version`.
    pub async fn ensure_installed(&self) -> Result<ToolStatus, ToolError> {
        let started = Instant::now();
        let installed_now = !self.path.is_file();
        if installed_now {
            tracing::info!(path = %self.path.display(), "install tool missing, running install script");
            let script = format!("curl -fsSL {} | bash", self.script_url);
            let cmd = CommandSpec::new("bash").arg("-c").arg(script);
            let output = self
                .runner
                .run(&cmd)
                .await
                .map_err(|e| ToolError::Script(e.to_string()))?;
            if !output.success() {
                return Err(ToolError::Script(format!(
                    "{}: {}",
                    output.exit,
                    output.stderr.trim()
                )));
            }
        }

        let version = self.version().await?;
        tracing::info!(version = %version, "install tool ready");
        Ok(ToolStatus {
            path: self.path.clone(),
            version,
            installed_now,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    pub async fn version(&self) -> Result<String, ToolError> {
        let cmd = CommandSpec::new(&self.path).arg("version");
        let output = self
            .runner
            .run(&cmd)
            .await
            .map_err(|e| ToolError::Verify(e.to_string()))?;
        if !output.success() {
            return Err(ToolError::Verify(format!("{}: {}", output.exit, output.stderr.trim())));
        }
        Ok(output.stdout.trim().to_string())
    }
}
