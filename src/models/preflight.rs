//! Container checks run before a model install.
//!
//! The install tool converts models to ONNX inside a converter container.
//! Nothing here is fatal: problems are reported and the install proceeds,
//! since the tool may still manage on its own.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::process::{CommandSpec, ProcessRunner};
use crate::release::Platform;
use crate::telemetry::ProgressSink;

pub const CONVERTER_IMAGE: &str = "ghcr.io/mlos-foundation/axon-converter";

#[derive(Error, Debug)]
pub enum PreflightError {
    #[error("No converter image for platform {0}")]
    UnsupportedPlatform(String),

    #[error("{step} failed: {detail}")]
    Step { step: &'static str, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConverterStatus {
    AlreadyLoaded,
    Loaded,
    Failed(String),
    NotChecked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    /// `docker --version` output when the CLI works.
    pub docker_cli: Option<String>,
    pub daemon_running: bool,
    pub converter: ConverterStatus,
}

#[derive(Debug, Clone)]
pub struct PreflightConfig {
    pub docker: PathBuf,
    pub download_tool: PathBuf,
    /// `owner/name` of the install tool's releases.
    pub tool_repo: String,
    /// Release tag carrying the converter image artifact.
    pub tool_version: String,
    pub platform: Platform,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            docker: PathBuf::from("docker"),
            download_tool: PathBuf::from("gh"),
            tool_repo: "mlOS-foundation/axon".to_string(),
            tool_version: "v3.1.1".to_string(),
            platform: Platform::current(),
        }
    }
}

pub struct Preflight {
    runner: Arc<dyn ProcessRunner>,
    config: PreflightConfig,
}

impl Preflight {
    pub fn new(runner: Arc<dyn ProcessRunner>, config: PreflightConfig) -> Self {
        Self { runner, config }
    }

    pub async fn run(&self, sink: &dyn ProgressSink) -> PreflightReport {
        let docker_cli = match self.docker(&["--version"]).await {
            Ok(version) => {
                sink.on_log(&format!("docker CLI: {}", version));
                Some(version)
            }
            Err(e) => {
                sink.on_log(&format!("docker CLI not available ({}); installer may fall back to native format", e));
                None
            }
        };

        let daemon_running = docker_cli.is_some() && self.docker(&["ps"]).await.is_ok();
        if docker_cli.is_some() && !daemon_running {
            sink.on_log("docker daemon not accessible; ONNX conversion will likely fail");
        }

        let converter = if daemon_running {
            match self.ensure_converter_image().await {
                Ok(status) => status,
                Err(e) => {
                    sink.on_log(&format!("converter image not loaded: {}", e));
                    ConverterStatus::Failed(e.to_string())
                }
            }
        } else {
            ConverterStatus::NotChecked
        };

        PreflightReport {
            docker_cli,
            daemon_running,
            converter,
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<String, PreflightError> {
        self.step("docker", CommandSpec::new(&self.config.docker).args(args.iter().copied()))
            .await
    }

    async fn step(&self, step: &'static str, cmd: CommandSpec) -> Result<String, PreflightError> {
        let output = self.runner.run(&cmd).await.map_err(|e| PreflightError::Step {
            step,
            detail: e.to_string(),
        })?;
        if !output.success() {
            return Err(PreflightError::Step {
                step,
                detail: format!("{}: {}", output.exit, output.stderr.trim()),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Artifact name of the converter image for this platform.
    pub fn converter_artifact(&self) -> Result<String, PreflightError> {
        let platform = self
            .config
            .platform
            .container_platform()
            .ok_or_else(|| PreflightError::UnsupportedPlatform(self.config.platform.to_string()))?;
        let version = self.config.tool_version.trim_start_matches('v');
        Ok(format!("axon-converter-{}-{}.tar.gz", version, platform))
    }

    async fn ensure_converter_image(&self) -> Result<ConverterStatus, PreflightError> {
        let existing = self.docker(&["images", "-q", CONVERTER_IMAGE]).await?;
        if !existing.is_empty() {
            return Ok(ConverterStatus::AlreadyLoaded);
        }

        let artifact = self.converter_artifact()?;
        let staging = tempfile::tempdir()?;
        let staging_dir = staging.path().to_string_lossy().into_owned();
        let download = CommandSpec::new(&self.config.download_tool)
            .args(["release", "download", self.config.tool_version.as_str()])
            .args(["--repo", self.config.tool_repo.as_str()])
            .args(["--pattern", artifact.as_str()])
            .args(["--dir", staging_dir.as_str(), "--clobber"]);
        self.step("converter download", download).await?;

        let archive = staging.path().join(&artifact);
        let archive = archive.to_string_lossy();
        self.step(
            "docker load",
            CommandSpec::new(&self.config.docker).args(["load", "-i", &*archive]),
        )
        .await?;

        let version = self.config.tool_version.trim_start_matches('v');
        let versioned = format!("{}:{}", CONVERTER_IMAGE, version);
        let latest = format!("{}:latest", CONVERTER_IMAGE);
        self.step(
            "docker tag",
            CommandSpec::new(&self.config.docker).args(["tag", versioned.as_str(), latest.as_str()]),
        )
        .await?;
        Ok(ConverterStatus::Loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{ScriptedResponse, ScriptedRunner};
    use crate::telemetry::RecordingSink;

    fn config() -> PreflightConfig {
        PreflightConfig {
            platform: Platform::new("linux", "amd64"),
            ..Default::default()
        }
    }

    #[test]
    fn test_converter_artifact_name() {
        let p = Preflight::new(Arc::new(ScriptedRunner::new()), config());
        assert_eq!(p.converter_artifact().unwrap(), "axon-converter-3.1.1-linux-amd64.tar.gz");
    }

    #[tokio::test]
    async fn test_missing_docker_is_reported_not_fatal() {
        let runner = Arc::new(ScriptedRunner::new());
        let sink = RecordingSink::new();
        let report = Preflight::new(runner, config()).run(&sink).await;
        assert_eq!(report.docker_cli, None);
        assert!(!report.daemon_running);
        assert_eq!(report.converter, ConverterStatus::NotChecked);
        assert!(sink.has_line_containing("docker CLI not available"));
    }

    #[tokio::test]
    async fn test_loaded_image_is_detected() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("docker", None, ScriptedResponse::success())
                .on("docker", Some("--version"), ScriptedResponse::success().stdout("Docker version 27.0"))
                .on("docker", Some("images"), ScriptedResponse::success().stdout("abc123\n")),
        );
        let sink = RecordingSink::new();
        let report = Preflight::new(runner.clone(), config()).run(&sink).await;
        assert_eq!(report.docker_cli.as_deref(), Some("Docker version 27.0"));
        assert!(report.daemon_running);
        assert_eq!(report.converter, ConverterStatus::AlreadyLoaded);
        assert!(runner.calls_with_first_arg("load").is_empty());
    }

    #[tokio::test]
    async fn test_image_is_downloaded_loaded_and_tagged() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("docker", None, ScriptedResponse::success())
                .on("gh", Some("release"), ScriptedResponse::success()),
        );
        let sink = RecordingSink::new();
        let report = Preflight::new(runner.clone(), config()).run(&sink).await;
        assert_eq!(report.converter, ConverterStatus::Loaded);
        let tag = runner.calls_with_first_arg("tag");
        assert_eq!(tag.len(), 1);
        assert_eq!(tag[0].args[2], "ghcr.io/mlos-foundation/axon-converter:latest");
    }
}
