//! Model installation through the external install tool.
//!
//! ```text
//! NotInstalled -> skip check -> Installing -> Verifying -> Installed | Failed
//!                     |
//!                     +-> Skipped | AlreadyInstalled
//! ```
//!
//! While the tool runs, its exit is raced against a heartbeat interval and a
//! cancellation token; each tick is reported to the progress sink.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::cache_lock::CacheLocks;
use super::detector::FailureDetector;
use super::diagnostics::{inspect_cache, output_hints, CacheListing};
use super::preflight::{Preflight, PreflightConfig};
use super::resolver::{PathResolver, ResolveError, ResolvedPath};
use super::{ModelCategory, ModelSpec, SpecError};
use crate::process::{CommandOutput, CommandSpec, ProcessExit, ProcessRunner};
use crate::telemetry::{is_attention_line, is_progress_line, HeartbeatTick, ProgressSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Category excluded unless all models are requested.
    Category(ModelCategory),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Category(category) => write!(f, "{}", category),
        }
    }
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error(transparent)]
    Parse(#[from] SpecError),

    #[error("Could not launch install tool for {spec}: {reason}")]
    Launch { spec: String, reason: String },

    #[error("Install of {spec} failed ({exit}): {stderr}")]
    ToolFailed {
        spec: String,
        exit: ProcessExit,
        stderr: String,
        cache: CacheListing,
    },

    #[error("Install of {spec} reported errors (matched '{marker}'): {stderr}")]
    ReportedErrors {
        spec: String,
        marker: String,
        stderr: String,
    },

    #[error("Install of {spec} finished but the model was not found: {source}")]
    VerificationFailed {
        spec: String,
        #[source]
        source: ResolveError,
        cache: CacheListing,
    },

    #[error("Install of {spec} cancelled")]
    Cancelled { spec: String },
}

#[derive(Debug)]
pub enum InstallOutcome {
    AlreadyInstalled(ResolvedPath),
    Skipped(SkipReason),
    Installed { path: PathBuf, duration_ms: u64 },
    Failed(InstallError),
}

impl InstallOutcome {
    /// Whether the model can be used afterwards.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::AlreadyInstalled(_) | Self::Installed { .. })
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::AlreadyInstalled(resolved) => Some(&resolved.path),
            Self::Installed { path, .. } => Some(path),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::AlreadyInstalled(_) => "already_installed",
            Self::Skipped(_) => "skipped",
            Self::Installed { .. } => "installed",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallerConfig {
    pub tool: PathBuf,
    pub cache_root: PathBuf,
    /// Working directory for the tool (the user's home in practice).
    pub working_dir: Option<PathBuf>,
    pub test_all_models: bool,
    pub heartbeat: Duration,
    /// Container checks before each install; `None` disables them.
    pub preflight: Option<PreflightConfig>,
}

impl InstallerConfig {
    pub fn new(tool: PathBuf, cache_root: PathBuf) -> Self {
        Self {
            tool,
            cache_root,
            working_dir: None,
            test_all_models: false,
            heartbeat: Duration::from_secs(3),
            preflight: None,
        }
    }
}

pub struct ModelInstaller {
    runner: Arc<dyn ProcessRunner>,
    resolver: PathResolver,
    detector: Arc<dyn FailureDetector>,
    sink: Arc<dyn ProgressSink>,
    locks: CacheLocks,
    config: InstallerConfig,
}

impl ModelInstaller {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        detector: Arc<dyn FailureDetector>,
        sink: Arc<dyn ProgressSink>,
        config: InstallerConfig,
    ) -> Self {
        let resolver = PathResolver::new(config.cache_root.clone(), config.tool.clone(), runner.clone());
        Self {
            runner,
            resolver,
            detector,
            sink,
            locks: CacheLocks::new(),
            config,
        }
    }

    /// Share cache locks with other installers in this process.
    pub fn with_locks(mut self, locks: CacheLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Parse and install. Parse errors fail before any I/O.
    pub async fn install(&self, spec: &str, cancel: &CancellationToken) -> InstallOutcome {
        match ModelSpec::parse(spec) {
            Ok(spec) => self.install_spec(&spec, cancel).await,
            Err(e) => InstallOutcome::Failed(InstallError::Parse(e)),
        }
    }

    pub async fn install_spec(&self, spec: &ModelSpec, cancel: &CancellationToken) -> InstallOutcome {
        let outcome = self.install_inner(spec, cancel).await;
        metrics::counter!("model_installs_total", "outcome" => outcome.label()).increment(1);
        match &outcome {
            InstallOutcome::Failed(e) => tracing::warn!(spec = %spec, error = %e, "install failed"),
            other => tracing::info!(spec = %spec, outcome = other.label(), path = ?other.path(), "install finished"),
        }
        outcome
    }

    async fn install_inner(&self, spec: &ModelSpec, cancel: &CancellationToken) -> InstallOutcome {
        let category = spec.category();
        if !self.config.test_all_models && category != ModelCategory::Nlp {
            return InstallOutcome::Skipped(SkipReason::Category(category));
        }

        let key = spec.to_string();
        let _guard = self.locks.acquire(&key).await;

        if let Ok(found) = self.resolver.resolve(spec).await {
            return InstallOutcome::AlreadyInstalled(found);
        }

        if let Some(preflight) = &self.config.preflight {
            Preflight::new(self.runner.clone(), preflight.clone())
                .run(self.sink.as_ref())
                .await;
        }

        self.sink.on_log(&format!("installing {}", key));
        let started = Instant::now();
        let output = match self.run_with_heartbeat(spec, cancel).await {
            Ok(output) => output,
            Err(e) => return InstallOutcome::Failed(e),
        };
        self.report_output(&output);

        if !output.success() {
            let cache = self.cache_listing(spec);
            return InstallOutcome::Failed(InstallError::ToolFailed {
                spec: key,
                exit: output.exit,
                stderr: output.stderr,
                cache,
            });
        }

        if let Some(marker) = self.detector.detect(&output.stderr) {
            return InstallOutcome::Failed(InstallError::ReportedErrors {
                spec: key,
                marker,
                stderr: output.stderr,
            });
        }

        match self.resolver.resolve(spec).await {
            Ok(found) => InstallOutcome::Installed {
                path: found.path,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(source) => {
                let cache = self.cache_listing(spec);
                InstallOutcome::Failed(InstallError::VerificationFailed {
                    spec: key,
                    source,
                    cache,
                })
            }
        }
    }

    async fn run_with_heartbeat(
        &self,
        spec: &ModelSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, InstallError> {
        let subject = spec.to_string();
        let mut cmd = CommandSpec::new(&self.config.tool)
            .arg("install")
            .arg(subject.clone());
        if let Some(dir) = &self.config.working_dir {
            cmd = cmd.current_dir(dir);
        }

        let run = self.runner.run(&cmd);
        tokio::pin!(run);

        let period = self.config.heartbeat.max(Duration::from_millis(10));
        let started = tokio::time::Instant::now();
        let mut ticker = tokio::time::interval_at(started + period, period);
        let mut sequence = 0u32;

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(InstallError::Cancelled { spec: subject });
                }
                result = &mut run => {
                    return result.map_err(|e| InstallError::Launch {
                        spec: subject,
                        reason: e.to_string(),
                    });
                }
                _ = ticker.tick() => {
                    sequence += 1;
                    self.sink.on_progress(&HeartbeatTick {
                        subject: subject.clone(),
                        sequence,
                        elapsed: started.elapsed(),
                    });
                }
            }
        }
    }

    fn report_output(&self, output: &CommandOutput) {
        for line in output.stdout.lines().filter(|l| is_progress_line(l)) {
            self.sink.on_log(line.trim());
        }
        for line in output.stderr.lines().filter(|l| is_attention_line(l)) {
            self.sink.on_log(line.trim());
        }
        for hint in output_hints(&output.stdout, &output.stderr) {
            self.sink.on_log(hint);
        }
    }

    fn cache_listing(&self, spec: &ModelSpec) -> CacheListing {
        let listing = inspect_cache(&self.config.cache_root, Some(spec));
        for line in listing.summary_lines() {
            self.sink.on_log(&line);
        }
        listing
    }
}
