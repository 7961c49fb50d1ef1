// Copyright 2024-2026 MLOS System Test Contributors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end validation run.
//!
//! ```text
//! fetch release -> install tool -> install models -> ONNX Runtime
//!   -> start server -> hardware, idle usage -> register
//!   -> inference (small, large) -> usage under load -> results
//! ```
//!
//! The server is stopped before [`TestRunner::run`] returns, whatever the
//! outcome. Per-model registration and inference failures are recorded, not
//! fatal.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, CoreClient, InferenceInput};
use crate::config::HarnessConfig;
use crate::models::detector::DetectorError;
use crate::models::preflight::PreflightConfig;
use crate::models::{
    detector_from_pattern, test_models, CatalogScope, InstallError, InstallOutcome, InstallerConfig,
    ModelCategory, ModelInstaller, SpecError, TestModel,
};
use crate::monitor::{
    HardwareSpecs, LoadPhase, MonitorError, ResourceMonitor, ResourceSampler, ResourceUsage, SysinfoSampler,
};
use crate::process::{ProcessRunner, TokioProcessRunner};
use crate::release::{
    ensure_onnx_runtime, FetchConfig, FetchError, FetchedRelease, InstallTool, OnnxRuntimeError,
    ReleaseFetcher, ToolError,
};
use crate::results::{InferenceSize, InferenceStatus, MetricsRecorder, RunResults};
use crate::supervisor::health::{HealthProbe, HttpHealthProbe};
use crate::supervisor::{ProcessHandle, ProcessSupervisor, ReadyError, SupervisorConfig, SupervisorError};
use crate::telemetry::{ProgressSink, TracingSink};

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Release fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Install tool unavailable: {0}")]
    Tool(#[from] ToolError),

    #[error("ONNX Runtime provisioning failed: {0}")]
    OnnxRuntime(#[from] OnnxRuntimeError),

    #[error("Core server failed: {0}")]
    Server(SupervisorError),

    #[error("Invalid test model: {0}")]
    Catalog(#[from] SpecError),

    #[error("Invalid stderr pattern: {0}")]
    Detector(#[from] DetectorError),

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] ClientError),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl From<SupervisorError> for RunError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::Ready(ReadyError::Cancelled) => Self::Cancelled,
            other => Self::Server(other),
        }
    }
}

/// A model that can be registered, with its resolved file.
#[derive(Debug, Clone)]
struct AvailableModel {
    model: TestModel,
    path: PathBuf,
}

pub struct TestRunner {
    config: HarnessConfig,
    runner: Arc<dyn ProcessRunner>,
    probe: Arc<dyn HealthProbe>,
    sink: Arc<dyn ProgressSink>,
    sampler: Arc<dyn ResourceSampler>,
}

impl TestRunner {
    pub fn new(
        config: HarnessConfig,
        runner: Arc<dyn ProcessRunner>,
        probe: Arc<dyn HealthProbe>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            config,
            runner,
            probe,
            sink,
            sampler: Arc::new(SysinfoSampler::new()),
        }
    }

    /// Replace the process-table sampler used for resource usage.
    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    /// Real subprocesses, HTTP probing on localhost and tracing output.
    pub fn from_config(config: HarnessConfig) -> Result<Self, RunError> {
        let probe = HttpHealthProbe::new("127.0.0.1").map_err(|source| ClientError::Http {
            url: "http://127.0.0.1".to_string(),
            source,
        })?;
        Ok(Self::new(
            config,
            Arc::new(TokioProcessRunner::new()),
            Arc::new(probe),
            Arc::new(TracingSink),
        ))
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn fetcher(&self) -> ReleaseFetcher {
        let config = FetchConfig {
            repo: self.config.github_repo.clone(),
            platform: self.config.platform.clone(),
            github_token: self.config.github_token.clone(),
            ..Default::default()
        };
        ReleaseFetcher::new(self.runner.clone(), config)
    }

    pub fn installer(&self) -> Result<ModelInstaller, RunError> {
        let detector = detector_from_pattern(self.config.stderr_pattern.as_deref())?;
        let preflight = self.config.preflight.then(|| PreflightConfig {
            tool_version: self.config.axon_version.clone(),
            platform: self.config.platform.clone(),
            ..Default::default()
        });
        let config = InstallerConfig {
            working_dir: Some(self.config.home_dir.clone()),
            test_all_models: self.config.test_all_models,
            heartbeat: self.config.heartbeat,
            preflight,
            ..InstallerConfig::new(self.config.tool_path.clone(), self.config.cache_root.clone())
        };
        Ok(ModelInstaller::new(self.runner.clone(), detector, self.sink.clone(), config))
    }

    pub fn catalog(&self) -> Result<Vec<TestModel>, SpecError> {
        test_models(CatalogScope::from_flags(self.config.minimal, self.config.test_all_models))
    }

    fn supervisor(&self) -> ProcessSupervisor {
        let config = SupervisorConfig {
            health_attempts: self.config.health_attempts,
            health_interval: self.config.health_interval,
        };
        ProcessSupervisor::new(self.runner.clone(), self.probe.clone(), config)
    }

    /// Run the whole validation and write the results file.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunResults, RunError> {
        let mut results = RunResults::new(&self.config.axon_version, &self.config.core_version);
        let mut recorder = MetricsRecorder::new();
        std::fs::create_dir_all(&self.config.output_dir)?;
        tracing::info!(
            run_id = %results.run_id,
            axon = %self.config.axon_version,
            core = %self.config.core_version,
            output = %self.config.output_dir.display(),
            "starting release validation"
        );

        let release = self.prepare_release(&mut recorder).await?;
        ensure_not_cancelled(cancel)?;

        let tool = InstallTool::new(self.runner.clone(), self.config.tool_path.clone())
            .ensure_installed()
            .await?;
        if tool.installed_now {
            recorder.record_tool_bootstrap(tool.duration_ms);
        }

        let catalog = self.catalog()?;
        let available = self.install_models(&catalog, &mut results, &mut recorder, cancel).await?;
        ensure_not_cancelled(cancel)?;

        let library = ensure_onnx_runtime(&release.root, &self.config.platform).await?;
        tracing::debug!(library = %library.display(), "ONNX Runtime present");

        let supervisor = self.supervisor();
        let started = Instant::now();
        let (mut handle, ready) = supervisor
            .start_server(&release, self.config.port, cancel)
            .await?;
        recorder.record_core_startup(started.elapsed().as_millis() as u64);
        tracing::info!(port = self.config.port, attempts = ready.attempts, "core server ready");

        let observed = self
            .observe(&handle, &catalog, &available, &mut results, &mut recorder, cancel)
            .await;
        supervisor.stop(&mut handle).await;
        observed?;

        results.finish(recorder);
        let path = self.config.results_path();
        results.write_json(&path)?;
        tracing::info!(
            path = %path.display(),
            success_rate = results.success_rate,
            duration_ms = results.duration_ms,
            "results written"
        );
        Ok(results)
    }

    async fn prepare_release(&self, recorder: &mut MetricsRecorder) -> Result<FetchedRelease, RunError> {
        let fetcher = self.fetcher();
        if self.config.skip_install {
            let release = fetcher.locate(&self.config.core_version, &self.config.output_dir)?;
            tracing::info!(binary = %release.binary_path.display(), "reusing fetched release");
            return Ok(release);
        }
        let release = fetcher
            .fetch(&self.config.core_version, &self.config.output_dir)
            .await?;
        recorder.record_core_download(release.duration_ms);
        tracing::info!(
            binary = %release.binary_path.display(),
            sha256 = %release.sha256,
            duration_ms = release.duration_ms,
            "core release ready"
        );
        Ok(release)
    }

    async fn install_models(
        &self,
        catalog: &[TestModel],
        results: &mut RunResults,
        recorder: &mut MetricsRecorder,
        cancel: &CancellationToken,
    ) -> Result<Vec<AvailableModel>, RunError> {
        let installer = self.installer()?;
        let mut available = Vec::new();

        for model in catalog {
            ensure_not_cancelled(cancel)?;
            let outcome = installer.install_spec(&model.spec, cancel).await;
            results
                .installs
                .insert(model.spec.to_string(), outcome.label().to_string());

            match outcome {
                InstallOutcome::AlreadyInstalled(found) => {
                    recorder.record_model_available();
                    available.push(AvailableModel {
                        model: model.clone(),
                        path: found.path,
                    });
                }
                InstallOutcome::Installed { path, .. } => {
                    recorder.record_model_available();
                    available.push(AvailableModel {
                        model: model.clone(),
                        path,
                    });
                }
                InstallOutcome::Skipped(reason) => {
                    self.sink.on_log(&format!("skipping {} ({})", model.spec, reason));
                }
                InstallOutcome::Failed(InstallError::Cancelled { .. }) => return Err(RunError::Cancelled),
                InstallOutcome::Failed(e) => {
                    self.sink.on_log(&format!("install of {} failed: {}", model.spec, e));
                }
            }
        }

        tracing::info!(available = available.len(), total = catalog.len(), "model installation finished");
        Ok(available)
    }

    /// Everything done against the running server.
    async fn observe(
        &self,
        handle: &ProcessHandle,
        catalog: &[TestModel],
        available: &[AvailableModel],
        results: &mut RunResults,
        recorder: &mut MetricsRecorder,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        results.hardware = HardwareSpecs::collect(self.runner.as_ref()).await;

        if let Some(usage) = self.measure(handle, LoadPhase::Idle, cancel).await? {
            results.resources.record(LoadPhase::Idle, usage);
        }
        self.exercise(catalog, available, recorder, cancel).await?;
        if let Some(usage) = self.measure(handle, LoadPhase::UnderLoad, cancel).await? {
            results.resources.record(LoadPhase::UnderLoad, usage);
        }
        Ok(())
    }

    /// Sampling failures are logged, not fatal.
    async fn measure(
        &self,
        handle: &ProcessHandle,
        phase: LoadPhase,
        cancel: &CancellationToken,
    ) -> Result<Option<ResourceUsage>, RunError> {
        let monitor = ResourceMonitor::new(self.sampler.clone(), self.config.resource_window);
        match monitor.measure(handle, cancel).await {
            Ok(usage) => {
                tracing::info!(
                    phase = phase.as_str(),
                    cpu_percent = usage.cpu_percent,
                    memory_mb = usage.memory_mb,
                    memory_percent = usage.memory_percent,
                    "server resource usage"
                );
                Ok(Some(usage))
            }
            Err(MonitorError::Cancelled) => Err(RunError::Cancelled),
            Err(e) => {
                tracing::warn!(phase = phase.as_str(), error = %e, "resource sampling failed");
                Ok(None)
            }
        }
    }

    async fn exercise(
        &self,
        catalog: &[TestModel],
        available: &[AvailableModel],
        recorder: &mut MetricsRecorder,
        cancel: &CancellationToken,
    ) -> Result<(), RunError> {
        let client = CoreClient::for_port(self.config.port)?;

        for entry in available {
            ensure_not_cancelled(cancel)?;
            let started = Instant::now();
            match client.register(&entry.model.name, &entry.path).await {
                Ok(()) => recorder.record_registration(&entry.model.name, started.elapsed().as_millis() as u64),
                Err(e) => tracing::warn!(model = %entry.model.name, error = %e, "registration failed"),
            }
        }

        // Every NLP model in scope is exercised; one that failed to install
        // shows up as a failed inference.
        for model in catalog.iter().filter(|m| m.category == ModelCategory::Nlp) {
            for size in [InferenceSize::Small, InferenceSize::Large] {
                ensure_not_cancelled(cancel)?;
                let input = InferenceInput::for_model(&model.name, size);
                let started = Instant::now();
                let status = match client.infer(&model.name, &input).await {
                    Ok(_) => InferenceStatus::Success,
                    Err(e) => {
                        tracing::warn!(model = %model.name, size = size.as_str(), error = %e, "inference failed");
                        InferenceStatus::Failed
                    }
                };
                let ms = started.elapsed().as_millis() as u64;
                recorder.record_inference(&model.name, size, status, ms);
            }
        }

        let m = recorder.metrics();
        tracing::info!(
            successful = m.successful_inferences,
            total = m.total_inferences,
            "inference tests finished"
        );
        Ok(())
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<(), RunError> {
    if cancel.is_cancelled() {
        return Err(RunError::Cancelled);
    }
    Ok(())
}
