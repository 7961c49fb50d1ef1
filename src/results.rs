//! Run metrics and the `metrics.json` results file.
//!
//! [`Metrics`] is only mutated through [`MetricsRecorder`]. Every recording
//! also goes to the `metrics` facade so an installed recorder sees the same
//! numbers.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::monitor::{HardwareSpecs, ResourceReport};

pub const RESULTS_FILE: &str = "metrics.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceStatus {
    Success,
    Failed,
}

impl InferenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for InferenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input size class of an inference request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceSize {
    Small,
    Large,
}

impl InferenceSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Large => "large",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub tool_bootstrap_ms: u64,
    pub core_download_ms: u64,
    pub core_startup_ms: u64,
    pub models_installed: u32,

    pub total_inferences: u32,
    pub successful_inferences: u32,
    pub failed_inferences: u32,

    /// Keyed by short model name.
    pub registration_ms: BTreeMap<String, u64>,
    pub inference_ms: BTreeMap<String, u64>,
    pub inference_status: BTreeMap<String, InferenceStatus>,
    pub large_inference_ms: BTreeMap<String, u64>,
    pub large_inference_status: BTreeMap<String, InferenceStatus>,
}

/// Single-threaded aggregation of one run's numbers.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    metrics: Metrics,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tool_bootstrap(&mut self, ms: u64) {
        self.metrics.tool_bootstrap_ms = ms;
        metrics::histogram!("tool_bootstrap_ms").record(ms as f64);
    }

    pub fn record_core_download(&mut self, ms: u64) {
        self.metrics.core_download_ms = ms;
        metrics::histogram!("core_download_ms").record(ms as f64);
    }

    pub fn record_core_startup(&mut self, ms: u64) {
        self.metrics.core_startup_ms = ms;
        metrics::histogram!("core_startup_ms").record(ms as f64);
    }

    /// Count a model that is usable, whether installed now or earlier.
    pub fn record_model_available(&mut self) {
        self.metrics.models_installed += 1;
    }

    pub fn record_registration(&mut self, model: &str, ms: u64) {
        self.metrics.registration_ms.insert(model.to_string(), ms);
        metrics::histogram!("registration_ms").record(ms as f64);
    }

    /// Times are only kept for successful requests.
    pub fn record_inference(&mut self, model: &str, size: InferenceSize, status: InferenceStatus, ms: u64) {
        let m = &mut self.metrics;
        m.total_inferences += 1;
        match status {
            InferenceStatus::Success => m.successful_inferences += 1,
            InferenceStatus::Failed => m.failed_inferences += 1,
        }

        let (times, statuses) = match size {
            InferenceSize::Small => (&mut m.inference_ms, &mut m.inference_status),
            InferenceSize::Large => (&mut m.large_inference_ms, &mut m.large_inference_status),
        };
        statuses.insert(model.to_string(), status);
        if status == InferenceStatus::Success {
            times.insert(model.to_string(), ms);
            metrics::histogram!("inference_ms", "size" => size.as_str()).record(ms as f64);
        }
        metrics::counter!("inferences_total", "status" => status.as_str()).increment(1);
    }

    /// Percentage of successful inferences; 0 when none ran.
    pub fn success_rate(&self) -> f64 {
        if self.metrics.total_inferences == 0 {
            return 0.0;
        }
        f64::from(self.metrics.successful_inferences) / f64::from(self.metrics.total_inferences) * 100.0
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn into_metrics(self) -> Metrics {
        self.metrics
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub os: String,
    pub arch: String,
    pub cpus: usize,
    pub physical_cpus: usize,
    pub hostname: Option<String>,
}

impl HostInfo {
    pub fn collect() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpus: num_cpus::get(),
            physical_cpus: num_cpus::get_physical(),
            hostname: hostname::get().ok().and_then(|h| h.into_string().ok()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResults {
    pub run_id: Uuid,
    pub axon_version: String,
    pub core_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Percentage, 0-100.
    pub success_rate: f64,
    pub metrics: Metrics,
    /// Install outcome label per model spec.
    pub installs: BTreeMap<String, String>,
    pub host: HostInfo,
    #[serde(default)]
    pub hardware: HardwareSpecs,
    /// Core server usage while idle and after the inference load.
    #[serde(default)]
    pub resources: ResourceReport,
}

impl RunResults {
    pub fn new(axon_version: &str, core_version: &str) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            axon_version: axon_version.to_string(),
            core_version: core_version.to_string(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            success_rate: 0.0,
            metrics: Metrics::default(),
            installs: BTreeMap::new(),
            host: HostInfo::collect(),
            hardware: HardwareSpecs::default(),
            resources: ResourceReport::default(),
        }
    }

    /// Stamp the end time and copy the recorder's numbers in.
    pub fn finish(&mut self, recorder: MetricsRecorder) {
        self.finished_at = Utc::now();
        self.duration_ms = (self.finished_at - self.started_at).num_milliseconds().max(0) as u64;
        self.success_rate = recorder.success_rate();
        self.metrics = recorder.into_metrics();
    }

    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(io::Error::other)?;
        std::fs::write(path, json)
    }

    pub fn read_json(path: &Path) -> io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
