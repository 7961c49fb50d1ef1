//! Hardware the run executed on.

use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::process::{CommandSpec, ProcessRunner};

const BYTES_PER_MB: u64 = 1024 * 1024;

pub const GPU_QUERY_TOOL: &str = "nvidia-smi";
const MAC_PROFILER: &str = "system_profiler";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSpecs {
    pub cpu_model: Option<String>,
    pub total_memory_mb: Option<u64>,
    /// Comma-separated adapter names; `None` when nothing was detected.
    pub gpu: Option<String>,
}

impl HardwareSpecs {
    /// Never fails; undetectable values stay `None`.
    pub async fn collect(runner: &dyn ProcessRunner) -> Self {
        let (cpu_model, total_memory_mb) = cpu_and_memory();
        let mut gpu = query_nvidia(runner).await;
        if gpu.is_none() && cfg!(target_os = "macos") {
            gpu = query_mac_displays(runner).await;
        }
        let specs = Self {
            cpu_model,
            total_memory_mb,
            gpu,
        };
        tracing::debug!(?specs, "hardware collected");
        specs
    }
}

fn cpu_and_memory() -> (Option<String>, Option<u64>) {
    let mut system = System::new();
    system.refresh_cpu();
    system.refresh_memory();
    let cpu_model = system
        .cpus()
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty());
    let total = system.total_memory();
    (cpu_model, (total > 0).then(|| total / BYTES_PER_MB))
}

async fn query_nvidia(runner: &dyn ProcessRunner) -> Option<String> {
    let cmd = CommandSpec::new(GPU_QUERY_TOOL).args(["--query-gpu=name", "--format=csv,noheader"]);
    match runner.run(&cmd).await {
        Ok(output) if output.success() => gpu_names(&output.stdout),
        Ok(output) => {
            tracing::debug!(exit = %output.exit, "no NVIDIA GPU reported");
            None
        }
        Err(e) => {
            tracing::debug!(error = %e, "GPU query unavailable");
            None
        }
    }
}

async fn query_mac_displays(runner: &dyn ProcessRunner) -> Option<String> {
    let cmd = CommandSpec::new(MAC_PROFILER).arg("SPDisplaysDataType");
    let output = runner.run(&cmd).await.ok().filter(|o| o.success())?;
    chipset_models(&output.stdout)
}

/// One adapter name per line, as printed by `nvidia-smi --format=csv,noheader`.
pub fn gpu_names(stdout: &str) -> Option<String> {
    let names: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    (!names.is_empty()).then(|| names.join(", "))
}

/// `Chipset Model:` values from `system_profiler SPDisplaysDataType`.
pub fn chipset_models(stdout: &str) -> Option<String> {
    let names: Vec<&str> = stdout
        .lines()
        .filter_map(|l| l.trim().strip_prefix("Chipset Model:"))
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .collect();
    (!names.is_empty()).then(|| names.join(", "))
}
