// Copyright 2024-2026 MLOS System Test Contributors
// SPDX-License-Identifier: Apache-2.0

//! Resource usage of the supervised core server.
//!
//! CPU and resident memory are averaged over a short window, once while the
//! server is idle and once right after the inference load. Sampling never
//! fails a run; a missing reading is recorded as absent.

pub mod hardware;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::supervisor::ProcessHandle;

pub use hardware::HardwareSpecs;

/// Readings averaged per measurement.
pub const DEFAULT_SAMPLES: u32 = 5;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Server process has no pid")]
    NoPid,

    #[error("No resource readings for pid {pid}")]
    NoSamples { pid: u32 },

    #[error("Resource sampling cancelled")]
    Cancelled,
}

/// One reading of a process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSample {
    /// Percent of one core; may exceed 100 on multi-threaded load.
    pub cpu_percent: f64,
    pub rss_mb: f64,
}

/// Averaged usage over one measurement window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    /// Share of total host memory; 0 when the total is unknown.
    pub memory_percent: f64,
    pub samples: u32,
    /// Server uptime when the measurement finished.
    pub uptime_ms: u64,
}

/// Which point of the run a measurement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Idle,
    UnderLoad,
}

impl LoadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::UnderLoad => "under_load",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub idle: Option<ResourceUsage>,
    pub under_load: Option<ResourceUsage>,
}

impl ResourceReport {
    pub fn record(&mut self, phase: LoadPhase, usage: ResourceUsage) {
        match phase {
            LoadPhase::Idle => self.idle = Some(usage),
            LoadPhase::UnderLoad => self.under_load = Some(usage),
        }
    }
}

/// Source of per-process readings.
pub trait ResourceSampler: Send + Sync {
    /// `None` when the process cannot be read (gone, no permission).
    fn sample(&self, pid: u32) -> Option<ProcessSample>;

    fn total_memory_mb(&self) -> Option<f64>;
}

/// Readings from the operating system's process table.
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&self, pid: u32) -> Option<ProcessSample> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock();
        if !system.refresh_process(pid) {
            return None;
        }
        let process = system.process(pid)?;
        Some(ProcessSample {
            cpu_percent: f64::from(process.cpu_usage()),
            rss_mb: process.memory() as f64 / BYTES_PER_MB,
        })
    }

    fn total_memory_mb(&self) -> Option<f64> {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        (total > 0).then(|| total as f64 / BYTES_PER_MB)
    }
}

pub struct ResourceMonitor {
    sampler: Arc<dyn ResourceSampler>,
    window: Duration,
    samples: u32,
}

impl ResourceMonitor {
    pub fn new(sampler: Arc<dyn ResourceSampler>, window: Duration) -> Self {
        Self {
            sampler,
            window,
            samples: DEFAULT_SAMPLES,
        }
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples.max(1);
        self
    }

    /// Average the server's usage over the configured window.
    pub async fn measure(
        &self,
        handle: &ProcessHandle,
        cancel: &CancellationToken,
    ) -> Result<ResourceUsage, MonitorError> {
        let pid = handle.pid().ok_or(MonitorError::NoPid)?;
        let mut usage = self.measure_pid(pid, cancel).await?;
        usage.uptime_ms = handle.uptime().as_millis() as u64;
        Ok(usage)
    }

    /// The first reading only primes CPU accounting and is not averaged.
    pub async fn measure_pid(&self, pid: u32, cancel: &CancellationToken) -> Result<ResourceUsage, MonitorError> {
        let interval = self.window / self.samples;
        let _ = self.sampler.sample(pid);

        let mut cpu = 0.0;
        let mut rss = 0.0;
        let mut taken = 0u32;
        for _ in 0..self.samples {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(MonitorError::Cancelled),
                () = tokio::time::sleep(interval) => {}
            }
            if let Some(sample) = self.sampler.sample(pid) {
                cpu += sample.cpu_percent;
                rss += sample.rss_mb;
                taken += 1;
            }
        }
        if taken == 0 {
            return Err(MonitorError::NoSamples { pid });
        }

        let memory_mb = rss / f64::from(taken);
        let memory_percent = match self.sampler.total_memory_mb() {
            Some(total) if total > 0.0 => memory_mb / total * 100.0,
            _ => 0.0,
        };
        Ok(ResourceUsage {
            cpu_percent: cpu / f64::from(taken),
            memory_mb,
            memory_percent,
            samples: taken,
            uptime_ms: 0,
        })
    }
}
