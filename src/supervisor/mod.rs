// Copyright 2024-2026 MLOS System Test Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core server process supervision.
//!
//! The supervisor spawns the server, polls it until it answers HTTP and
//! owns the process handle. Every failure after a successful spawn stops
//! the process before returning.

pub mod health;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::process::{CommandSpec, ProcessControl, ProcessError, ProcessExit, ProcessRunner};
use crate::release::FetchedRelease;
use health::HealthProbe;

pub const STDOUT_LOG: &str = "server.stdout.log";
pub const STDERR_LOG: &str = "server.stderr.log";

const STDERR_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum StartError {
    #[error("Failed to start {}: {source}", .binary.display())]
    Spawn {
        binary: PathBuf,
        #[source]
        source: ProcessError,
    },

    #[error("Cannot make {} absolute: {source}", .binary.display())]
    Path {
        binary: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ReadyError {
    #[error("Server did not answer on port {port} after {attempts} attempts")]
    Timeout { port: u16, attempts: u32 },

    #[error("Server exited before becoming ready ({exit}): {stderr_tail}")]
    Exited { exit: ProcessExit, stderr_tail: String },

    #[error("Readiness wait cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error(transparent)]
    Start(#[from] StartError),

    #[error(transparent)]
    Ready(#[from] ReadyError),
}

/// Result of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Killed,
    AlreadyExited(ProcessExit),
    AlreadyStopped,
}

/// A spawned server process. Owned exclusively by its supervisor's caller.
pub struct ProcessHandle {
    pid: Option<u32>,
    binary_path: PathBuf,
    work_dir: PathBuf,
    control: Box<dyn ProcessControl>,
    stopped: bool,
    started_at: Instant,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("binary_path", &self.binary_path)
            .field("stopped", &self.stopped)
            .finish()
    }
}

impl ProcessHandle {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn stderr_log(&self) -> PathBuf {
        self.work_dir.join(STDERR_LOG)
    }

    /// Idempotent; a process that already exited is not signalled.
    pub async fn stop(&mut self) -> StopOutcome {
        if self.stopped {
            return StopOutcome::AlreadyStopped;
        }
        self.stopped = true;

        if let Ok(Some(exit)) = self.control.try_wait() {
            tracing::debug!(pid = ?self.pid, %exit, "server already exited");
            return StopOutcome::AlreadyExited(exit);
        }
        if let Err(e) = self.control.kill().await {
            tracing::warn!(pid = ?self.pid, error = %e, "kill failed");
        }
        tracing::info!(pid = ?self.pid, "server stopped");
        StopOutcome::Killed
    }

    fn stderr_tail(&self) -> String {
        let Ok(text) = std::fs::read_to_string(self.stderr_log()) else {
            return String::new();
        };
        let lines: Vec<&str> = text.lines().collect();
        let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
        lines[start..].join("\n")
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub health_attempts: u32,
    pub health_interval: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_attempts: 30,
            health_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub attempts: u32,
    pub elapsed: Duration,
}

pub struct ProcessSupervisor {
    runner: Arc<dyn ProcessRunner>,
    probe: Arc<dyn HealthProbe>,
    config: SupervisorConfig,
}

impl ProcessSupervisor {
    pub fn new(runner: Arc<dyn ProcessRunner>, probe: Arc<dyn HealthProbe>, config: SupervisorConfig) -> Self {
        Self { runner, probe, config }
    }

    /// Spawn `binary` with `args` from `work_dir`. Relative binaries are
    /// made absolute first, since the working directory changes.
    pub async fn start(&self, binary: &Path, args: &[String], work_dir: &Path) -> Result<ProcessHandle, StartError> {
        let binary_path = std::path::absolute(binary).map_err(|source| StartError::Path {
            binary: binary.to_path_buf(),
            source,
        })?;
        let cmd = CommandSpec::new(&binary_path)
            .args(args.iter().cloned())
            .current_dir(work_dir)
            .log_to(work_dir.join(STDOUT_LOG), work_dir.join(STDERR_LOG));

        let control = self.runner.spawn(&cmd).await.map_err(|source| StartError::Spawn {
            binary: binary_path.clone(),
            source,
        })?;
        let pid = control.id();
        tracing::info!(pid = ?pid, binary = %binary_path.display(), "server spawned");

        Ok(ProcessHandle {
            pid,
            binary_path,
            work_dir: work_dir.to_path_buf(),
            control,
            stopped: false,
            started_at: Instant::now(),
        })
    }

    /// Poll until the server answers. Stops the process on every failure.
    ///
    /// The whole wait, including probes that hang, is bounded by
    /// `health_attempts * health_interval`.
    pub async fn await_ready(
        &self,
        handle: &mut ProcessHandle,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<Readiness, ReadyError> {
        let started = tokio::time::Instant::now();
        let attempts = self.config.health_attempts.max(1);
        let deadline = started + self.config.health_interval * attempts;
        let mut made = 0;

        while made < attempts {
            if let Ok(Some(exit)) = handle.control.try_wait() {
                let stderr_tail = handle.stderr_tail();
                handle.stop().await;
                return Err(ReadyError::Exited { exit, stderr_tail });
            }
            made += 1;

            let answered = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    handle.stop().await;
                    return Err(ReadyError::Cancelled);
                }
                probed = tokio::time::timeout_at(deadline, self.probe.probe(port)) => probed,
            };
            match answered {
                Ok(true) => {
                    tracing::info!(port, attempt = made, "server ready");
                    return Ok(Readiness {
                        attempts: made,
                        elapsed: started.elapsed(),
                    });
                }
                Ok(false) => {}
                Err(_) => {
                    tracing::warn!(port, attempt = made, "health probe still pending at deadline");
                    break;
                }
            }

            let now = tokio::time::Instant::now();
            if made == attempts || now >= deadline {
                break;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    handle.stop().await;
                    return Err(ReadyError::Cancelled);
                }
                () = tokio::time::sleep_until((now + self.config.health_interval).min(deadline)) => {}
            }
        }

        handle.stop().await;
        Err(ReadyError::Timeout { port, attempts: made })
    }

    /// Stop a handle. Safe to call repeatedly.
    pub async fn stop(&self, handle: &mut ProcessHandle) -> StopOutcome {
        handle.stop().await
    }

    /// Start a fetched release on `port` and wait for it to answer.
    pub async fn start_server(
        &self,
        release: &FetchedRelease,
        port: u16,
        cancel: &CancellationToken,
    ) -> Result<(ProcessHandle, Readiness), SupervisorError> {
        let args = vec!["--http-port".to_string(), port.to_string()];
        let mut handle = self.start(&release.binary_path, &args, &release.root).await?;
        let ready = self.await_ready(&mut handle, port, cancel).await?;
        Ok((handle, ready))
    }
}
