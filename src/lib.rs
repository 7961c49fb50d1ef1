//! MLOS System Test
//!
//! Release validation harness for the MLOS Core server and the Axon model
//! installer. A run fetches a published core release, installs test models
//! through the install tool, starts the server, exercises it over HTTP and
//! records the outcome in `metrics.json`.
//!
//! # Lifecycle
//!
//! - **Fetch**: download, extract and normalize the server binary ([`release`])
//! - **Install**: per-model install with heartbeat and verification ([`models`])
//! - **Supervise**: spawn, health-poll and always stop the server ([`supervisor`])
//! - **Exercise**: registration and inference requests ([`client`])
//! - **Monitor**: server CPU and memory, idle and under load ([`monitor`])
//!
//! All subprocesses go through the [`process::ProcessRunner`] trait so every
//! stage can be driven by a scripted double in tests.

pub mod cli;
pub mod client;
pub mod config;
pub mod models;
pub mod monitor;
pub mod process;
pub mod release;
pub mod results;
pub mod runner;
pub mod supervisor;
pub mod telemetry;

pub use models::{InstallOutcome, ModelInstaller, ModelSpec, PathResolver};
pub use process::{ProcessRunner, TokioProcessRunner};
pub use release::{FetchedRelease, ReleaseFetcher};
pub use results::{Metrics, MetricsRecorder, RunResults};
pub use runner::{RunError, TestRunner};
pub use supervisor::{ProcessHandle, ProcessSupervisor};
