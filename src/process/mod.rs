// Copyright 2024-2026 MLOS System Test Contributors
// SPDX-License-Identifier: Apache-2.0

//! Subprocess execution seam.
//!
//! Every external program the harness touches (install tool, download tool,
//! container CLI, the core server) is launched through [`ProcessRunner`].
//! Production code uses [`TokioProcessRunner`]; tests use [`ScriptedRunner`].

mod runner;
mod scripted;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use runner::TokioProcessRunner;
pub use scripted::{FakeProcessState, ScriptedResponse, ScriptedRunner, SpawnScript};

/// Description of a command to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub envs: Vec<(String, String)>,
    /// Redirect targets for long-running processes. Ignored by `run`.
    pub stdout_log: Option<PathBuf>,
    pub stderr_log: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            envs: Vec::new(),
            stdout_log: None,
            stderr_log: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn log_to(mut self, stdout: impl Into<PathBuf>, stderr: impl Into<PathBuf>) -> Self {
        self.stdout_log = Some(stdout.into());
        self.stderr_log = Some(stderr.into());
        self
    }

    /// Basename of the program, used for matching and log fields.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.program.display().to_string())
    }

    pub fn first_arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Value following `flag` in the argument list, if any.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessExit {
    /// `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl fmt::Display for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Captured result of a short-lived command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit: ProcessExit,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit.success()
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting on {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Launches commands.
///
/// `run` captures stdout/stderr in memory and resolves when the process
/// exits. Dropping the future kills the child. `spawn` starts a
/// long-running process and hands back a control handle.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, ProcessError>;

    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn ProcessControl>, ProcessError>;
}

/// Control surface of a spawned process.
#[async_trait]
pub trait ProcessControl: Send {
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> std::io::Result<Option<ProcessExit>>;

    /// Kill and reap.
    async fn kill(&mut self) -> std::io::Result<()>;
}
