//! Real subprocess execution on top of `tokio::process`.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use super::{CommandOutput, CommandSpec, ProcessControl, ProcessError, ProcessExit, ProcessRunner};

/// Runs commands as real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

fn build_command(cmd: &CommandSpec) -> Command {
    let mut command = Command::new(&cmd.program);
    command.args(&cmd.args);
    if let Some(dir) = &cmd.current_dir {
        command.current_dir(dir);
    }
    for (key, value) in &cmd.envs {
        command.env(key, value);
    }
    command.stdin(Stdio::null()).kill_on_drop(true);
    command
}

fn log_target(path: &Option<std::path::PathBuf>, program: &str) -> Result<Stdio, ProcessError> {
    match path {
        Some(path) => std::fs::File::create(path)
            .map(Stdio::from)
            .map_err(|source| ProcessError::Spawn {
                program: program.to_string(),
                source,
            }),
        None => Ok(Stdio::null()),
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        let program = cmd.program_name();
        let mut command = build_command(cmd);
        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        tracing::debug!(command = %cmd, "running");
        let started = Instant::now();
        let child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;
        let output = child
            .wait_with_output()
            .await
            .map_err(|source| ProcessError::Wait { program, source })?;

        Ok(CommandOutput {
            exit: ProcessExit {
                code: output.status.code(),
            },
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn ProcessControl>, ProcessError> {
        let program = cmd.program_name();
        let mut command = build_command(cmd);
        command
            .stdout(log_target(&cmd.stdout_log, &program)?)
            .stderr(log_target(&cmd.stderr_log, &program)?);

        tracing::debug!(command = %cmd, "spawning");
        let child = command
            .spawn()
            .map_err(|source| ProcessError::Spawn { program, source })?;
        Ok(Box::new(TokioProcess { child }))
    }
}

struct TokioProcess {
    child: Child,
}

#[async_trait]
impl ProcessControl for TokioProcess {
    fn id(&self) -> Option<u32> {
        self.child.id()
    }

    fn try_wait(&mut self) -> std::io::Result<Option<ProcessExit>> {
        Ok(self
            .child
            .try_wait()?
            .map(|status| ProcessExit { code: status.code() }))
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }
}
