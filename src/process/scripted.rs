//! Scripted [`ProcessRunner`] double.
//!
//! Responses are keyed by program basename and, optionally, the first
//! argument. Every call is recorded so tests can assert on what would have
//! been launched. Unmatched commands fail as if the program did not exist.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{CommandOutput, CommandSpec, ProcessControl, ProcessError, ProcessExit, ProcessRunner};

type SideEffect = Arc<dyn Fn(&CommandSpec) + Send + Sync>;
type Refusal = Arc<dyn Fn(&CommandSpec) -> Option<String> + Send + Sync>;

/// Canned result for `run`.
#[derive(Clone)]
pub struct ScriptedResponse {
    exit_code: i32,
    stdout: String,
    stderr: String,
    delay: Duration,
    side_effect: Option<SideEffect>,
    refusal: Option<Refusal>,
}

impl ScriptedResponse {
    pub fn success() -> Self {
        Self::exit(0)
    }

    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            stdout: String::new(),
            stderr: String::new(),
            delay: Duration::ZERO,
            side_effect: None,
            refusal: None,
        }
    }

    pub fn stdout(mut self, text: impl Into<String>) -> Self {
        self.stdout = text.into();
        self
    }

    pub fn stderr(mut self, text: impl Into<String>) -> Self {
        self.stderr = text.into();
        self
    }

    /// Simulated run time (honours paused tokio time).
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Hook invoked with the command before the response is returned,
    /// e.g. to create files the real tool would have written.
    pub fn with_effect<F>(mut self, effect: F) -> Self
    where
        F: Fn(&CommandSpec) + Send + Sync + 'static,
    {
        self.side_effect = Some(Arc::new(effect));
        self
    }

    /// Fail with exit code 1 and the returned message as stderr whenever
    /// `check` yields one. Checked before the side effect runs.
    pub fn refuse_when<F>(mut self, check: F) -> Self
    where
        F: Fn(&CommandSpec) -> Option<String> + Send + Sync + 'static,
    {
        self.refusal = Some(Arc::new(check));
        self
    }
}

/// Behaviour of a spawned fake process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnScript {
    /// Stays alive until killed.
    Running,
    /// Already exited with the given code.
    Exited(i32),
    /// Spawning fails.
    Fail,
}

/// Observable state of a spawned fake process.
#[derive(Debug)]
pub struct FakeProcessState {
    pub pid: u32,
    kills: AtomicUsize,
    exited: AtomicBool,
    exit_code: AtomicI32,
}

impl FakeProcessState {
    pub fn kill_count(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Simulate the process exiting on its own.
    pub fn exit_with(&self, code: i32) {
        self.exit_code.store(code, Ordering::SeqCst);
        self.exited.store(true, Ordering::SeqCst);
    }
}

struct Rule {
    program: String,
    first_arg: Option<String>,
    response: ScriptedResponse,
}

#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    spawn_rules: Mutex<Vec<(String, SpawnScript)>>,
    calls: Mutex<Vec<CommandSpec>>,
    spawned: Mutex<Vec<Arc<FakeProcessState>>>,
    next_pid: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicUsize::new(4000),
            ..Default::default()
        }
    }

    /// Register a response for `program` (basename), optionally only when
    /// the first argument equals `first_arg`. Later rules take precedence.
    pub fn on(self, program: &str, first_arg: Option<&str>, response: ScriptedResponse) -> Self {
        self.rules.lock().push(Rule {
            program: program.to_string(),
            first_arg: first_arg.map(str::to_string),
            response,
        });
        self
    }

    pub fn on_spawn(self, program: &str, script: SpawnScript) -> Self {
        self.spawn_rules.lock().push((program.to_string(), script));
        self
    }

    /// Every command passed to `run` or `spawn`, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Calls whose first argument is `first_arg`.
    pub fn calls_with_first_arg(&self, first_arg: &str) -> Vec<CommandSpec> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.first_arg() == Some(first_arg))
            .cloned()
            .collect()
    }

    pub fn spawned(&self) -> Vec<Arc<FakeProcessState>> {
        self.spawned.lock().clone()
    }

    fn lookup(&self, cmd: &CommandSpec) -> Option<ScriptedResponse> {
        let name = cmd.program_name();
        self.rules
            .lock()
            .iter()
            .rev()
            .find(|rule| {
                rule.program == name
                    && rule
                        .first_arg
                        .as_deref()
                        .map_or(true, |arg| cmd.first_arg() == Some(arg))
            })
            .map(|rule| rule.response.clone())
    }
}

fn not_found(cmd: &CommandSpec) -> ProcessError {
    ProcessError::Spawn {
        program: cmd.program_name(),
        source: io::Error::new(io::ErrorKind::NotFound, "no scripted response"),
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.calls.lock().push(cmd.clone());
        let response = self.lookup(cmd).ok_or_else(|| not_found(cmd))?;

        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        if let Some(message) = response.refusal.as_ref().and_then(|check| check(cmd)) {
            return Ok(CommandOutput {
                exit: ProcessExit { code: Some(1) },
                stdout: String::new(),
                stderr: message,
                duration_ms: response.delay.as_millis() as u64,
            });
        }
        if let Some(effect) = &response.side_effect {
            effect(cmd);
        }

        Ok(CommandOutput {
            exit: ProcessExit {
                code: Some(response.exit_code),
            },
            stdout: response.stdout,
            stderr: response.stderr,
            duration_ms: response.delay.as_millis() as u64,
        })
    }

    async fn spawn(&self, cmd: &CommandSpec) -> Result<Box<dyn ProcessControl>, ProcessError> {
        self.calls.lock().push(cmd.clone());
        let name = cmd.program_name();
        let script = self
            .spawn_rules
            .lock()
            .iter()
            .rev()
            .find(|(program, _)| *program == name)
            .map(|(_, script)| *script)
            .ok_or_else(|| not_found(cmd))?;

        let state = Arc::new(FakeProcessState {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst) as u32,
            kills: AtomicUsize::new(0),
            exited: AtomicBool::new(false),
            exit_code: AtomicI32::new(0),
        });
        match script {
            SpawnScript::Fail => return Err(not_found(cmd)),
            SpawnScript::Exited(code) => state.exit_with(code),
            SpawnScript::Running => {}
        }
        self.spawned.lock().push(state.clone());
        Ok(Box::new(FakeProcess { state }))
    }
}

struct FakeProcess {
    state: Arc<FakeProcessState>,
}

#[async_trait]
impl ProcessControl for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.state.pid)
    }

    fn try_wait(&mut self) -> io::Result<Option<ProcessExit>> {
        if self.state.has_exited() {
            Ok(Some(ProcessExit {
                code: Some(self.state.exit_code.load(Ordering::SeqCst)),
            }))
        } else {
            Ok(None)
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.state.kills.fetch_add(1, Ordering::SeqCst);
        self.state.exited.store(true, Ordering::SeqCst);
        self.state.exit_code.store(-9, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_match_program_and_first_arg() {
        let runner = ScriptedRunner::new()
            .on("axon", None, ScriptedResponse::exit(1))
            .on("axon", Some("list"), ScriptedResponse::success().stdout("a\nb"));

        let list = runner.run(&CommandSpec::new("/home/u/.local/bin/axon").arg("list")).await.unwrap();
        assert!(list.success());
        assert_eq!(list.stdout, "a\nb");

        let other = runner.run(&CommandSpec::new("axon").arg("install")).await.unwrap();
        assert_eq!(other.exit.code, Some(1));

        assert_eq!(runner.call_count(), 2);
        assert_eq!(runner.calls_with_first_arg("list").len(), 1);
    }

    #[tokio::test]
    async fn test_refusal_skips_side_effect() {
        let effects = Arc::new(AtomicUsize::new(0));
        let counter = effects.clone();
        let runner = ScriptedRunner::new().on(
            "gh",
            None,
            ScriptedResponse::success()
                .refuse_when(|cmd| (!cmd.args.iter().any(|a| a == "--force")).then(|| "refused".to_string()))
                .with_effect(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        );

        let refused = runner.run(&CommandSpec::new("gh")).await.unwrap();
        assert_eq!(refused.exit.code, Some(1));
        assert_eq!(refused.stderr, "refused");
        assert_eq!(effects.load(Ordering::SeqCst), 0);

        let forced = runner.run(&CommandSpec::new("gh").arg("--force")).await.unwrap();
        assert!(forced.success());
        assert_eq!(effects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unmatched_command_is_spawn_error() {
        let runner = ScriptedRunner::new();
        let err = runner.run(&CommandSpec::new("gh")).await.unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert_eq!(runner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_fake_process_kill_is_counted() {
        let runner = ScriptedRunner::new().on_spawn("mlos-server", SpawnScript::Running);
        let mut child = runner.spawn(&CommandSpec::new("/opt/mlos-server")).await.unwrap();
        assert!(child.try_wait().unwrap().is_none());
        child.kill().await.unwrap();
        assert!(child.try_wait().unwrap().is_some());
        assert_eq!(runner.spawned()[0].kill_count(), 1);
    }
}
