//! External command execution.
//!
//! Commands are argument vectors handed straight to the process spawner;
//! nothing here goes through a shell. A non-zero exit is a normal
//! outcome and comes back as `Ok`.

use std::fmt;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::CommandError;

/// A single command invocation: program, arguments and timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute (looked up on `PATH`).
    pub program: String,
    /// Arguments, one token each.
    pub args: Vec<String>,
    /// Upper bound on the wall-clock time of the invocation.
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Creates a command for `program` with no arguments and no timeout.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// First argument, which for runtime CLIs is the verb (`build`, `rm`, ...).
    pub fn verb(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Captured result of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output, decoded as UTF-8 (lossy).
    pub stdout: String,
    /// Standard error, decoded as UTF-8 (lossy).
    pub stderr: String,
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Whether the command exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes commands. The seam between the orchestrator and the OS.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `spec` to completion.
    ///
    /// Returns `Err` only when the command could not be run (spawn
    /// failure, timeout, wait failure).
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as child processes via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        if spec.program.is_empty() {
            return Err(CommandError::EmptyCommand {
                program: spec.to_string(),
            });
        }

        tracing::debug!(command = %spec, "Running command");
        let start = Instant::now();

        // kill_on_drop makes the timeout below actually terminate the child.
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let waited = match spec.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| CommandError::TimedOut {
                    program: spec.program.clone(),
                    seconds: timeout.as_secs(),
                })?,
            None => child.wait_with_output().await,
        };

        let output = waited.map_err(|source| CommandError::Wait {
            program: spec.program.clone(),
            source,
        })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        tracing::debug!(
            command = %spec,
            exit_code = ?result.exit_code,
            duration_ms = result.duration_ms,
            "Command finished"
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_spec_builder() {
        let spec = CommandSpec::new("docker")
            .arg("rm")
            .args(["-f", "build_sanity_test_gcc-11_g__-11_3.25"])
            .with_timeout(Duration::from_secs(30));

        assert_eq!(spec.program, "docker");
        assert_eq!(spec.args.len(), 3);
        assert_eq!(spec.verb(), Some("rm"));
        assert_eq!(spec.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_command_spec_display() {
        let spec = CommandSpec::new("docker").args(["stop", "c1"]);
        assert_eq!(spec.to_string(), "docker stop c1");
    }

    #[test]
    fn test_output_success() {
        let ok = CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        let failed = CommandOutput {
            exit_code: Some(1),
            ..Default::default()
        };
        let killed = CommandOutput::default();

        assert!(ok.success());
        assert!(!failed.success());
        assert!(!killed.success());
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let spec = CommandSpec::new("echo")
            .arg("hello")
            .with_timeout(Duration::from_secs(10));

        let output = ProcessRunner::new().run(&spec).await.expect("run failed");
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let spec = CommandSpec::new("false").with_timeout(Duration::from_secs(10));

        let output = ProcessRunner::new().run(&spec).await.expect("run failed");
        assert!(!output.success());
        assert_ne!(output.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-4f2a");

        let err = ProcessRunner::new().run(&spec).await.unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .with_timeout(Duration::from_millis(100));

        let err = ProcessRunner::new().run(&spec).await.unwrap_err();
        assert!(matches!(err, CommandError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_empty_program_rejected() {
        let err = ProcessRunner::new()
            .run(&CommandSpec::new(""))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::EmptyCommand { .. }));
    }
}
