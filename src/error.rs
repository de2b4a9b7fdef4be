//! Error types for build-sanity operations.
//!
//! Each layer of the orchestrator has its own error type:
//! - Command execution (the program could not be run at all)
//! - Container runtime operations (the runtime answered with a failure)
//! - Image builds
//! - Container lifecycle (no observable terminal state was reached)
//! - Matrix configuration
//!
//! A container exiting non-zero is not an error: it is recorded as a
//! failed combination in the run report.

use thiserror::Error;

/// Errors raised when an external command could not be run to completion.
///
/// A command that ran and exited non-zero is *not* a `CommandError`.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command '{program}' has no program to execute")]
    EmptyCommand { program: String },

    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command '{program}' timed out after {seconds} seconds")]
    TimedOut { program: String, seconds: u64 },

    #[error("IO error while waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that can occur during container runtime operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("Runtime '{operation}' on '{target}' exited with code {code:?}: {stderr}")]
    NonZeroExit {
        operation: &'static str,
        target: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Errors that can occur while building a test image.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Image build for '{image}' failed with code {code:?}: {stderr}")]
    Failed {
        image: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Image build for '{image}' could not run: {source}")]
    Command {
        image: String,
        #[source]
        source: CommandError,
    },
}

/// Errors that leave a container without an observable terminal state.
///
/// These are failures of the harness or environment, not of the code
/// under test.
#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("Failed to create container '{container}': {source}")]
    Create {
        container: String,
        #[source]
        source: DockerError,
    },

    #[error("Failed to start container '{container}': {source}")]
    Start {
        container: String,
        #[source]
        source: DockerError,
    },

    #[error("Cannot {action} container '{container}' in {state} state")]
    InvalidState {
        container: String,
        action: &'static str,
        state: String,
    },

    #[error("Container '{container}' did not finish within {seconds} seconds")]
    WaitTimedOut { container: String, seconds: u64 },

    #[error("Waiting for container '{container}' failed: {source}")]
    Wait {
        container: String,
        #[source]
        source: DockerError,
    },

    #[error("Failed to inspect container '{container}': {source}")]
    Inspect {
        container: String,
        #[source]
        source: DockerError,
    },

    #[error("Runtime reported no state for container '{container}'")]
    NoState { container: String },

    #[error("Container '{container}' never exited (state: {state})")]
    NotExited { container: String, state: String },

    #[error("Runtime reported no exit code for container '{container}'")]
    MissingExitCode { container: String },
}

/// Errors in matrix configuration and command-line values.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid toolchain '{0}': expected '<c_compiler>:<cxx_compiler>'")]
    InvalidToolchain(String),

    #[error("Invalid compiler identifier '{0}': only alphanumeric, +, -, _, . allowed")]
    InvalidCompiler(String),

    #[error("Invalid build-system version '{0}': only alphanumeric, -, _, . allowed")]
    InvalidVersion(String),

    #[error("Toolchains '{first}' and '{second}' both map to image name '{image}'")]
    ImageNameCollision {
        image: String,
        first: String,
        second: String,
    },

    #[error("Failed to read matrix file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse matrix file '{path}': {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
