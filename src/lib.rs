//! build-sanity: build sanity tests across a compiler/build-system matrix.
//!
//! For every toolchain pair an image is built once; for every
//! build-system version a fresh container runs the project's build
//! against that image. Containers and images are always cleaned up, and
//! each combination yields a pass, fail or infrastructure-error verdict.

// Core modules
pub mod cli;
pub mod error;
pub mod execution;
pub mod matrix;
pub mod progress;

// Re-export commonly used types
pub use error::{BuildError, CommandError, ConfigError, DockerError, InfrastructureError};
pub use matrix::{MatrixConfig, MatrixReport, MatrixRunner, RunResult, RunStatus, ToolchainPair};
