//! Build-matrix model and runner.
//!
//! A matrix is the cross product of toolchain pairs and build-system
//! versions. Each toolchain pair gets one image; each version of that
//! pair runs in its own container against the shared image.

pub mod config;
pub mod runner;
pub mod types;

pub use config::{
    default_build_system_versions, default_toolchains, MatrixConfig, MatrixFile,
};
pub use runner::{check_image_names, plan, MatrixRunner};
pub use types::{
    sanitize_name, tail_lines, validate_version, BuildMatrixEntry, MatrixReport, RunResult,
    RunStatus, ToolchainPair,
};
