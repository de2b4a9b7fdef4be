//! Matrix data model: toolchains, combinations and their results.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;

fn compiler_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9+._-]*$").expect("static pattern compiles"))
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("static pattern compiles"))
}

fn name_unsafe_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z0-9_.-]").expect("static pattern compiles"))
}

/// Makes `raw` usable inside runtime image and container names.
///
/// Lowercases, maps `+` to `x` and anything else outside `[a-z0-9_.-]`
/// to `_`: `clang++-14` becomes `clangxx-14`.
pub fn sanitize_name(raw: &str) -> String {
    let lowered = raw.to_lowercase().replace('+', "x");
    name_unsafe_re().replace_all(&lowered, "_").into_owned()
}

/// Checks a build-system version identifier.
pub fn validate_version(version: &str) -> Result<(), ConfigError> {
    if version_re().is_match(version) {
        Ok(())
    } else {
        Err(ConfigError::InvalidVersion(version.to_string()))
    }
}

/// A matched C and C++ compiler, passed to the image as build arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolchainPair {
    pub c_compiler: String,
    pub cxx_compiler: String,
}

impl ToolchainPair {
    /// Creates a pair after checking both identifiers.
    pub fn new(
        c_compiler: impl Into<String>,
        cxx_compiler: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let pair = Self {
            c_compiler: c_compiler.into(),
            cxx_compiler: cxx_compiler.into(),
        };
        pair.validate()?;
        Ok(pair)
    }

    /// Checks both compiler identifiers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for compiler in [&self.c_compiler, &self.cxx_compiler] {
            if !compiler_re().is_match(compiler) {
                return Err(ConfigError::InvalidCompiler(compiler.clone()));
            }
        }
        Ok(())
    }

    /// Image name for this pair: `<prefix>_<c>_<cxx>`, sanitized.
    pub fn image_name(&self, prefix: &str) -> String {
        format!(
            "{}_{}_{}",
            sanitize_name(prefix),
            sanitize_name(&self.c_compiler),
            sanitize_name(&self.cxx_compiler)
        )
    }
}

impl fmt::Display for ToolchainPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.c_compiler, self.cxx_compiler)
    }
}

impl FromStr for ToolchainPair {
    type Err = ConfigError;

    /// Parses `c_compiler:cxx_compiler`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((c, cxx)) if !c.is_empty() && !cxx.is_empty() => Self::new(c, cxx),
            _ => Err(ConfigError::InvalidToolchain(s.to_string())),
        }
    }
}

/// One scheduled test: a toolchain pair against a build-system version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildMatrixEntry {
    pub toolchain: ToolchainPair,
    pub build_system_version: String,
}

impl BuildMatrixEntry {
    pub fn new(toolchain: ToolchainPair, build_system_version: impl Into<String>) -> Self {
        Self {
            toolchain,
            build_system_version: build_system_version.into(),
        }
    }

    /// Container name for this entry: `<image>_<version>`.
    ///
    /// Unique within a run because the image name encodes the toolchain.
    pub fn container_name(&self, image_name: &str) -> String {
        format!("{}_{}", image_name, sanitize_name(&self.build_system_version))
    }
}

impl fmt::Display for BuildMatrixEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.toolchain.c_compiler, self.toolchain.cxx_compiler, self.build_system_version
        )
    }
}

/// Verdict for one combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
    InfrastructureError,
    /// Dry run: the runtime commands were only logged.
    Skipped,
}

impl RunStatus {
    /// Verdict from the exit code text the runtime printed.
    ///
    /// Exactly `"0"` passes; any other text fails; no text at all is an
    /// infrastructure error.
    pub fn from_exit_text(exit_code: Option<&str>) -> Self {
        match exit_code.map(str::trim) {
            Some("0") => RunStatus::Passed,
            Some("") | None => RunStatus::InfrastructureError,
            Some(_) => RunStatus::Failed,
        }
    }

    /// The line printed for this verdict.
    pub fn message(&self) -> &'static str {
        match self {
            RunStatus::Passed => "Sanity test passed",
            RunStatus::Failed => "Sanity test failed",
            RunStatus::InfrastructureError => "Test failed due to infrastructure error",
            RunStatus::Skipped => "Sanity test skipped (dry run)",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Passed => write!(f, "passed"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::InfrastructureError => write!(f, "infrastructure_error"),
            RunStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of one combination. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub entry: BuildMatrixEntry,
    /// Container exit code; absent when the runtime never reported one.
    pub exit_code: Option<i64>,
    pub status: RunStatus,
    /// Container state, or the error that prevented one.
    pub detail: Option<String>,
    pub duration_ms: u64,
    /// Last lines of the container log for a non-passing run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_tail: Option<String>,
}

impl RunResult {
    /// Whether this combination passed.
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// The lines printed for this result.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = vec![format!("Combination: {}", self.entry)];
        if let Some(detail) = &self.detail {
            lines.push(format!("Container status: {}", detail));
        }
        lines.push(format!(
            "Container exit code: {}",
            self.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "n/a".to_string())
        ));
        lines.push(self.status.message().to_string());
        lines
    }
}

/// Keeps the last `max_lines` lines of `text`.
pub fn tail_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}

/// All results of one matrix run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub results: Vec<RunResult>,
}

impl MatrixReport {
    /// Empty report stamped with a fresh run id.
    pub fn begin() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            started_at: now,
            finished_at: now,
            results: Vec::new(),
        }
    }

    /// Number of results with the given verdict.
    pub fn count(&self, status: RunStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Whether every combination passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(RunResult::passed)
    }

    /// Process exit code summarizing the matrix: 1 if any combination
    /// failed or hit an infrastructure error, else 0.
    ///
    /// A dry run (all [`RunStatus::Skipped`]) exits 0.
    pub fn exit_code(&self) -> u8 {
        let broken = self
            .results
            .iter()
            .any(|r| matches!(r.status, RunStatus::Failed | RunStatus::InfrastructureError));
        u8::from(broken)
    }
}
