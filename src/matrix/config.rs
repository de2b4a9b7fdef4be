//! Configuration for matrix runs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::matrix::types::{validate_version, BuildMatrixEntry, ToolchainPair};

/// C compilers of the default matrix, paired index-wise with [`DEFAULT_CXX_COMPILERS`].
pub const DEFAULT_C_COMPILERS: [&str; 4] = ["clang-14", "clang-15", "clang-16", "clang-17"];

/// C++ compilers of the default matrix.
pub const DEFAULT_CXX_COMPILERS: [&str; 4] = ["clang++-14", "clang++-15", "clang++-16", "clang++-17"];

/// CMake versions of the default matrix.
pub const DEFAULT_BUILD_SYSTEM_VERSIONS: [&str; 9] = [
    "3.22", "3.23", "3.24", "3.25", "3.26", "3.27", "3.28", "3.29", "3.30",
];

/// How the matrix runner talks to the runtime and what it passes to containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixConfig {
    /// Runtime binary (e.g. `docker`, `podman`).
    pub runtime: String,
    /// Build with `buildx build` rather than `build`.
    pub use_buildx: bool,
    /// Dockerfile for the test image.
    pub dockerfile: PathBuf,
    /// Build context directory.
    pub build_context: PathBuf,
    /// Prefix of image names.
    pub image_prefix: String,
    /// Host directory bind-mounted into every container.
    pub workdir: PathBuf,
    /// Mount point of `workdir` inside the container; also exported as `WORKDIR`.
    pub mount_target: String,
    /// Network mode for builds and containers; `None` for the runtime default.
    pub network_mode: Option<String>,
    /// Environment variable carrying the build-system version.
    pub version_env_var: String,
    /// Upper bound for one image build, in seconds.
    pub build_timeout_secs: u64,
    /// Upper bound for one container run, in seconds.
    pub run_timeout_secs: u64,
    /// Upper bound for other runtime calls, in seconds.
    pub command_timeout_secs: u64,
    /// Leave images in place after their sub-matrix.
    pub keep_images: bool,
    /// Progress log interval in seconds; `None` disables progress logs.
    pub progress_interval_secs: Option<u64>,
    /// Container log lines kept for non-passing runs.
    pub log_tail_lines: usize,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            use_buildx: true,
            dockerfile: PathBuf::from("Tests/Dockerfile"),
            build_context: PathBuf::from("."),
            image_prefix: "build_sanity_test".to_string(),
            workdir: PathBuf::from("."),
            mount_target: "/usr/src/app".to_string(),
            network_mode: Some("host".to_string()),
            version_env_var: "CMAKE_VERSION".to_string(),
            build_timeout_secs: 3600,
            run_timeout_secs: 3600,
            command_timeout_secs: 120,
            keep_images: false,
            progress_interval_secs: Some(10),
            log_tail_lines: 40,
        }
    }
}

impl MatrixConfig {
    /// Sets the runtime binary.
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    /// Sets the Dockerfile.
    pub fn with_dockerfile(mut self, dockerfile: impl Into<PathBuf>) -> Self {
        self.dockerfile = dockerfile.into();
        self
    }

    /// Sets the build context.
    pub fn with_build_context(mut self, context: impl Into<PathBuf>) -> Self {
        self.build_context = context.into();
        self
    }

    /// Sets the host directory mounted into containers.
    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Keeps images after their sub-matrix.
    pub fn with_keep_images(mut self, keep: bool) -> Self {
        self.keep_images = keep;
        self
    }

    /// Sets the progress interval; `None` disables progress logs.
    pub fn with_progress_interval(mut self, interval: Option<Duration>) -> Self {
        self.progress_interval_secs = interval.map(|d| d.as_secs().max(1));
        self
    }

    /// Sets the bound on one container run, rounded down to whole
    /// seconds but never below one.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs.max(1))
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }

    pub fn progress_interval(&self) -> Option<Duration> {
        self.progress_interval_secs
            .map(|secs| Duration::from_secs(secs.max(1)))
    }

    /// Build arguments for a toolchain's image.
    pub fn build_args(&self, toolchain: &ToolchainPair) -> BTreeMap<String, String> {
        let mut args = BTreeMap::new();
        args.insert("C_COMPILER".to_string(), toolchain.c_compiler.clone());
        args.insert("CXX_COMPILER".to_string(), toolchain.cxx_compiler.clone());
        args
    }

    /// Environment passed into the container for `entry`.
    pub fn container_env(&self, entry: &BuildMatrixEntry) -> Vec<(String, String)> {
        vec![
            ("WORKDIR".to_string(), self.mount_target.clone()),
            (
                self.version_env_var.clone(),
                entry.build_system_version.clone(),
            ),
            ("C_COMPILER".to_string(), entry.toolchain.c_compiler.clone()),
            (
                "CXX_COMPILER".to_string(),
                entry.toolchain.cxx_compiler.clone(),
            ),
        ]
    }
}

/// Toolchains of the default matrix.
pub fn default_toolchains() -> Vec<ToolchainPair> {
    DEFAULT_C_COMPILERS
        .iter()
        .zip(DEFAULT_CXX_COMPILERS.iter())
        .map(|(c, cxx)| ToolchainPair {
            c_compiler: c.to_string(),
            cxx_compiler: cxx.to_string(),
        })
        .collect()
}

/// Build-system versions of the default matrix.
pub fn default_build_system_versions() -> Vec<String> {
    DEFAULT_BUILD_SYSTEM_VERSIONS
        .iter()
        .map(|v| v.to_string())
        .collect()
}

/// A matrix file: runner configuration plus the matrix axes.
///
/// ```yaml
/// dockerfile: Tests/Dockerfile
/// keep_images: false
/// toolchains:
///   - c_compiler: gcc-11
///     cxx_compiler: g++-11
/// build_system_versions: ["3.25", "3.26"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixFile {
    #[serde(flatten)]
    pub config: MatrixConfig,
    #[serde(default = "default_toolchains")]
    pub toolchains: Vec<ToolchainPair>,
    #[serde(default = "default_build_system_versions")]
    pub build_system_versions: Vec<String>,
}

impl Default for MatrixFile {
    fn default() -> Self {
        Self {
            config: MatrixConfig::default(),
            toolchains: default_toolchains(),
            build_system_versions: default_build_system_versions(),
        }
    }
}

impl MatrixFile {
    /// Parses a matrix file from YAML text.
    pub fn from_yaml(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let file: MatrixFile = serde_yaml::from_str(text).map_err(|source| ConfigError::Yaml {
            path: origin.to_string(),
            source,
        })?;
        file.validate()?;
        Ok(file)
    }

    /// Loads and validates a matrix file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&text, &path.display().to_string())
    }

    /// Checks every toolchain and version identifier.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for toolchain in &self.toolchains {
            toolchain.validate()?;
        }
        for version in &self.build_system_versions {
            validate_version(version)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_matrix_config_defaults() {
        let config = MatrixConfig::default();
        assert_eq!(config.runtime, "docker");
        assert_eq!(config.dockerfile, PathBuf::from("Tests/Dockerfile"));
        assert_eq!(config.mount_target, "/usr/src/app");
        assert_eq!(config.network_mode.as_deref(), Some("host"));
        assert_eq!(config.run_timeout(), Duration::from_secs(3600));
        assert_eq!(config.progress_interval(), Some(Duration::from_secs(10)));
        assert!(!config.keep_images);
    }

    #[test]
    fn test_matrix_config_builder() {
        let config = MatrixConfig::default()
            .with_runtime("podman")
            .with_dockerfile("ci/Dockerfile")
            .with_workdir("/src/lib")
            .with_keep_images(true)
            .with_progress_interval(None)
            .with_run_timeout(Duration::from_secs(600));

        assert_eq!(config.runtime, "podman");
        assert_eq!(config.dockerfile, PathBuf::from("ci/Dockerfile"));
        assert_eq!(config.workdir, PathBuf::from("/src/lib"));
        assert!(config.keep_images);
        assert!(config.progress_interval().is_none());
        assert_eq!(config.run_timeout_secs, 600);
    }

    #[test]
    fn test_timeouts_never_zero() {
        let config = MatrixConfig::default().with_run_timeout(Duration::from_millis(250));
        assert_eq!(config.run_timeout_secs, 1);
        assert_eq!(config.run_timeout(), Duration::from_secs(1));

        let file = MatrixFile::from_yaml(
            "run_timeout_secs: 0\nbuild_timeout_secs: 0\ncommand_timeout_secs: 0\n",
            "inline",
        )
        .expect("parse");
        assert_eq!(file.config.run_timeout(), Duration::from_secs(1));
        assert_eq!(file.config.build_timeout(), Duration::from_secs(1));
        assert_eq!(file.config.command_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_container_env() {
        let config = MatrixConfig::default();
        let entry = BuildMatrixEntry::new(
            ToolchainPair::new("gcc-11", "g++-11").expect("pair"),
            "3.25",
        );

        let env = config.container_env(&entry);
        assert_eq!(
            env,
            vec![
                ("WORKDIR".to_string(), "/usr/src/app".to_string()),
                ("CMAKE_VERSION".to_string(), "3.25".to_string()),
                ("C_COMPILER".to_string(), "gcc-11".to_string()),
                ("CXX_COMPILER".to_string(), "g++-11".to_string()),
            ]
        );
    }

    #[test]
    fn test_build_args() {
        let args = MatrixConfig::default()
            .build_args(&ToolchainPair::new("clang-16", "clang++-16").expect("pair"));
        assert_eq!(args.get("C_COMPILER").map(String::as_str), Some("clang-16"));
        assert_eq!(args.get("CXX_COMPILER").map(String::as_str), Some("clang++-16"));
    }

    #[test]
    fn test_default_matrix() {
        let toolchains = default_toolchains();
        assert_eq!(toolchains.len(), 4);
        assert_eq!(toolchains[0].c_compiler, "clang-14");
        assert_eq!(toolchains[0].cxx_compiler, "clang++-14");
        assert_eq!(default_build_system_versions().len(), 9);
    }

    #[test]
    fn test_matrix_file_from_yaml() {
        let yaml = r#"
runtime: podman
keep_images: true
progress_interval_secs: null
toolchains:
  - c_compiler: gcc-11
    cxx_compiler: g++-11
build_system_versions: ["3.25", "3.26"]
"#;
        let file = MatrixFile::from_yaml(yaml, "inline").expect("parse");
        assert_eq!(file.config.runtime, "podman");
        assert!(file.config.keep_images);
        assert!(file.config.progress_interval().is_none());
        assert_eq!(file.config.mount_target, "/usr/src/app");
        assert_eq!(file.toolchains.len(), 1);
        assert_eq!(file.build_system_versions, vec!["3.25", "3.26"]);
    }

    #[test]
    fn test_matrix_file_defaults_axes() {
        let file = MatrixFile::from_yaml("dockerfile: Dockerfile\n", "inline").expect("parse");
        assert_eq!(file.toolchains, default_toolchains());
        assert_eq!(file.build_system_versions.len(), 9);
    }

    #[test]
    fn test_matrix_file_rejects_bad_version() {
        let yaml = "build_system_versions: [\"3.25 && reboot\"]\n";
        let err = MatrixFile::from_yaml(yaml, "inline").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidVersion(_)));
    }

    #[test]
    fn test_matrix_file_load() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "image_prefix: nightly").expect("write");
        writeln!(file, "build_system_versions: [\"3.30\"]").expect("write");

        let loaded = MatrixFile::load(file.path()).expect("load");
        assert_eq!(loaded.config.image_prefix, "nightly");
        assert_eq!(loaded.build_system_versions, vec!["3.30"]);
    }

    #[test]
    fn test_matrix_file_load_missing() {
        let err = MatrixFile::load(Path::new("/nonexistent/matrix.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
