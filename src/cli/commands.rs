//! CLI command definitions for build-sanity.
//!
//! `run` tests a single toolchain pair against one build-system version.
//! `matrix` runs the full cross product, optionally from a YAML file.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::error::ErrorKind;
use clap::Parser;

use crate::execution::CommandRunner;
use crate::matrix::{
    check_image_names, validate_version, MatrixConfig, MatrixFile, MatrixReport, MatrixRunner,
    ToolchainPair,
};

/// Printed on stdout when the arguments cannot be parsed.
pub const USAGE: &str =
    "Usage: build-sanity run <C_COMPILER> <CXX_COMPILER> <BUILD_SYSTEM_VERSION>";

/// Runs build sanity tests across compiler toolchains and build-system versions.
#[derive(Parser, Debug)]
#[command(name = "build-sanity")]
#[command(about = "Build sanity tests across compiler toolchains and build-system versions")]
#[command(version)]
#[command(
    long_about = "build-sanity builds one container image per compiler toolchain and runs the project's build inside a fresh container for each build-system version.\n\nExample usage:\n  build-sanity run gcc-11 g++-11 3.25\n  build-sanity matrix --toolchain clang-17:clang++-17 --build-system-version 3.28"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum Commands {
    /// Test one toolchain pair against one build-system version.
    Run(RunArgs),

    /// Test every toolchain pair against every build-system version.
    Matrix(MatrixArgs),
}

/// Arguments for a single combination.
#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// C compiler passed to the image build (e.g. gcc-11).
    pub c_compiler: String,

    /// C++ compiler passed to the image build (e.g. g++-11).
    pub cxx_compiler: String,

    /// Build-system version passed to the container (e.g. 3.25).
    pub build_system_version: String,

    #[command(flatten)]
    pub options: RuntimeArgs,
}

/// Arguments for a full matrix run.
#[derive(clap::Args, Debug)]
pub struct MatrixArgs {
    /// YAML matrix file; flags below override its values.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Toolchain pair as `c_compiler:cxx_compiler`. Repeatable.
    #[arg(short = 't', long = "toolchain", value_name = "C:CXX")]
    pub toolchains: Vec<ToolchainPair>,

    /// Build-system version. Repeatable.
    #[arg(long = "build-system-version", value_name = "VERSION")]
    pub versions: Vec<String>,

    #[command(flatten)]
    pub options: RuntimeArgs,
}

/// Options shared by `run` and `matrix`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RuntimeArgs {
    /// Dockerfile used for the image build.
    #[arg(long)]
    pub dockerfile: Option<PathBuf>,

    /// Image build context directory.
    #[arg(long)]
    pub context: Option<PathBuf>,

    /// Host directory mounted into each container (default: current directory).
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Container runtime binary.
    #[arg(long, env = "BUILD_SANITY_RUNTIME")]
    pub runtime: Option<String>,

    /// Keep the built images after the run.
    #[arg(long)]
    pub keep_image: bool,

    /// Disable periodic progress logs.
    #[arg(long)]
    pub no_progress: bool,

    /// Print the run report as JSON instead of result lines.
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Log the runtime commands instead of executing them.
    #[arg(long)]
    pub dry_run: bool,
}

impl RuntimeArgs {
    /// Overlays these options on `config`.
    pub fn apply(&self, mut config: MatrixConfig) -> anyhow::Result<MatrixConfig> {
        if let Some(runtime) = &self.runtime {
            config = config.with_runtime(runtime);
        }
        if let Some(dockerfile) = &self.dockerfile {
            config = config.with_dockerfile(dockerfile);
        }
        if let Some(context) = &self.context {
            config = config.with_build_context(context);
        }
        if self.keep_image {
            config = config.with_keep_images(true);
        }
        if self.no_progress {
            config = config.with_progress_interval(None);
        }

        let workdir = self.workdir.clone().unwrap_or_else(|| config.workdir.clone());
        Ok(config.with_workdir(resolve_workdir(&workdir)?))
    }
}

/// Bind mounts need an absolute host path.
fn resolve_workdir(path: &Path) -> anyhow::Result<PathBuf> {
    std::fs::canonicalize(path)
        .with_context(|| format!("Cannot resolve working directory '{}'", path.display()))
}

impl Cli {
    pub fn options(&self) -> &RuntimeArgs {
        match &self.command {
            Commands::Run(args) => &args.options,
            Commands::Matrix(args) => &args.options,
        }
    }
}

/// Argument parsing ended the program before any command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliExit {
    pub code: u8,
    pub stdout: String,
    pub stderr: String,
}

/// Parse the process arguments.
///
/// This allows main.rs to read the log level before running commands.
pub fn parse_cli() -> Result<Cli, CliExit> {
    parse_cli_from(std::env::args_os())
}

/// Parse `args` (program name first).
///
/// `--help` and `--version` exit 0 with their text on stdout. Any other
/// parse error exits 1 with the usage line on stdout and clap's
/// diagnostic on stderr.
pub fn parse_cli_from<I, T>(args: I) -> Result<Cli, CliExit>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::try_parse_from(args).map_err(|err| match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => CliExit {
            code: 0,
            stdout: err.render().to_string(),
            stderr: String::new(),
        },
        _ => CliExit {
            code: 1,
            stdout: format!("{}\n", USAGE),
            stderr: err.render().to_string(),
        },
    })
}

/// Run the CLI with the parsed arguments, issuing runtime commands
/// through `runner`.
pub async fn run_with_cli(cli: Cli, runner: Arc<dyn CommandRunner>) -> anyhow::Result<MatrixReport> {
    match cli.command {
        Commands::Run(args) => run_single_command(args, runner).await,
        Commands::Matrix(args) => run_matrix_command(args, runner).await,
    }
}

async fn run_single_command(
    args: RunArgs,
    runner: Arc<dyn CommandRunner>,
) -> anyhow::Result<MatrixReport> {
    let toolchain = ToolchainPair::new(&args.c_compiler, &args.cxx_compiler)?;
    validate_version(&args.build_system_version)?;
    let config = args.options.apply(MatrixConfig::default())?;

    execute(
        config,
        &args.options,
        vec![toolchain],
        vec![args.build_system_version],
        runner,
    )
    .await
}

async fn run_matrix_command(
    args: MatrixArgs,
    runner: Arc<dyn CommandRunner>,
) -> anyhow::Result<MatrixReport> {
    let file = match &args.config {
        Some(path) => MatrixFile::load(path)?,
        None => MatrixFile::default(),
    };

    let toolchains = if args.toolchains.is_empty() {
        file.toolchains
    } else {
        args.toolchains
    };
    let versions = if args.versions.is_empty() {
        file.build_system_versions
    } else {
        args.versions
    };
    for version in &versions {
        validate_version(version)?;
    }
    if toolchains.is_empty() || versions.is_empty() {
        anyhow::bail!("Matrix is empty: at least one toolchain and one build-system version are required");
    }

    let config = args.options.apply(file.config)?;
    execute(config, &args.options, toolchains, versions, runner).await
}

async fn execute(
    config: MatrixConfig,
    options: &RuntimeArgs,
    toolchains: Vec<ToolchainPair>,
    versions: Vec<String>,
    runner: Arc<dyn CommandRunner>,
) -> anyhow::Result<MatrixReport> {
    check_image_names(&toolchains, &config.image_prefix)?;

    let report = MatrixRunner::new(config, runner)
        .with_echo(!options.json)
        .with_dry_run(options.dry_run)
        .run_matrix(&toolchains, &versions)
        .await;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_command() {
        let cli =
            parse_cli_from(["build-sanity", "run", "gcc-11", "g++-11", "3.25"]).expect("parse");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.c_compiler, "gcc-11");
                assert_eq!(args.cxx_compiler, "g++-11");
                assert_eq!(args.build_system_version, "3.25");
                assert!(!args.options.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_missing_argument_prints_usage() {
        let exit = parse_cli_from(["build-sanity", "run", "gcc-11", "g++-11"]).expect_err("usage");
        assert_eq!(exit.code, 1);
        assert!(exit.stdout.starts_with("Usage: build-sanity run"));
        assert!(!exit.stderr.is_empty());
    }

    #[test]
    fn test_extra_argument_prints_usage() {
        let exit = parse_cli_from(["build-sanity", "run", "a", "b", "3.25", "extra"])
            .expect_err("usage");
        assert_eq!(exit.code, 1);
    }

    #[test]
    fn test_help_exits_zero() {
        let exit = parse_cli_from(["build-sanity", "--help"]).expect_err("help");
        assert_eq!(exit.code, 0);
        assert!(exit.stdout.contains("matrix"));
    }

    #[test]
    fn test_parse_matrix_overrides() {
        let cli = parse_cli_from([
            "build-sanity",
            "matrix",
            "--toolchain",
            "gcc-11:g++-11",
            "--toolchain",
            "clang-17:clang++-17",
            "--build-system-version",
            "3.25",
            "--keep-image",
            "--json",
        ])
        .expect("parse");
        match cli.command {
            Commands::Matrix(args) => {
                assert_eq!(args.toolchains.len(), 2);
                assert_eq!(args.toolchains[1].cxx_compiler, "clang++-17");
                assert_eq!(args.versions, vec!["3.25".to_string()]);
                assert!(args.options.keep_image);
                assert!(args.options.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_bad_toolchain_is_usage_error() {
        let exit = parse_cli_from(["build-sanity", "matrix", "--toolchain", "gcc-11"])
            .expect_err("usage");
        assert_eq!(exit.code, 1);
    }

    #[test]
    fn test_runtime_args_apply() {
        let dir = tempfile::tempdir().expect("tempdir");
        let options = RuntimeArgs {
            runtime: Some("podman".to_string()),
            workdir: Some(dir.path().to_path_buf()),
            no_progress: true,
            keep_image: true,
            ..Default::default()
        };

        let config = options.apply(MatrixConfig::default()).expect("apply");
        assert_eq!(config.runtime, "podman");
        assert!(config.keep_images);
        assert_eq!(config.progress_interval(), None);
        assert!(config.workdir.is_absolute());
    }

    #[test]
    fn test_unresolvable_workdir_is_error() {
        let options = RuntimeArgs {
            workdir: Some(PathBuf::from("/definitely/not/here/build-sanity")),
            ..Default::default()
        };
        assert!(options.apply(MatrixConfig::default()).is_err());
    }
}
