//! build-sanity CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

use std::process::ExitCode;
use std::sync::Arc;

use build_sanity::execution::{CommandRunner, ProcessRunner, ScriptedRunner};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first to get log_level
    let cli = match build_sanity::cli::parse_cli() {
        Ok(cli) => cli,
        Err(exit) => {
            print!("{}", exit.stdout);
            eprint!("{}", exit.stderr);
            return ExitCode::from(exit.code);
        }
    };

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());

    // Result lines own stdout, so diagnostics go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    let runner: Arc<dyn CommandRunner> = if cli.options().dry_run {
        Arc::new(ScriptedRunner::dry_run())
    } else {
        Arc::new(ProcessRunner::new())
    };

    match build_sanity::cli::run_with_cli(cli, runner).await {
        Ok(report) => ExitCode::from(report.exit_code()),
        Err(e) => {
            tracing::error!(error = %e, "Sanity test run aborted");
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}
