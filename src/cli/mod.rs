//! Command-line interface for build-sanity.
//!
//! Provides the `run` and `matrix` commands.

mod commands;

pub use commands::{
    parse_cli, parse_cli_from, run_with_cli, Cli, CliExit, Commands, MatrixArgs, RunArgs,
    RuntimeArgs, USAGE,
};
