//! Command-line interface for bench_forge.
//!
//! Provides the `run` and `aggregate` commands.

mod commands;

pub use commands::{parse_cli, run_with_cli, AggregateArgs, Cli, Commands, RunArgs};
