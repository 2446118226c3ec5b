//! Command-line interface for jobforge.
//!
//! Provides commands for running and supervising workers, enqueueing jobs
//! and inspecting their state.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
