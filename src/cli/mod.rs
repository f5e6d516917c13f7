// src/cli/mod.rs
//! Command-line interface definitions
//!
//! Subcommand and option structures parsed by clap. The binary entry
//! point dispatches on [`Action`].

/// Subcommand and option definitions
pub mod commands;

// Re-export main components
pub use commands::{Action, BenchmarkOptions, Commands, ConfigOptions, StartOptions};
