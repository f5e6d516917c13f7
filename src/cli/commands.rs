// src/cli/commands.rs
use crate::types::BackendKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ProgPoW Miner CLI - device-farm proof-of-work miner in Rust
#[derive(Parser, Debug)]
#[command(name = "progpow-miner-rs")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// The action to perform (start mining, run benchmarks, or generate config)
    #[command(subcommand)]
    pub action: Action,
}

/// Top-level commands for the miner application
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Start the device farm against the simulated chain
    Start(StartOptions),

    /// Run a fixed-duration search benchmark on the selected backend
    Benchmark(BenchmarkOptions),

    /// Generate configuration file template
    Config(ConfigOptions),
}

/// Options for starting the mining operation
#[derive(Parser, Debug)]
pub struct StartOptions {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Number of devices to open (overrides config; 0 = auto-detect)
    #[arg(short, long)]
    pub devices: Option<usize>,

    /// Device backend family to use (overrides config)
    #[arg(short, long)]
    pub backend: Option<BackendKind>,

    /// Terminate the process when a device worker fails
    #[arg(long)]
    pub exit_on_error: bool,
}

/// Options for running search benchmarks
#[derive(Parser, Debug)]
pub struct BenchmarkOptions {
    /// Backend to benchmark
    #[arg(short, long, default_value_t = BackendKind::Cpu)]
    pub backend: BackendKind,

    /// Duration of benchmark in seconds
    #[arg(long, default_value_t = 20)]
    pub duration: u64,

    /// Number of devices to benchmark (0 = auto-detect)
    #[arg(short, long, default_value_t = 1)]
    pub devices: usize,

    /// Epoch whose working set the benchmark runs against
    #[arg(short, long, default_value_t = 0)]
    pub epoch: u64,
}

/// Options for generating configuration files
#[derive(Parser, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,
}
