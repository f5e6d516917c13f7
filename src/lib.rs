//! ProgPoW Miner - host-side orchestration for proof-of-work device mining
//!
//! This crate provides the full orchestration stack for a farm of
//! compute devices running a period-specialized search kernel:
//! - Worker thread lifecycle management with restartable device loops
//! - Epoch working-set (cache + DAG) regeneration with memory admission
//! - Asynchronous compile-ahead of period kernels
//! - A most-recent-wins work exchange and solution collection
//! - Hashrate statistics and hardware monitoring
//!
//! The included CPU backend executes the search kernel in software so
//! the whole stack runs without any GPU runtime present.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

/// Miner core implementation: worker lifecycle, device loop, compiler
pub mod miner;

/// Farm orchestration: work exchange and device-farm facade
pub mod farm;

/// Device backend capability interface and the CPU reference backend
pub mod backend;

/// Epoch context derivation and caching
pub mod epoch;

/// Statistics collection and reporting functionality
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

// Core exports
pub use backend::{DeviceBackend, DeviceDescriptor, KernelBuilder, KernelVariant, MinerSettings};
pub use cli::Commands;
pub use config::Config;
pub use epoch::{EpochContext, EpochContextProvider, SyntheticEpochProvider};
pub use farm::{Farm, Solution, WorkExchange, WorkPackage};
pub use miner::{DeviceMiner, PauseReason, Worker, WorkerState};
pub use stats::{HardwareStats, MiningStats, StatsReporter};
pub use types::{BackendKind, PERIOD_LENGTH, PlatformKind};
pub use utils::{MinerError, init_logging};
