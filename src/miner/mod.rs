// src/miner/mod.rs
//! Core mining functionality
//!
//! This module contains all components related to driving one compute
//! device:
//! - Worker thread lifecycle management
//! - The per-device mining loop and pause-cause tracking
//! - Asynchronous period-kernel compilation

/// Worker thread lifecycle
///
/// Contains the generic lifecycle wrapper that runs a loop body on a
/// named thread and arbitrates start/stop/restart/kill transitions.
pub mod worker;

/// Per-device mining loop
///
/// Contains the loop that harvests results, tracks header / period /
/// epoch transitions and dispatches search batches, plus the miner
/// facade that owns it.
pub mod device;

/// Asynchronous kernel compilation
///
/// Builds period-specialized kernels on helper threads so the mining
/// loop keeps dispatching while the next period's kernel compiles.
pub mod compiler;

// Re-export main components for cleaner imports
pub use self::compiler::KernelCompiler;
pub use self::device::{DeviceMiner, PauseReason};
pub use self::worker::{Worker, WorkerState};
