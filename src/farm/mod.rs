// src/farm/mod.rs
//! Farm-level orchestration
//!
//! This module ties the device workers together:
//! - The work exchange that publishes packages and collects solutions
//! - The farm facade that fans lifecycle operations out to every device

/// Work and solution exchange
///
/// Single most-recent-wins work slot shared by all workers, with a
/// signal for bounded waits and a channel carrying found solutions back
/// to the dispatcher.
pub mod exchange;

/// Device farm facade
///
/// Enumerates devices, builds one miner per device and broadcasts
/// start/stop/work/kick operations.
pub mod farm;

// Re-export main components for cleaner imports
pub use self::exchange::{Solution, WorkExchange, WorkPackage};
pub use self::farm::Farm;
