//! Statistics collection and reporting module
//!
//! This module provides functionality for tracking and reporting mining
//! statistics, including:
//! - Per-device and aggregate hashrate calculations
//! - Solution counting
//! - Host hardware monitoring (CPU, memory)
//!
//! The main component is [`StatsReporter`] which collects data and can
//! periodically report statistics to logs.

/// Submodule containing the statistics reporter implementation
///
/// The reporter handles:
/// - Atomic per-device counters fed by a sample channel
/// - Rate baselines that reset when a device worker restarts
/// - Periodic reporting of stats
pub mod reporter;

// Re-export main components
pub use reporter::{HardwareStats, HashSample, MiningStats, StatsReporter};
