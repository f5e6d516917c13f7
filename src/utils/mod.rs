// src/utils/mod.rs
//! Utilities module for common functionality
//!
//! Shared utilities used throughout the mining application: error
//! handling and logging infrastructure.

/// Error types and handling utilities
///
/// Contains the [`MinerError`] enum which defines all possible error
/// conditions for the orchestration layer, along with conversion
/// implementations.
pub mod error;

/// Logging configuration and utilities
pub mod logging;

// Re-export for easier access
pub use error::MinerError;
pub use logging::init_logging;
