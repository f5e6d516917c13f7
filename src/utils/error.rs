// src/utils/error.rs
use crate::farm::exchange;
use std::io;
use thiserror::Error;

/// Main error type for the mining application
///
/// Covers every error condition the orchestration layer can report.
/// Transient conditions (insufficient device memory, a failed epoch
/// rebuild) are deliberately *not* errors: they are surfaced as pause
/// causes on the affected worker instead, so only genuine device,
/// build, configuration and plumbing failures travel through this type.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Device/driver call failure during buffer or dispatch operations.
    /// Propagating one out of the mining loop makes the worker wrapper
    /// log it and park the thread in `Stopped` for a later restart.
    #[error("Device error: {0}")]
    Device(String),

    /// Kernel compilation failure for a period-specific program
    #[error("Kernel build error: {0}")]
    Build(String),

    /// Epoch context provider failure
    #[error("Epoch context error: {0}")]
    Epoch(String),

    /// Configuration file or parameter errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Thread communication channel errors
    #[error("Thread communication error: {0}")]
    Channel(String),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    Input(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Converts crossbeam channel send errors for Solutions into MinerError
///
/// Raised when the dispatcher side of the solution channel has gone
/// away while a worker still holds harvested results.
impl From<crossbeam_channel::SendError<exchange::Solution>> for MinerError {
    fn from(e: crossbeam_channel::SendError<exchange::Solution>) -> Self {
        MinerError::Channel(format!("Solution send failed: {}", e))
    }
}

/// Converts hex decoding errors into MinerError
///
/// Used when invalid hex data is encountered in configuration or CLI
/// supplied headers/boundaries.
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::Input(format!("Hex conversion failed: {}", e))
    }
}
