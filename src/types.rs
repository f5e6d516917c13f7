// src/types.rs
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of blocks sharing one kernel program period.
///
/// The period seed of a work package is `block_number / PERIOD_LENGTH`;
/// whenever it changes the search kernel must be recompiled for the new
/// period, while the epoch (and therefore the DAG) stays untouched.
pub const PERIOD_LENGTH: u64 = 10;

/// Supported device backend families
///
/// Selects which backend implementation drives a device worker. The
/// mining loop itself is backend-agnostic and only talks to the
/// [`crate::backend::DeviceBackend`] capability interface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Software reference backend executing the search kernel on CPU
    /// threads. Exercises the full orchestration stack (epoch
    /// regeneration, period recompiles, result harvesting) without any
    /// GPU runtime present.
    #[clap(name = "cpu")]
    Cpu,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => write!(f, "cpu"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpu" => Ok(BackendKind::Cpu),
            _ => Err(format!("Unknown backend: {}", s)),
        }
    }
}

/// Platform family a device belongs to
///
/// Carried in the device descriptor and baked into kernel builds as a
/// compile-time constant, the same way per-platform defines are injected
/// into GPU kernel source.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlatformKind {
    /// Host CPU (reference backend)
    Cpu,
    /// NVIDIA GPU platform
    Nvidia,
    /// AMD GPU platform
    Amd,
    /// Platform could not be classified
    Unknown,
}

impl PlatformKind {
    /// Numeric identifier injected into kernel builds.
    pub fn id(&self) -> u32 {
        match self {
            PlatformKind::Cpu => 0,
            PlatformKind::Nvidia => 1,
            PlatformKind::Amd => 2,
            PlatformKind::Unknown => 3,
        }
    }
}

impl fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformKind::Cpu => write!(f, "cpu"),
            PlatformKind::Nvidia => write!(f, "nvidia"),
            PlatformKind::Amd => write!(f, "amd"),
            PlatformKind::Unknown => write!(f, "unknown"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_round_trips_through_str() {
        assert_eq!("cpu".parse::<BackendKind>(), Ok(BackendKind::Cpu));
        assert_eq!(BackendKind::Cpu.to_string(), "cpu");
        assert!("vulkan".parse::<BackendKind>().is_err());
    }

    #[test]
    fn platform_ids_are_distinct() {
        let ids = [
            PlatformKind::Cpu.id(),
            PlatformKind::Nvidia.id(),
            PlatformKind::Amd.id(),
            PlatformKind::Unknown.id(),
        ];
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
