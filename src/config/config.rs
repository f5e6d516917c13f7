// src/config/config.rs
use crate::backend::MinerSettings;
use crate::types::BackendKind;
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for the mining application
///
/// Contains all settings needed to configure the device farm: backend
/// selection, per-device batch geometry, epoch sizing and the simulated
/// chain used by the built-in work dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Device backend family to drive ("cpu")
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Number of devices to open (0 = auto-detect)
    #[serde(default)]
    pub devices: usize,

    /// Work-group size for search dispatches
    /// (rounded up to a multiple of 8)
    #[serde(default = "default_local_work_size")]
    pub local_work_size: u32,

    /// Work-groups per dispatched batch
    #[serde(default = "default_global_work_multiplier")]
    pub global_work_multiplier: u32,

    /// Terminate the whole process when a device worker fails
    /// (default: park the worker and keep the farm running)
    #[serde(default)]
    pub exit_on_error: bool,

    /// Seconds between hashrate summary log lines
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,

    /// Epoch working-set sizing
    #[serde(default)]
    pub epoch: EpochSettings,

    /// Simulated chain parameters for the built-in dispatcher
    #[serde(default)]
    pub simulation: SimulationSettings,
}

/// Sizing of the per-epoch cache and DAG
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochSettings {
    /// Cache size at epoch 0, in KiB
    #[serde(default = "default_base_cache_kib")]
    pub base_cache_kib: u64,

    /// Cache growth per epoch, in KiB
    #[serde(default = "default_growth_kib")]
    pub growth_kib: u64,
}

/// Parameters of the simulated chain feeding the farm with work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Milliseconds between simulated blocks
    #[serde(default = "default_block_time_ms")]
    pub block_time_ms: u64,

    /// Blocks per epoch
    #[serde(default = "default_epoch_length")]
    pub epoch_length: u64,

    /// Block number the simulation starts at
    #[serde(default = "default_start_block")]
    pub start_block: u64,

    /// Difficulty, expressed as leading zero bits of the boundary
    #[serde(default = "default_difficulty_zero_bits")]
    pub difficulty_zero_bits: u32,
}

fn default_backend() -> BackendKind {
    BackendKind::Cpu
}

fn default_local_work_size() -> u32 {
    64
}

fn default_global_work_multiplier() -> u32 {
    16
}

fn default_report_interval_secs() -> u64 {
    10
}

fn default_base_cache_kib() -> u64 {
    1024
}

fn default_growth_kib() -> u64 {
    64
}

fn default_block_time_ms() -> u64 {
    2000
}

fn default_epoch_length() -> u64 {
    30
}

fn default_start_block() -> u64 {
    0
}

fn default_difficulty_zero_bits() -> u32 {
    18
}

impl Default for EpochSettings {
    fn default() -> Self {
        EpochSettings {
            base_cache_kib: default_base_cache_kib(),
            growth_kib: default_growth_kib(),
        }
    }
}

impl Default for SimulationSettings {
    fn default() -> Self {
        SimulationSettings {
            block_time_ms: default_block_time_ms(),
            epoch_length: default_epoch_length(),
            start_block: default_start_block(),
            difficulty_zero_bits: default_difficulty_zero_bits(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: default_backend(),
            devices: 0,
            local_work_size: default_local_work_size(),
            global_work_multiplier: default_global_work_multiplier(),
            exit_on_error: false,
            report_interval_secs: default_report_interval_secs(),
            epoch: EpochSettings::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded configuration
    /// * `Err(MinerError)` - If file couldn't be read or parsed
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::Config(format!("Failed to read config at {}: {}", path.display(), e))
        })?;

        let config: Config = toml::from_str(&config_str)
            .map_err(|e| MinerError::Config(format!("Invalid config format: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency of the configuration.
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.local_work_size == 0 {
            return Err(MinerError::Config("local_work_size must be non-zero".into()));
        }
        if self.global_work_multiplier == 0 {
            return Err(MinerError::Config(
                "global_work_multiplier must be non-zero".into(),
            ));
        }
        if self.simulation.epoch_length == 0 {
            return Err(MinerError::Config("epoch_length must be non-zero".into()));
        }
        if self.simulation.difficulty_zero_bits >= 64 {
            return Err(MinerError::Config(
                "difficulty_zero_bits must be below 64".into(),
            ));
        }
        Ok(())
    }

    /// Batch geometry derived from the configured sizes.
    pub fn miner_settings(&self) -> MinerSettings {
        MinerSettings::new(self.local_work_size, self.global_work_multiplier)
    }

    /// Generates a configuration template string
    ///
    /// # Returns
    /// String containing a commented TOML configuration template
    pub fn generate_template() -> String {
        let mut template = String::new();
        template.push_str("# ProgPoW Miner Configuration\n\n");
        template.push_str("# Device backend family. Supported: cpu\n");
        template.push_str("backend = \"cpu\"\n");
        template.push_str("# Number of devices to open (0 = auto-detect)\n");
        template.push_str("devices = 0\n");
        template.push_str("# Work-group size (rounded up to a multiple of 8)\n");
        template.push_str("local_work_size = 64\n");
        template.push_str("# Work-groups per dispatched batch\n");
        template.push_str("global_work_multiplier = 16\n");
        template.push_str("# Terminate the process when a device worker fails\n");
        template.push_str("exit_on_error = false\n");
        template.push_str("# Seconds between hashrate summaries\n");
        template.push_str("report_interval_secs = 10\n\n");

        template.push_str("# Epoch working-set sizing\n");
        template.push_str("[epoch]\n");
        template.push_str("# Cache size at epoch 0, in KiB\n");
        template.push_str("base_cache_kib = 1024\n");
        template.push_str("# Cache growth per epoch, in KiB\n");
        template.push_str("growth_kib = 64\n\n");

        template.push_str("# Simulated chain feeding the farm with work\n");
        template.push_str("[simulation]\n");
        template.push_str("# Milliseconds between blocks\n");
        template.push_str("block_time_ms = 2000\n");
        template.push_str("# Blocks per epoch\n");
        template.push_str("epoch_length = 30\n");
        template.push_str("# First simulated block number\n");
        template.push_str("start_block = 0\n");
        template.push_str("# Difficulty as leading zero bits of the boundary\n");
        template.push_str("difficulty_zero_bits = 18\n");

        template
    }
}
