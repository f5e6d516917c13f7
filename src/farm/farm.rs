// src/farm/farm.rs
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::cpu::{self, CpuBackend};
use crate::config::Config;
use crate::epoch::SyntheticEpochProvider;
use crate::farm::exchange::{Solution, WorkExchange, WorkPackage};
use crate::miner::DeviceMiner;
use crate::stats::StatsReporter;
use crate::types::BackendKind;
use crate::utils::error::MinerError;

/// The device farm: one miner per enumerated device, all fed from a
/// single work exchange
///
/// The farm owns the shared collaborators (exchange, epoch provider,
/// stats reporter) and fans lifecycle operations out to every device
/// worker. Solutions surface on the receiver returned by
/// [`new`](Self::new); work flows in through [`set_work`](Self::set_work).
pub struct Farm {
    exchange: Arc<WorkExchange>,
    reporter: Arc<StatsReporter>,
    miners: Vec<DeviceMiner>,
}

impl Farm {
    /// Enumerates devices for the configured backend and wires up one
    /// miner per device. No worker threads run until
    /// [`start_all`](Self::start_all).
    pub fn new(config: &Config) -> Result<(Self, Receiver<Solution>), MinerError> {
        let descriptors = match config.backend {
            BackendKind::Cpu => cpu::enumerate_devices(config.devices),
        };
        if descriptors.is_empty() {
            return Err(MinerError::Device("no usable devices found".into()));
        }

        let (exchange, solutions) = WorkExchange::new();
        let provider = Arc::new(SyntheticEpochProvider::new(
            config.epoch.base_cache_kib * 1024,
            config.epoch.growth_kib * 1024,
        ));
        let reporter = Arc::new(StatsReporter::new(
            descriptors.len(),
            Duration::from_secs(config.report_interval_secs),
        ));
        let settings = config.miner_settings();

        let miners = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, descriptor)| {
                log::info!(
                    "farm: device {} = {} ({} CU, {:.1} GiB)",
                    index,
                    descriptor.name,
                    descriptor.compute_units,
                    descriptor.total_memory as f64 / (1024.0 * 1024.0 * 1024.0)
                );
                DeviceMiner::new(
                    index,
                    Box::new(CpuBackend::new()),
                    descriptor,
                    settings,
                    exchange.clone(),
                    provider.clone(),
                    reporter.clone(),
                    config.exit_on_error,
                )
            })
            .collect();

        Ok((
            Farm {
                exchange,
                reporter,
                miners,
            },
            solutions,
        ))
    }

    /// Spawns (or restarts) every device worker.
    pub fn start_all(&mut self) -> Result<(), MinerError> {
        for miner in &mut self.miners {
            miner.start()?;
        }
        Ok(())
    }

    /// Stops every device worker and waits for all of them to park.
    /// Stop requests fan out before any join so the workers shut down
    /// concurrently.
    pub fn stop_all(&self) {
        for miner in &self.miners {
            miner.trigger_stop();
        }
        for miner in &self.miners {
            miner.stop();
        }
        log::info!("farm: all {} device workers stopped", self.miners.len());
    }

    /// Publishes a new work package to every worker and kicks devices
    /// so in-flight batches for stale work abort early.
    pub fn set_work(&self, work: WorkPackage) {
        self.exchange.set_work(work);
        self.kick_all();
    }

    /// Aborts every device's in-flight batch and wakes parked loops.
    pub fn kick_all(&self) {
        for miner in &self.miners {
            miner.kick();
        }
    }

    /// Begins periodic hashrate logging.
    pub fn start_reporting(&self) {
        self.reporter.start_reporting();
    }

    /// The shared work exchange.
    pub fn exchange(&self) -> &Arc<WorkExchange> {
        &self.exchange
    }

    /// The shared statistics reporter.
    pub fn reporter(&self) -> &Arc<StatsReporter> {
        &self.reporter
    }

    /// The device miners, in enumeration order.
    pub fn miners(&self) -> &[DeviceMiner] {
        &self.miners
    }

    /// Number of devices in the farm.
    pub fn device_count(&self) -> usize {
        self.miners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::WorkerState;
    use std::time::Instant;

    fn tiny_config(devices: usize) -> Config {
        let mut config = Config::default();
        config.devices = devices;
        config.local_work_size = 8;
        config.global_work_multiplier = 2;
        config.epoch.base_cache_kib = 4;
        config.epoch.growth_kib = 1;
        config
    }

    fn easy_work(block: u64, epoch: u64) -> WorkPackage {
        let mut w = WorkPackage::default();
        w.header[0] = 0xab;
        w.header[1] = block as u8;
        w.block_number = block;
        w.epoch = epoch;
        w.boundary = [0xff; 32];
        w.start_nonce = 0;
        w
    }

    #[test]
    fn farm_builds_one_miner_per_device() {
        let (farm, _solutions) = Farm::new(&tiny_config(3)).unwrap();
        assert_eq!(farm.device_count(), 3);
        for (i, miner) in farm.miners().iter().enumerate() {
            assert_eq!(miner.index(), i);
            // No worker spawned yet.
            assert_eq!(miner.state(), None);
        }
    }

    #[test]
    fn set_work_is_visible_through_the_exchange() {
        let (farm, _solutions) = Farm::new(&tiny_config(1)).unwrap();
        assert!(farm.exchange().current_work().is_none());
        farm.set_work(easy_work(7, 0));
        let seen = farm.exchange().current_work().unwrap();
        assert_eq!(seen.block_number, 7);
    }

    #[test]
    fn farm_mines_solutions_and_stops_cleanly() {
        let (mut farm, solutions) = Farm::new(&tiny_config(1)).unwrap();
        farm.set_work(easy_work(1, 0));
        farm.start_all().unwrap();

        // With an all-ones boundary every nonce qualifies, so the first
        // harvested batch already carries solutions.
        let solution = solutions
            .recv_timeout(Duration::from_secs(30))
            .expect("no solution within deadline");
        assert_eq!(solution.device_index, 0);
        assert_eq!(solution.work.block_number, 1);

        let stop_started = Instant::now();
        farm.stop_all();
        assert!(stop_started.elapsed() < Duration::from_secs(10));
        for miner in farm.miners() {
            assert_eq!(miner.state(), Some(WorkerState::Stopped));
        }
    }
}
