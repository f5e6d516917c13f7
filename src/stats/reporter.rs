// src/stats/reporter.rs
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use sysinfo::System;

/// One harvested batch's hash count, tagged with its device.
#[derive(Debug, Clone, Copy)]
pub struct HashSample {
    /// Index of the device that executed the batch
    pub device_index: usize,
    /// Number of hashes the batch covered
    pub hashes: u64,
}

/// Statistics related to mining performance
#[derive(Debug, Clone, Default)]
pub struct MiningStats {
    /// Total number of hashes computed across all devices
    pub hashes_total: u64,
    /// Number of solutions found across all devices
    pub solutions_found: u64,
    /// Average hashrate over 1 minute (hashes per second)
    pub avg_hashrate_1m: f64,
    /// Per-device hashrates since each device's last (re)start
    pub device_hashrates: Vec<f64>,
}

/// Statistics related to hardware utilization
#[derive(Debug, Clone)]
pub struct HardwareStats {
    /// Current CPU usage percentage (0-100)
    pub cpu_usage: f32,
    /// Memory currently in use on the host (in bytes)
    pub memory_used: u64,
}

/// Per-device atomic counters. `since_millis` is the device's counting
/// baseline relative to the reporter's start, bumped on restart.
struct DeviceCounters {
    hashes: AtomicU64,
    since_millis: AtomicU64,
}

/// Shared counter block behind the reporter's listener threads
struct CountersAtomic {
    devices: Vec<DeviceCounters>,
    solutions: AtomicU64,
    start_time: Instant,
}

/// Collects and reports mining and hardware statistics
///
/// Each device worker feeds [`HashSample`]s through a channel obtained
/// from [`hash_sender`](Self::hash_sender); a background listener
/// accumulates them into per-device atomic counters.
pub struct StatsReporter {
    counters: Arc<CountersAtomic>,
    report_interval: Duration,
}

impl StatsReporter {
    /// Creates a reporter tracking `device_count` devices, logging a
    /// summary every `report_interval` once
    /// [`start_reporting`](Self::start_reporting) is called.
    pub fn new(device_count: usize, report_interval: Duration) -> Self {
        let devices = (0..device_count)
            .map(|_| DeviceCounters {
                hashes: AtomicU64::new(0),
                since_millis: AtomicU64::new(0),
            })
            .collect();
        StatsReporter {
            counters: Arc::new(CountersAtomic {
                devices,
                solutions: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
            report_interval,
        }
    }

    /// Creates and returns a channel sender for hash samples
    ///
    /// The returned sender can be cloned freely across device workers.
    /// The reporter listens for samples on a background thread.
    pub fn hash_sender(&self) -> Sender<HashSample> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.start_hashrate_listener(rx);
        tx
    }

    /// Records one found solution.
    pub fn note_solution(&self) {
        self.counters.solutions.fetch_add(1, Ordering::Relaxed);
    }

    /// Resets a device's hash counter and rate baseline. Called when a
    /// stopped worker restarts so stale history does not skew its rate.
    pub fn reset_device(&self, device_index: usize) {
        if let Some(dev) = self.counters.devices.get(device_index) {
            dev.hashes.store(0, Ordering::Relaxed);
            dev.since_millis.store(
                self.counters.start_time.elapsed().as_millis() as u64,
                Ordering::Relaxed,
            );
        }
    }

    /// Gets a snapshot of the current mining statistics
    pub fn get_stats(&self) -> MiningStats {
        let now_millis = self.counters.start_time.elapsed().as_millis() as u64;
        let mut total = 0u64;
        let mut device_hashrates = Vec::with_capacity(self.counters.devices.len());
        for dev in &self.counters.devices {
            let hashes = dev.hashes.load(Ordering::Relaxed);
            let since = dev.since_millis.load(Ordering::Relaxed);
            let elapsed_secs = (now_millis.saturating_sub(since) as f64 / 1000.0).max(1.0);
            total += hashes;
            device_hashrates.push(hashes as f64 / elapsed_secs);
        }

        let total_seconds = (now_millis as f64 / 1000.0).max(1.0);
        MiningStats {
            hashes_total: total,
            solutions_found: self.counters.solutions.load(Ordering::Relaxed),
            avg_hashrate_1m: total as f64 / total_seconds.max(60.0) * 60.0,
            device_hashrates,
        }
    }

    /// Gets the current hardware statistics
    ///
    /// This refreshes system information before returning the stats.
    pub fn get_hardware_stats() -> HardwareStats {
        let mut system = System::new_all();
        system.refresh_cpu_all();
        system.refresh_memory();

        let cpus = system.cpus();
        let cpu_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        HardwareStats {
            cpu_usage,
            memory_used: system.used_memory(),
        }
    }

    /// Starts the periodic reporting of statistics
    ///
    /// This spawns a background thread that logs stats at the configured interval.
    pub fn start_reporting(&self) {
        let counters = self.counters.clone();
        let interval = self.report_interval;

        std::thread::spawn(move || {
            let reporter = StatsReporter {
                counters,
                report_interval: interval,
            };

            loop {
                std::thread::sleep(interval);
                let stats = reporter.get_stats();
                let hw = StatsReporter::get_hardware_stats();

                let per_device = stats
                    .device_hashrates
                    .iter()
                    .enumerate()
                    .map(|(i, rate)| format!("dev{}: {:.2} H/s", i, rate))
                    .collect::<Vec<_>>()
                    .join(" | ");
                log::info!(
                    "Hashrate: {:.2} H/s [{}] | Solutions: {} | CPU: {:.1}%",
                    stats.avg_hashrate_1m,
                    per_device,
                    stats.solutions_found,
                    hw.cpu_usage
                );
            }
        });
    }

    /// Starts a listener for hash samples on a background thread
    fn start_hashrate_listener(&self, receiver: Receiver<HashSample>) {
        let counters = self.counters.clone();

        std::thread::spawn(move || {
            for sample in receiver {
                if let Some(dev) = counters.devices.get(sample.device_index) {
                    dev.hashes.fetch_add(sample.hashes, Ordering::Relaxed);
                }
            }
        });
    }
}
