// src/main.rs
use clap::Parser;
use progpow_miner_rs::backend::cpu::{self, CpuBackend};
use progpow_miner_rs::utils::logging::init_bench_logging;
use progpow_miner_rs::*;
use sha3::{Digest, Keccak256};
use std::thread;
use std::time::{Duration, Instant};

/// Main entry point for the miner
///
/// # Returns
/// - `Ok(())` on successful execution
/// - `Err(MinerError)` if any operation fails
///
/// # Flow
/// 1. Parses command line arguments
/// 2. Delegates to appropriate subcommand handler
/// 3. Propagates any errors upward
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();

    match cli.action {
        cli::Action::Start(opts) => start_mining(opts),
        cli::Action::Benchmark(opts) => run_benchmark(opts),
        cli::Action::Config(opts) => generate_config(opts),
    }
}

/// Starts the device farm against the simulated chain
///
/// # Arguments
/// * `opts` - Command line options for mining operation
///
/// # Operations
/// 1. Initializes logging
/// 2. Loads configuration and applies CLI overrides
/// 3. Builds the farm and spawns the solution drain
/// 4. Starts all device workers and statistics reporting
/// 5. Feeds simulated blocks until the process is terminated
fn start_mining(opts: cli::StartOptions) -> Result<(), MinerError> {
    utils::init_logging();

    let mut config = if opts.config.exists() {
        config::load(&opts.config)?
    } else {
        log::warn!(
            "no config at {}, using built-in defaults",
            opts.config.display()
        );
        Config::default()
    };
    // Apply CLI overrides
    if let Some(devices) = opts.devices {
        config.devices = devices;
    }
    if let Some(backend) = opts.backend {
        config.backend = backend;
    }
    if opts.exit_on_error {
        config.exit_on_error = true;
    }
    config.validate()?;

    let (mut farm, solutions) = Farm::new(&config)?;
    farm.start_reporting();

    // Solution drain: count and log everything the workers find.
    let reporter = farm.reporter().clone();
    thread::spawn(move || {
        for solution in solutions {
            reporter.note_solution();
            log::info!(
                "solution: block {} nonce 0x{:016x} (device {})",
                solution.work.block_number,
                solution.nonce,
                solution.device_index
            );
        }
    });

    farm.start_all()?;
    log::info!("farm started with {} device(s)", farm.device_count());

    run_simulated_chain(&farm, &config.simulation)
}

/// Publishes one simulated block per block-time tick, forever.
fn run_simulated_chain(farm: &Farm, sim: &config::SimulationSettings) -> Result<(), MinerError> {
    let boundary = boundary_for_zero_bits(sim.difficulty_zero_bits);
    let mut block = sim.start_block;
    loop {
        let work = WorkPackage {
            header: block_header(block),
            block_number: block,
            boundary,
            epoch: block / sim.epoch_length,
            start_nonce: 0,
        };
        log::info!(
            "new block {} (epoch {}, period {})",
            block,
            work.epoch,
            work.period_seed()
        );
        farm.set_work(work);
        thread::sleep(Duration::from_millis(sim.block_time_ms));
        block += 1;
    }
}

/// Runs a fixed-duration search benchmark
///
/// # Arguments
/// * `opts` - Benchmark configuration options
///
/// # Operations
/// 1. Initializes benchmark-specific logging
/// 2. Prepares one backend per enumerated device
/// 3. Dispatches batches back-to-back until the deadline
/// 4. Collects and reports performance statistics
fn run_benchmark(opts: cli::BenchmarkOptions) -> Result<(), MinerError> {
    init_bench_logging();

    let descriptors = match opts.backend {
        BackendKind::Cpu => cpu::enumerate_devices(opts.devices),
    };
    if descriptors.is_empty() {
        return Err(MinerError::Device("no usable devices found".into()));
    }

    let provider = SyntheticEpochProvider::default();
    let ctx = provider.context_for(opts.epoch)?;
    let settings = MinerSettings::default();
    let reporter = StatsReporter::new(descriptors.len(), Duration::from_secs(5));
    let hash_sender = reporter.hash_sender();

    log::info!(
        "Starting {} benchmark for {} seconds (epoch {}, {} device(s))",
        opts.backend,
        opts.duration,
        opts.epoch,
        descriptors.len()
    );

    let deadline = Instant::now() + Duration::from_secs(opts.duration);
    let header = block_header(0);
    // Target tight enough that the result buffer stays near-empty.
    let target = 1u64 << 16;

    let handles = descriptors
        .into_iter()
        .enumerate()
        .map(|(index, descriptor)| {
            let ctx = ctx.clone();
            let sender = hash_sender.clone();
            thread::Builder::new()
                .name(format!("bench-{}", index))
                .spawn(move || -> Result<(), MinerError> {
                    let mut backend = CpuBackend::new();
                    backend.init_device(&descriptor, &settings)?;
                    backend.init_epoch(&ctx)?;
                    let kernel = backend.kernel_builder().build(0)?;
                    backend.program_work(&header, target)?;

                    let mut nonce = 0u64;
                    while Instant::now() < deadline {
                        backend.dispatch(&kernel, nonce)?;
                        let harvested = backend.harvest()?;
                        let _ = sender.send(stats::HashSample {
                            device_index: index,
                            hashes: harvested.hash_count as u64,
                        });
                        nonce += settings.batch_size();
                    }
                    backend.sync()
                })
                .map_err(MinerError::Io)
        })
        .collect::<Result<Vec<_>, _>>()?;

    for handle in handles {
        handle
            .join()
            .map_err(|_| MinerError::Channel("benchmark thread panicked".into()))??;
    }

    // Report final results
    let stats = reporter.get_stats();
    log::info!("Benchmark results:");
    log::info!("Total hashes: {}", stats.hashes_total);
    for (index, rate) in stats.device_hashrates.iter().enumerate() {
        log::info!("Device {}: {:.2} H/s", index, rate);
    }
    log::logger().flush(); // Ensure final results appear

    Ok(())
}

/// Generates configuration template file
///
/// # Arguments
/// * `opts` - Configuration generation options
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    let template = config::generate_template();
    std::fs::write(opts.output, template)?;
    Ok(())
}

/// Header of a simulated block: the Keccak-256 digest of its number.
fn block_header(block: u64) -> [u8; 32] {
    let digest = Keccak256::digest(block.to_le_bytes());
    let mut header = [0u8; 32];
    header.copy_from_slice(&digest);
    header
}

/// Boundary with the given number of leading zero bits.
fn boundary_for_zero_bits(bits: u32) -> [u8; 32] {
    let mut boundary = [0xffu8; 32];
    let full_bytes = (bits / 8) as usize;
    for byte in boundary.iter_mut().take(full_bytes) {
        *byte = 0;
    }
    if full_bytes < 32 {
        boundary[full_bytes] = 0xff >> (bits % 8);
    }
    boundary
}
