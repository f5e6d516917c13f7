// src/miner/device.rs
//! Per-device mining loop and pause-cause bookkeeping
//!
//! [`DeviceMiner`] pairs one device backend with one [`Worker`] thread
//! running [`DeviceLoop`]. Each loop iteration harvests the previous
//! batch's results, adopts the newest work package, reacts to header /
//! period / epoch transitions (in that tie-break order, at most one
//! transition class handled per iteration) and dispatches the next
//! batch. Harvested candidates are attributed to the package dispatched
//! one iteration earlier: the device executes batches asynchronously
//! and completion is only confirmed lazily at the start of the next
//! iteration, which keeps the device occupied instead of blocking on
//! readback.

use crossbeam_channel::Sender;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crate::backend::{DeviceBackend, DeviceDescriptor, KernelVariant, KickHandle, MinerSettings};
use crate::epoch::EpochContextProvider;
use crate::farm::exchange::{Solution, WorkExchange, WorkPackage};
use crate::miner::compiler::KernelCompiler;
use crate::miner::worker::{LoopBody, Worker, WorkerHandle, WorkerState};
use crate::stats::HashSample;
use crate::utils::error::MinerError;

/// Bounded wait for fresh work before re-checking the exchange.
const WORK_WAIT: Duration = Duration::from_secs(3);
/// Back-off between epoch retries while paused, cut short by new work.
const PAUSE_RETRY_WAIT: Duration = Duration::from_millis(500);

/// Named conditions that suspend dispatch without killing the worker
///
/// Causes are asserted and cleared by the epoch/compile paths of the
/// loop; the set is queryable from any thread for telemetry.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PauseReason {
    /// The requested epoch's working set exceeds device memory
    InsufficientMemory = 0b01,
    /// Cache upload, DAG generation or kernel build failed
    EpochInitFailed = 0b10,
}

impl std::fmt::Display for PauseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PauseReason::InsufficientMemory => write!(f, "insufficient memory"),
            PauseReason::EpochInitFailed => write!(f, "epoch/kernel init failed"),
        }
    }
}

/// Atomic set of independent pause causes for one device worker
#[derive(Default)]
pub struct PauseSet {
    bits: AtomicU8,
}

impl PauseSet {
    /// Asserts a cause.
    pub fn pause(&self, reason: PauseReason) {
        self.bits.fetch_or(reason as u8, Ordering::AcqRel);
    }

    /// Clears a cause.
    pub fn resume(&self, reason: PauseReason) {
        self.bits.fetch_and(!(reason as u8), Ordering::AcqRel);
    }

    /// Whether any cause is asserted.
    pub fn is_paused(&self) -> bool {
        self.bits.load(Ordering::Acquire) != 0
    }

    /// Snapshot of the asserted causes.
    pub fn reasons(&self) -> Vec<PauseReason> {
        let bits = self.bits.load(Ordering::Acquire);
        [PauseReason::InsufficientMemory, PauseReason::EpochInitFailed]
            .into_iter()
            .filter(|r| bits & (*r as u8) != 0)
            .collect()
    }
}

/// Outcome of an epoch admission/regeneration attempt
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum EpochStatus {
    Ready,
    Paused,
}

/// What one loop iteration did, for logging and tests.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum LoopStep {
    /// No (non-null) work available; waited on the exchange signal
    NoWork,
    /// Joined and swapped in the kernel for the given period seed
    KernelSwap(u64),
    /// Kernel build for the given period seed failed; pause asserted
    BuildFailed(u64),
    /// Working set regenerated for the given epoch
    EpochReady(u64),
    /// Epoch attempt left the worker paused
    EpochPaused(u64),
    /// One search batch dispatched
    Dispatched,
}

/// The per-device loop body and its cross-iteration state
///
/// Session state (current package, active kernel, epoch) is rebuilt
/// from scratch on every [`run`](Self::run) entry, so a restarted
/// worker never trusts buffers or kernels left behind by a failed or
/// killed session.
pub(crate) struct DeviceLoop {
    index: usize,
    name: String,
    backend: Box<dyn DeviceBackend>,
    descriptor: DeviceDescriptor,
    settings: MinerSettings,
    exchange: Arc<WorkExchange>,
    provider: Arc<dyn EpochContextProvider>,
    pause: Arc<PauseSet>,
    hash_sender: Sender<HashSample>,

    compiler: Option<KernelCompiler>,
    current: Option<WorkPackage>,
    kernel: Option<KernelVariant>,
    active_seed: Option<u64>,
    active_epoch: Option<u64>,
    start_nonce: u64,
    pending_solutions: Vec<Solution>,
}

impl DeviceLoop {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        index: usize,
        name: String,
        backend: Box<dyn DeviceBackend>,
        descriptor: DeviceDescriptor,
        settings: MinerSettings,
        exchange: Arc<WorkExchange>,
        provider: Arc<dyn EpochContextProvider>,
        pause: Arc<PauseSet>,
        hash_sender: Sender<HashSample>,
    ) -> Self {
        DeviceLoop {
            index,
            name,
            backend,
            descriptor,
            settings,
            exchange,
            provider,
            pause,
            hash_sender,
            compiler: None,
            current: None,
            kernel: None,
            active_seed: None,
            active_epoch: None,
            start_nonce: 0,
            pending_solutions: Vec::new(),
        }
    }

    /// One full worker session: initialize the device, iterate until a
    /// stop is requested, settle outstanding device work.
    pub(crate) fn run(&mut self, handle: &WorkerHandle) -> Result<(), MinerError> {
        self.begin_session()?;
        while !handle.should_stop() {
            if let Err(e) = self.iterate() {
                // Never drop candidates already harvested.
                self.flush_solutions();
                return Err(e);
            }
        }
        self.flush_solutions();
        self.backend.sync()
    }

    /// Resets session state and (re-)initializes the device. A failure
    /// here is fatal for this worker: the loop is never entered.
    pub(crate) fn begin_session(&mut self) -> Result<(), MinerError> {
        self.current = None;
        self.kernel = None;
        self.active_seed = None;
        self.active_epoch = None;
        self.start_nonce = 0;
        self.pending_solutions.clear();

        self.backend.init_device(&self.descriptor, &self.settings)?;
        self.compiler = Some(KernelCompiler::new(self.backend.kernel_builder()));
        log::debug!("{}: device initialized", self.name);
        Ok(())
    }

    /// One mining-loop iteration.
    pub(crate) fn iterate(&mut self) -> Result<LoopStep, MinerError> {
        // Steps 1-2: harvest the previous dispatch and clear the result
        // region. Results belong to the package dispatched one
        // iteration ago.
        let harvested = self.backend.harvest()?;
        if let Some(prev) = &self.current {
            for result in &harvested.results {
                log::info!(
                    "{}: job {} sol 0x{:016x}",
                    self.name,
                    prev.abridged(),
                    prev.start_nonce + result.gid as u64
                );
                self.pending_solutions.push(Solution {
                    nonce: prev.start_nonce + result.gid as u64,
                    mix_hash: result.mix,
                    work: prev.clone(),
                    found_at: SystemTime::now(),
                    device_index: self.index,
                });
            }
        }

        // Step 3: fetch the newest package; bounded wait when none.
        let next = match self.exchange.current_work() {
            Some(w) if !w.is_null() => w,
            _ => {
                self.flush_solutions();
                self.exchange.wait_for_new_work(WORK_WAIT);
                return Ok(LoopStep::NoWork);
            }
        };

        // Step 4: transition handling, one class per iteration with
        // period-before-epoch as the tie-break.
        let header_changed = self.current.as_ref().map(|c| c.header) != Some(next.header);
        if header_changed {
            let period_seed = next.period_seed();

            if self.active_seed != Some(period_seed) {
                return self.swap_kernel(period_seed);
            }

            if self.active_epoch != Some(next.epoch) {
                let status = self.init_epoch(next.epoch);
                self.flush_solutions();
                return Ok(match status {
                    EpochStatus::Ready => {
                        self.active_epoch = Some(next.epoch);
                        LoopStep::EpochReady(next.epoch)
                    }
                    EpochStatus::Paused => {
                        // Retry on the next iteration; back off briefly
                        // unless fresh work arrives first.
                        self.exchange.wait_for_new_work(PAUSE_RETRY_WAIT);
                        LoopStep::EpochPaused(next.epoch)
                    }
                });
            }

            let target = next.target_u64();
            assert!(target != 0, "work package has zero boundary target");
            self.start_nonce = next.start_nonce;
            self.backend.program_work(&next.header, target)?;
        }

        // Step 5: dispatch one batch at the cursor.
        let kernel = match &self.kernel {
            Some(k) => k.clone(),
            None => {
                self.flush_solutions();
                return Ok(LoopStep::NoWork);
            }
        };
        self.backend.dispatch(&kernel, self.start_nonce)?;

        // Step 6: submit what was harvested in step 1, attributed to
        // the previous iteration's package.
        self.flush_solutions();

        // The kernel is now processing the newest package.
        let mut adopted = next;
        adopted.start_nonce = self.start_nonce;
        self.current = Some(adopted);
        self.start_nonce += self.settings.batch_size();

        // Step 7: report the hash count of the harvested batch.
        let _ = self.hash_sender.send(HashSample {
            device_index: self.index,
            hashes: harvested.hash_count as u64,
        });

        Ok(LoopStep::Dispatched)
    }

    /// Joins the (possibly pre-started) build for `period_seed`, swaps
    /// it in and kicks off the compile-ahead for the following period.
    /// Always returns without dispatching, so a just-activated kernel
    /// never races its predecessor's in-flight batch.
    fn swap_kernel(&mut self, period_seed: u64) -> Result<LoopStep, MinerError> {
        let compiler = self
            .compiler
            .as_mut()
            .ok_or_else(|| MinerError::Device("kernel compiler not initialized".into()))?;

        if compiler.pending_seed().is_none() {
            compiler.request(period_seed)?;
        }

        let mut joined = compiler.join();
        if let Ok(kernel) = &joined {
            if kernel.period_seed() != period_seed {
                // The compile-ahead guessed wrong (work skipped a
                // period). Rebuild for the seed actually needed.
                log::debug!(
                    "{}: discarding precompiled period {} kernel, need {}",
                    self.name,
                    kernel.period_seed(),
                    period_seed
                );
                compiler.request(period_seed)?;
                joined = compiler.join();
            }
        }

        self.flush_solutions();
        match joined {
            Ok(kernel) => {
                self.kernel = Some(kernel);
                self.active_seed = Some(period_seed);
                self.pause.resume(PauseReason::EpochInitFailed);
                log::info!("{}: loaded period {} kernel", self.name, period_seed);
                self.compiler
                    .as_mut()
                    .ok_or_else(|| MinerError::Device("kernel compiler not initialized".into()))?
                    .request(period_seed + 1)?;
                Ok(LoopStep::KernelSwap(period_seed))
            }
            Err(e) => {
                log::warn!(
                    "{}: kernel build for period {} failed: {}",
                    self.name,
                    period_seed,
                    e
                );
                self.pause.pause(PauseReason::EpochInitFailed);
                // Retried next iteration; back off unless new work
                // shows up first.
                self.exchange.wait_for_new_work(PAUSE_RETRY_WAIT);
                Ok(LoopStep::BuildFailed(period_seed))
            }
        }
    }

    /// Epoch admission and regeneration (the epoch & cache manager).
    ///
    /// Re-evaluates from a clean slate: both pause causes are cleared
    /// when an attempt begins. An insufficient-memory verdict returns
    /// `Paused` without touching the existing buffers, so a transient
    /// over-subscription never corrupts the previous epoch's still
    /// usable working set.
    fn init_epoch(&mut self, epoch: u64) -> EpochStatus {
        self.pause.resume(PauseReason::InsufficientMemory);
        self.pause.resume(PauseReason::EpochInitFailed);

        let ctx = match self.provider.context_for(epoch) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::warn!("{}: no context for epoch {}: {}", self.name, epoch, e);
                self.pause.pause(PauseReason::EpochInitFailed);
                return EpochStatus::Paused;
            }
        };

        let required = ctx.cache_bytes + ctx.dag_bytes;
        assert!(required > 0, "epoch context with zero-sized working set");
        if self.descriptor.total_memory < required {
            log::warn!(
                "{}: epoch {} requires {:.1} MiB, only {:.1} MiB on device",
                self.name,
                epoch,
                required as f64 / (1024.0 * 1024.0),
                self.descriptor.total_memory as f64 / (1024.0 * 1024.0)
            );
            self.pause.pause(PauseReason::InsufficientMemory);
            return EpochStatus::Paused;
        }

        log::info!(
            "{}: generating DAG + cache for epoch {} ({:.1} MiB)",
            self.name,
            epoch,
            required as f64 / (1024.0 * 1024.0)
        );
        let started = Instant::now();
        match self.backend.init_epoch(&ctx) {
            Ok(()) => {
                log::info!(
                    "{}: epoch {} working set generated in {} ms",
                    self.name,
                    epoch,
                    started.elapsed().as_millis()
                );
                EpochStatus::Ready
            }
            Err(e) => {
                log::warn!("{}: epoch {} generation failed: {}", self.name, epoch, e);
                self.pause.pause(PauseReason::EpochInitFailed);
                EpochStatus::Paused
            }
        }
    }

    fn flush_solutions(&mut self) {
        for solution in self.pending_solutions.drain(..) {
            if let Err(e) = self.exchange.submit_solution(solution) {
                log::error!("{}: {}", self.name, e);
            }
        }
    }
}

/// One compute device and its worker thread
///
/// Owns the lifecycle [`Worker`] plus the cross-thread handles
/// (pause-cause set, abort kick) that telemetry and the dispatcher may
/// touch while the loop runs.
pub struct DeviceMiner {
    index: usize,
    name: String,
    exit_on_error: bool,
    pause: Arc<PauseSet>,
    kick: KickHandle,
    exchange: Arc<WorkExchange>,
    reporter: Arc<crate::stats::StatsReporter>,
    parts: Option<DeviceLoop>,
    worker: Option<Worker>,
}

impl DeviceMiner {
    /// Wires a backend, descriptor and collaborators into a miner. The
    /// worker thread is not spawned until [`start`](Self::start).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        backend: Box<dyn DeviceBackend>,
        descriptor: DeviceDescriptor,
        settings: MinerSettings,
        exchange: Arc<WorkExchange>,
        provider: Arc<dyn EpochContextProvider>,
        reporter: Arc<crate::stats::StatsReporter>,
        exit_on_error: bool,
    ) -> Self {
        let name = descriptor.name.clone();
        let pause = Arc::new(PauseSet::default());
        let kick = backend.kick_handle();
        let parts = DeviceLoop::new(
            index,
            name.clone(),
            backend,
            descriptor,
            settings,
            exchange.clone(),
            provider,
            pause.clone(),
            reporter.hash_sender(),
        );
        DeviceMiner {
            index,
            name,
            exit_on_error,
            pause,
            kick,
            exchange,
            reporter,
            parts: Some(parts),
            worker: None,
        }
    }

    /// Spawns the worker thread on first call; restarts a stopped
    /// worker (with a fresh telemetry baseline) afterwards.
    pub fn start(&mut self) -> Result<(), MinerError> {
        if let Some(worker) = &self.worker {
            self.reporter.reset_device(self.index);
            worker.restart();
            return Ok(());
        }

        let mut dev_loop = self
            .parts
            .take()
            .ok_or_else(|| MinerError::Device(format!("{}: loop already consumed", self.name)))?;
        let body: LoopBody = Box::new(move |handle| dev_loop.run(handle));
        self.worker = Some(Worker::spawn(self.name.clone(), self.exit_on_error, body)?);
        Ok(())
    }

    /// Requests a stop and blocks until the loop has returned to idle.
    /// Kicks the device first so a parked or batch-bound loop reacts
    /// promptly; never deadlocks on an outstanding compile the loop no
    /// longer needs (that build is detached, not joined).
    pub fn stop(&self) {
        if let Some(worker) = &self.worker {
            worker.trigger_stop();
            self.kick();
            worker.stop();
        }
    }

    /// Asks the loop to return without waiting for it.
    pub fn trigger_stop(&self) {
        if let Some(worker) = &self.worker {
            worker.trigger_stop();
        }
        self.kick();
    }

    /// Aborts the in-flight batch and wakes a parked loop, forcing an
    /// early reaction to new work. Callable from any thread.
    pub fn kick(&self) {
        self.kick.kick();
        self.exchange.notify();
    }

    /// Whether any pause cause is asserted.
    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    /// Snapshot of the asserted pause causes.
    pub fn pause_reasons(&self) -> Vec<PauseReason> {
        self.pause.reasons()
    }

    /// Lifecycle state of the worker thread, if spawned.
    pub fn state(&self) -> Option<WorkerState> {
        self.worker.as_ref().map(|w| w.state())
    }

    /// Device index within the farm.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{KernelBuilder, SearchResult, SearchResults};
    use crate::epoch::EpochContext;
    use crate::stats::StatsReporter;
    use crate::types::PlatformKind;
    use crossbeam_channel::Receiver;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::{Condvar, Mutex};
    use std::thread;

    #[derive(Default)]
    struct MockLog {
        device_inits: u64,
        epoch_inits: Vec<u64>,
        fail_epochs: HashSet<u64>,
        programmed: Vec<([u8; 32], u64)>,
        dispatches: Vec<(u64, u64)>,
        harvests: VecDeque<SearchResults>,
        buffer_identity: u64,
    }

    #[derive(Default)]
    struct MockBuilder {
        builds: Mutex<Vec<u64>>,
        fail_seeds: Mutex<HashSet<u64>>,
        blocked: Mutex<HashSet<u64>>,
        unblock: Condvar,
    }

    impl MockBuilder {
        fn block(&self, seed: u64) {
            self.blocked.lock().unwrap().insert(seed);
        }

        fn release(&self, seed: u64) {
            self.blocked.lock().unwrap().remove(&seed);
            self.unblock.notify_all();
        }

        fn build_count(&self, seed: u64) -> usize {
            self.builds.lock().unwrap().iter().filter(|s| **s == seed).count()
        }
    }

    impl KernelBuilder for MockBuilder {
        fn build(&self, period_seed: u64) -> Result<KernelVariant, MinerError> {
            self.builds.lock().unwrap().push(period_seed);
            let mut blocked = self.blocked.lock().unwrap();
            while blocked.contains(&period_seed) {
                blocked = self.unblock.wait(blocked).unwrap();
            }
            drop(blocked);
            if self.fail_seeds.lock().unwrap().contains(&period_seed) {
                return Err(MinerError::Build("mock compile failure".into()));
            }
            Ok(KernelVariant::new(period_seed, Arc::new(())))
        }
    }

    struct MockBackend {
        log: Arc<Mutex<MockLog>>,
        builder: Arc<MockBuilder>,
        kick: KickHandle,
    }

    impl DeviceBackend for MockBackend {
        fn init_device(
            &mut self,
            _descriptor: &DeviceDescriptor,
            _settings: &MinerSettings,
        ) -> Result<(), MinerError> {
            self.log.lock().unwrap().device_inits += 1;
            Ok(())
        }

        fn init_epoch(&mut self, ctx: &EpochContext) -> Result<(), MinerError> {
            let mut log = self.log.lock().unwrap();
            if log.fail_epochs.contains(&ctx.epoch_number) {
                return Err(MinerError::Device("mock cache generation failure".into()));
            }
            log.epoch_inits.push(ctx.epoch_number);
            log.buffer_identity += 1;
            Ok(())
        }

        fn kernel_builder(&self) -> Arc<dyn KernelBuilder> {
            self.builder.clone()
        }

        fn program_work(&mut self, header: &[u8; 32], target: u64) -> Result<(), MinerError> {
            self.log.lock().unwrap().programmed.push((*header, target));
            Ok(())
        }

        fn dispatch(&mut self, kernel: &KernelVariant, start_nonce: u64) -> Result<(), MinerError> {
            self.log
                .lock()
                .unwrap()
                .dispatches
                .push((kernel.period_seed(), start_nonce));
            Ok(())
        }

        fn harvest(&mut self) -> Result<SearchResults, MinerError> {
            Ok(self.log.lock().unwrap().harvests.pop_front().unwrap_or_default())
        }

        fn kick_handle(&self) -> KickHandle {
            self.kick.clone()
        }

        fn sync(&mut self) -> Result<(), MinerError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockProvider {
        sizes: Mutex<HashMap<u64, (u64, u64)>>,
        fail: Mutex<HashSet<u64>>,
    }

    impl EpochContextProvider for MockProvider {
        fn context_for(&self, epoch: u64) -> Result<Arc<EpochContext>, MinerError> {
            if self.fail.lock().unwrap().contains(&epoch) {
                return Err(MinerError::Epoch("mock provider failure".into()));
            }
            let (cache_bytes, dag_bytes) = self
                .sizes
                .lock()
                .unwrap()
                .get(&epoch)
                .copied()
                .unwrap_or((64, 256));
            Ok(Arc::new(EpochContext {
                epoch_number: epoch,
                cache_bytes,
                cache_data: Arc::new(Vec::new()),
                dag_bytes,
                dag_items: (dag_bytes / 64).max(1),
            }))
        }
    }

    struct Harness {
        dl: DeviceLoop,
        log: Arc<Mutex<MockLog>>,
        builder: Arc<MockBuilder>,
        exchange: Arc<WorkExchange>,
        solutions: Receiver<Solution>,
        hashes: Receiver<HashSample>,
        provider: Arc<MockProvider>,
        pause: Arc<PauseSet>,
    }

    fn descriptor(total_memory: u64) -> DeviceDescriptor {
        DeviceDescriptor {
            name: "mock-0".into(),
            platform: PlatformKind::Unknown,
            total_memory,
            compute_units: 1,
            compute_capability: 0,
        }
    }

    fn harness_with_memory(total_memory: u64) -> Harness {
        let log = Arc::new(Mutex::new(MockLog::default()));
        let builder = Arc::new(MockBuilder::default());
        let backend = MockBackend {
            log: log.clone(),
            builder: builder.clone(),
            kick: KickHandle::new(),
        };
        let (exchange, solutions) = WorkExchange::new();
        let provider = Arc::new(MockProvider::default());
        let pause = Arc::new(PauseSet::default());
        let (hash_tx, hashes) = crossbeam_channel::unbounded();
        let dl = DeviceLoop::new(
            0,
            "mock-0".into(),
            Box::new(backend),
            descriptor(total_memory),
            MinerSettings::new(8, 4),
            exchange.clone(),
            provider.clone(),
            pause.clone(),
            hash_tx,
        );
        Harness {
            dl,
            log,
            builder,
            exchange,
            solutions,
            hashes,
            provider,
            pause,
        }
    }

    fn harness() -> Harness {
        harness_with_memory(u64::MAX)
    }

    fn work(block: u64, epoch: u64, tag: u8) -> WorkPackage {
        let mut w = WorkPackage::default();
        w.header[0] = tag;
        w.header[1] = block as u8;
        w.header[2] = (block >> 8) as u8;
        w.block_number = block;
        w.epoch = epoch;
        w.boundary = [0xff; 32];
        w.start_nonce = block * 1000;
        w
    }

    /// Iterates until one batch has been dispatched.
    fn drive_to_dispatch(h: &mut Harness) {
        for _ in 0..10 {
            if h.dl.iterate().unwrap() == LoopStep::Dispatched {
                return;
            }
        }
        panic!("loop never dispatched");
    }

    #[test]
    fn first_work_swaps_kernel_then_epoch_then_dispatches() {
        let mut h = harness();
        h.dl.begin_session().unwrap();
        h.exchange.set_work(work(50, 5, 1));

        assert_eq!(h.dl.iterate().unwrap(), LoopStep::KernelSwap(5));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::EpochReady(5));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::Dispatched);

        let log = h.log.lock().unwrap();
        assert_eq!(log.device_inits, 1);
        assert_eq!(log.epoch_inits, vec![5]);
        assert_eq!(log.dispatches, vec![(5, 50_000)]);
    }

    #[test]
    fn header_only_change_reprograms_without_epoch_rebuild() {
        let mut h = harness();
        h.dl.begin_session().unwrap();
        h.exchange.set_work(work(50, 5, 1));
        drive_to_dispatch(&mut h);

        // Same epoch, new header: only reprogram + cursor reset.
        h.exchange.set_work(work(51, 5, 2));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::Dispatched);

        let log = h.log.lock().unwrap();
        assert_eq!(log.epoch_inits, vec![5]);
        assert_eq!(log.programmed.len(), 2);
        assert_eq!(log.dispatches, vec![(5, 50_000), (5, 51_000)]);
    }

    #[test]
    fn epoch_change_rebuilds_working_set_exactly_once() {
        let mut h = harness();
        h.dl.begin_session().unwrap();
        h.exchange.set_work(work(50, 5, 1));
        drive_to_dispatch(&mut h);

        // Block 52 stays in period 5, so only the epoch changes.
        h.exchange.set_work(work(52, 6, 2));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::EpochReady(6));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::Dispatched);

        let log = h.log.lock().unwrap();
        assert_eq!(log.epoch_inits, vec![5, 6]);
        // No dispatch happened between the epoch rebuild and the next
        // batch against the new working set.
        assert_eq!(log.dispatches.len(), 2);
    }

    #[test]
    fn insufficient_memory_pauses_and_preserves_buffers() {
        let h = &mut harness_with_memory(4_000_000_000);
        h.provider
            .sizes
            .lock()
            .unwrap()
            .insert(6, (1_200_000_000, 3_200_000_000));

        h.dl.begin_session().unwrap();
        h.exchange.set_work(work(50, 5, 1));
        drive_to_dispatch(h);
        let identity_before = h.log.lock().unwrap().buffer_identity;

        h.exchange.set_work(work(52, 6, 2));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::EpochPaused(6));
        assert!(h.pause.reasons().contains(&PauseReason::InsufficientMemory));
        {
            let log = h.log.lock().unwrap();
            assert_eq!(log.buffer_identity, identity_before);
            assert_eq!(log.epoch_inits, vec![5]);
        }

        // Header-only updates for the still-resident epoch keep
        // dispatching normally.
        h.exchange.set_work(work(53, 5, 3));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::Dispatched);
        assert_eq!(h.log.lock().unwrap().dispatches.last(), Some(&(5, 53_000)));
    }

    #[test]
    fn period_boundary_joins_precompiled_kernel_without_dispatching() {
        let mut h = harness();
        h.dl.begin_session().unwrap();
        h.exchange.set_work(work(1000, 0, 1));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::KernelSwap(100));
        drive_to_dispatch(&mut h);

        let dispatches_before = h.log.lock().unwrap().dispatches.len();
        h.exchange.set_work(work(1010, 0, 2));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::KernelSwap(101));
        // The swap iteration never dispatches.
        assert_eq!(h.log.lock().unwrap().dispatches.len(), dispatches_before);
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::Dispatched);
        assert_eq!(h.log.lock().unwrap().dispatches.last(), Some(&(101, 1_010_000)));

        // Compile-ahead hit: the period 101 kernel was built exactly
        // once, by the helper thread kicked off at the previous swap.
        assert_eq!(h.builder.build_count(100), 1);
        assert_eq!(h.builder.build_count(101), 1);
    }

    #[test]
    fn stale_precompile_is_rebuilt_for_the_needed_period() {
        let mut h = harness();
        h.dl.begin_session().unwrap();
        h.exchange.set_work(work(1000, 0, 1));
        drive_to_dispatch(&mut h);

        // Work skipped ahead several periods; the precompiled 101
        // kernel is stale and must be discarded.
        h.exchange.set_work(work(1050, 0, 2));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::KernelSwap(105));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::Dispatched);
        assert_eq!(h.builder.build_count(105), 1);
        assert_eq!(h.log.lock().unwrap().dispatches.last(), Some(&(105, 1_050_000)));
    }

    #[test]
    fn harvested_results_attributed_to_previous_package() {
        let mut h = harness();
        h.dl.begin_session().unwrap();
        let unit_a = work(50, 5, 1);
        h.exchange.set_work(unit_a.clone());
        drive_to_dispatch(&mut h);

        // The batch dispatched against A reports three candidates,
        // harvested while the loop is already adopting B.
        h.log.lock().unwrap().harvests.push_back(SearchResults {
            results: vec![
                SearchResult { gid: 0, mix: [1u8; 32] },
                SearchResult { gid: 3, mix: [2u8; 32] },
                SearchResult { gid: 7, mix: [3u8; 32] },
            ],
            hash_count: 32,
        });
        h.exchange.set_work(work(51, 5, 2));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::Dispatched);

        let mut nonces = Vec::new();
        for _ in 0..3 {
            let sol = h.solutions.try_recv().expect("expected three solutions");
            assert_eq!(sol.device_index, 0);
            assert_eq!(sol.work.header, unit_a.header);
            assert_eq!(sol.work.start_nonce, 50_000);
            nonces.push(sol.nonce);
        }
        assert!(h.solutions.try_recv().is_err());
        assert_eq!(nonces, vec![50_000, 50_003, 50_007]);

        // The harvested batch's hash count was reported downstream.
        let sample = h.hashes.try_iter().find(|s| s.hashes > 0).expect("hash sample");
        assert_eq!(sample.device_index, 0);
        assert_eq!(sample.hashes, 32);
    }

    #[test]
    #[should_panic(expected = "zero boundary target")]
    fn zero_boundary_is_an_invariant_violation() {
        let mut h = harness();
        h.dl.begin_session().unwrap();
        let mut w = work(50, 5, 1);
        w.boundary = [0u8; 32];
        h.exchange.set_work(w);
        for _ in 0..5 {
            h.dl.iterate().unwrap();
        }
    }

    #[test]
    fn provider_failure_pauses_the_worker() {
        let mut h = harness();
        h.provider.fail.lock().unwrap().insert(6);
        h.dl.begin_session().unwrap();
        h.exchange.set_work(work(50, 5, 1));
        drive_to_dispatch(&mut h);

        h.exchange.set_work(work(52, 6, 2));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::EpochPaused(6));
        assert!(h.pause.reasons().contains(&PauseReason::EpochInitFailed));
    }

    #[test]
    fn backend_epoch_failure_pauses_then_recovers() {
        let mut h = harness();
        h.log.lock().unwrap().fail_epochs.insert(6);
        h.dl.begin_session().unwrap();
        h.exchange.set_work(work(50, 5, 1));
        drive_to_dispatch(&mut h);

        h.exchange.set_work(work(52, 6, 2));
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::EpochPaused(6));
        assert!(h.pause.is_paused());

        // The condition clears: the retry succeeds and clears the
        // pause causes at attempt start.
        h.log.lock().unwrap().fail_epochs.clear();
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::EpochReady(6));
        assert!(!h.pause.is_paused());
    }

    #[test]
    fn kernel_build_failure_pauses_and_later_swap_clears_it() {
        let mut h = harness();
        h.builder.fail_seeds.lock().unwrap().insert(5);
        h.dl.begin_session().unwrap();
        h.exchange.set_work(work(50, 5, 1));

        assert_eq!(h.dl.iterate().unwrap(), LoopStep::BuildFailed(5));
        assert!(h.pause.reasons().contains(&PauseReason::EpochInitFailed));
        assert!(h.log.lock().unwrap().dispatches.is_empty());

        h.builder.fail_seeds.lock().unwrap().clear();
        assert_eq!(h.dl.iterate().unwrap(), LoopStep::KernelSwap(5));
        assert!(!h.pause.is_paused());
    }

    #[test]
    fn restarted_session_resumes_against_latest_work() {
        let mut h = harness();
        h.dl.begin_session().unwrap();
        h.exchange.set_work(work(50, 5, 1));
        drive_to_dispatch(&mut h);

        // New work arrives, then the session restarts (as the worker
        // wrapper does after a loop-body failure).
        let latest = work(51, 5, 2);
        h.exchange.set_work(latest.clone());
        h.dl.begin_session().unwrap();
        drive_to_dispatch(&mut h);

        let log = h.log.lock().unwrap();
        assert_eq!(log.device_inits, 2);
        assert_eq!(log.programmed.last().map(|p| p.0), Some(latest.header));
        assert_eq!(log.dispatches.last(), Some(&(5, 51_000)));
    }

    #[test]
    fn stop_returns_while_compile_ahead_is_outstanding() {
        let log = Arc::new(Mutex::new(MockLog::default()));
        let builder = Arc::new(MockBuilder::default());
        builder.block(101);
        let backend = MockBackend {
            log: log.clone(),
            builder: builder.clone(),
            kick: KickHandle::new(),
        };
        let (exchange, _solutions) = WorkExchange::new();
        let reporter = Arc::new(StatsReporter::new(1, Duration::from_secs(60)));
        let mut miner = DeviceMiner::new(
            0,
            Box::new(backend),
            descriptor(u64::MAX),
            MinerSettings::new(8, 4),
            exchange.clone(),
            Arc::new(MockProvider::default()),
            reporter,
            false,
        );

        exchange.set_work(work(1000, 0, 1));
        miner.start().unwrap();

        // Wait until the period 100 kernel is active and batches flow;
        // the compile-ahead for 101 stays blocked the whole time.
        let deadline = Instant::now() + Duration::from_secs(5);
        while log.lock().unwrap().dispatches.is_empty() {
            assert!(Instant::now() < deadline, "loop never dispatched");
            thread::sleep(Duration::from_millis(2));
        }

        let stop_started = Instant::now();
        miner.stop();
        assert!(stop_started.elapsed() < Duration::from_secs(2));
        assert_eq!(miner.state(), Some(WorkerState::Stopped));

        // No swap or dispatch happens after the state reads Stopped.
        let dispatches_after_stop = log.lock().unwrap().dispatches.len();
        builder.release(101);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(log.lock().unwrap().dispatches.len(), dispatches_after_stop);
    }

    #[test]
    fn pause_set_tracks_independent_causes() {
        let pause = PauseSet::default();
        assert!(!pause.is_paused());
        pause.pause(PauseReason::InsufficientMemory);
        pause.pause(PauseReason::EpochInitFailed);
        assert_eq!(
            pause.reasons(),
            vec![PauseReason::InsufficientMemory, PauseReason::EpochInitFailed]
        );
        pause.resume(PauseReason::InsufficientMemory);
        assert_eq!(pause.reasons(), vec![PauseReason::EpochInitFailed]);
        pause.resume(PauseReason::EpochInitFailed);
        assert!(!pause.is_paused());
    }
}
