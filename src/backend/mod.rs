// src/backend/mod.rs
//! Device backend capability interface
//!
//! The mining loop is backend-agnostic: everything device-specific
//! (buffer management, DAG generation, kernel programs, batch search)
//! sits behind [`DeviceBackend`]. Kernel compilation is split out into
//! [`KernelBuilder`], a cheap shareable handle the asynchronous
//! compiler runs on its helper thread while the backend itself stays
//! owned by the loop thread.

/// Software reference backend running the search kernel on CPU threads
pub mod cpu;

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::epoch::EpochContext;
use crate::types::PlatformKind;
use crate::utils::error::MinerError;

// Result region capacity. Kernel-side layouts assume this bound, so it
// is not configurable.
/// Maximum candidate results one batch may report.
pub const MAX_SEARCH_RESULTS: usize = 15;

/// Static capability data for one compute device
///
/// Supplied by the enumeration collaborator; used only to parameterize
/// batch sizing, memory admission control and kernel build constants.
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Human-readable device name
    pub name: String,
    /// Platform family the device belongs to
    pub platform: PlatformKind,
    /// Total device memory in bytes, the admission bound for epoch
    /// working sets
    pub total_memory: u64,
    /// Number of parallel compute units
    pub compute_units: u32,
    /// Platform compute capability, baked into kernel builds
    pub compute_capability: u32,
}

/// Batch sizing knobs for one device worker
#[derive(Debug, Clone, Copy)]
pub struct MinerSettings {
    /// Work-group size; rounded up to a multiple of 8 on construction
    pub local_work_size: u32,
    /// Number of work-groups dispatched per batch
    pub global_work_multiplier: u32,
}

impl MinerSettings {
    /// Creates settings with the work-group size normalized to a
    /// multiple of 8.
    pub fn new(local_work_size: u32, global_work_multiplier: u32) -> Self {
        MinerSettings {
            local_work_size: local_work_size.max(1).div_ceil(8) * 8,
            global_work_multiplier: global_work_multiplier.max(1),
        }
    }

    /// Nonces covered by one dispatched batch.
    pub fn batch_size(&self) -> u64 {
        self.local_work_size as u64 * self.global_work_multiplier as u64
    }
}

impl Default for MinerSettings {
    fn default() -> Self {
        MinerSettings::new(64, 16)
    }
}

/// One candidate reported by the kernel
#[derive(Debug, Clone)]
pub struct SearchResult {
    /// Offset of the winning nonce within its batch
    pub gid: u32,
    /// Raw mix hash the kernel computed for that nonce
    pub mix: [u8; 32],
}

/// Everything harvested from the device result region for one batch
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// Candidates found, at most [`MAX_SEARCH_RESULTS`]
    pub results: Vec<SearchResult>,
    /// Nonces actually evaluated (may fall short of the batch size if
    /// the batch was aborted early)
    pub hash_count: u32,
}

/// A ready-to-dispatch, period-specific compiled kernel
///
/// The program payload is opaque to the orchestration layer; only the
/// backend family that built it knows the concrete type and downcasts
/// at dispatch time. Two variants are live at once per worker: the
/// current one in use by dispatch and the next one being built off the
/// critical path.
#[derive(Clone)]
pub struct KernelVariant {
    period_seed: u64,
    program: Arc<dyn Any + Send + Sync>,
}

impl KernelVariant {
    /// Wraps a backend-specific compiled program for `period_seed`.
    pub fn new(period_seed: u64, program: Arc<dyn Any + Send + Sync>) -> Self {
        KernelVariant {
            period_seed,
            program,
        }
    }

    /// Period this kernel was compiled for.
    pub fn period_seed(&self) -> u64 {
        self.period_seed
    }

    /// Downcasts the program payload to the backend's concrete type.
    pub fn program<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.program.downcast_ref()
    }
}

/// Cross-thread abort flag for an in-flight search batch
///
/// A batch is not preemptible by the scheduler; instead the running
/// kernel polls this flag and returns early when it is raised. Cloned
/// handles all observe the same flag.
#[derive(Clone, Default)]
pub struct KickHandle {
    flag: Arc<AtomicBool>,
}

impl KickHandle {
    /// Creates an unraised handle.
    pub fn new() -> Self {
        KickHandle::default()
    }

    /// Raises the abort flag. Callable from any thread.
    pub fn kick(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether the flag is currently raised.
    pub fn is_kicked(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Clears the flag, returning whether it was raised. Done when the
    /// result region is cleared for the next dispatch.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::Relaxed)
    }
}

/// Builds period-specific kernel programs off the loop thread
///
/// Device build parameters (work-group size, platform identity, compute
/// capability) are captured at handle creation and baked into every
/// build as compile-time constants.
pub trait KernelBuilder: Send + Sync {
    /// Compiles the kernel variant for `period_seed`.
    fn build(&self, period_seed: u64) -> Result<KernelVariant, MinerError>;
}

/// Capability interface one device worker drives
///
/// Exclusively owned by its mining loop; only
/// [`kick_handle`](Self::kick_handle) and
/// [`kernel_builder`](Self::kernel_builder) produce handles that other
/// threads may touch.
pub trait DeviceBackend: Send {
    /// One-time device/runtime initialization. Failing here is a fatal
    /// configuration error: the worker never enters its loop.
    fn init_device(
        &mut self,
        descriptor: &DeviceDescriptor,
        settings: &MinerSettings,
    ) -> Result<(), MinerError>;

    /// Rebuilds the device-resident working set for a new epoch: frees
    /// the old cache/DAG buffers, allocates new ones sized to `ctx`,
    /// uploads the cache and regenerates the DAG over its whole extent
    /// in fixed-size chunks. Memory admission is the caller's job.
    fn init_epoch(&mut self, ctx: &EpochContext) -> Result<(), MinerError>;

    /// Shareable builder for period-specific kernel programs. Valid
    /// after [`init_device`](Self::init_device).
    fn kernel_builder(&self) -> Arc<dyn KernelBuilder>;

    /// Programs the device with a new header and compare target and
    /// prepares for dispatches against them.
    fn program_work(&mut self, header: &[u8; 32], target: u64) -> Result<(), MinerError>;

    /// Runs one search batch of [`MinerSettings::batch_size`] nonces
    /// starting at `start_nonce` over the given kernel, accumulating
    /// candidates into the device result region.
    fn dispatch(&mut self, kernel: &KernelVariant, start_nonce: u64) -> Result<(), MinerError>;

    /// Reads and clears the device result region (results, hash count,
    /// abort flag), returning what the previous dispatch produced.
    fn harvest(&mut self) -> Result<SearchResults, MinerError>;

    /// Abort handle for in-flight batches, usable from any thread.
    fn kick_handle(&self) -> KickHandle;

    /// Waits for any outstanding device work to settle. Called once
    /// when the loop exits.
    fn sync(&mut self) -> Result<(), MinerError>;
}
