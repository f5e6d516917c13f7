// src/backend/cpu.rs
//! CPU reference backend
//!
//! Executes the search kernel on host threads via rayon. The kernel
//! itself is a stand-in (keccak over header, nonce, per-period program
//! salt and one DAG item) but the backend honors the full device
//! contract: buffers live only inside the backend, the DAG is
//! regenerated chunk-by-chunk from the uploaded cache on every epoch
//! change, batches accumulate candidates into a bounded result region
//! and an abort flag can cut a running batch short from another thread.

use rayon::prelude::*;
use sha3::{Digest, Keccak256, Keccak512};
use std::sync::Arc;

use crate::backend::{
    DeviceBackend, DeviceDescriptor, KernelBuilder, KernelVariant, KickHandle, MAX_SEARCH_RESULTS,
    MinerSettings, SearchResult, SearchResults,
};
use crate::epoch::{DAG_ITEM_BYTES, EpochContext};
use crate::types::PlatformKind;
use crate::utils::error::MinerError;

// Bounds the duration of one DAG generation pass; carries no semantic
// meaning.
const DAG_CHUNK_ITEMS: usize = 16384;

/// Compiled kernel program for the CPU backend
///
/// The per-period "program" is a salt derived from the period seed and
/// the device build constants, standing in for the specialized kernel
/// source a GPU backend would emit per period.
pub struct CpuProgram {
    salt: [u8; 32],
}

impl CpuProgram {
    /// Evaluates one nonce, returning the 64-bit compare value and the
    /// mix hash.
    fn search_one(&self, header: &[u8; 32], nonce: u64, dag: &[u8], dag_items: u64) -> (u64, [u8; 32]) {
        let mut hasher = Keccak256::new();
        hasher.update(header);
        hasher.update(nonce.to_le_bytes());
        hasher.update(self.salt);
        let seed: [u8; 32] = hasher.finalize().into();

        let mut word = [0u8; 8];
        word.copy_from_slice(&seed[..8]);
        let idx = (u64::from_le_bytes(word) % dag_items) as usize;
        let item = &dag[idx * DAG_ITEM_BYTES..(idx + 1) * DAG_ITEM_BYTES];

        let mut hasher = Keccak256::new();
        hasher.update(seed);
        hasher.update(item);
        let mix: [u8; 32] = hasher.finalize().into();

        let mut hasher = Keccak256::new();
        hasher.update(self.salt);
        hasher.update(mix);
        let value: [u8; 32] = hasher.finalize().into();

        let mut head = [0u8; 8];
        head.copy_from_slice(&value[..8]);
        (u64::from_be_bytes(head), mix)
    }
}

/// Kernel builder for the CPU backend
///
/// Captures the device build constants once; every build derives the
/// period program from those constants plus the seed, so two devices
/// with different work-group sizes or platforms get distinct programs
/// for the same period.
pub struct CpuKernelBuilder {
    platform_id: u32,
    compute_capability: u32,
    local_work_size: u32,
}

impl KernelBuilder for CpuKernelBuilder {
    fn build(&self, period_seed: u64) -> Result<KernelVariant, MinerError> {
        let mut hasher = Keccak256::new();
        hasher.update(period_seed.to_le_bytes());
        hasher.update(self.platform_id.to_le_bytes());
        hasher.update(self.compute_capability.to_le_bytes());
        hasher.update(self.local_work_size.to_le_bytes());
        let mut salt: [u8; 32] = hasher.finalize().into();

        // A short derivation chain stands in for the compile itself.
        for _ in 0..64 {
            salt = Keccak256::digest(salt).into();
        }

        Ok(KernelVariant::new(
            period_seed,
            Arc::new(CpuProgram { salt }),
        ))
    }
}

/// Software device backend running search batches on CPU threads
#[derive(Default)]
pub struct CpuBackend {
    descriptor: Option<DeviceDescriptor>,
    settings: MinerSettings,
    header: [u8; 32],
    target: u64,
    cache: Option<Arc<Vec<u8>>>,
    dag: Option<Arc<Vec<u8>>>,
    dag_items: u64,
    pending: SearchResults,
    kick: KickHandle,
}

impl CpuBackend {
    /// Creates an uninitialized backend; [`DeviceBackend::init_device`]
    /// must run before anything else.
    pub fn new() -> Self {
        CpuBackend::default()
    }
}

impl DeviceBackend for CpuBackend {
    fn init_device(
        &mut self,
        descriptor: &DeviceDescriptor,
        settings: &MinerSettings,
    ) -> Result<(), MinerError> {
        if descriptor.compute_units == 0 {
            return Err(MinerError::Device(format!(
                "{}: no usable compute units",
                descriptor.name
            )));
        }
        self.descriptor = Some(descriptor.clone());
        self.settings = *settings;
        self.pending = SearchResults::default();
        self.kick.take();
        Ok(())
    }

    fn init_epoch(&mut self, ctx: &EpochContext) -> Result<(), MinerError> {
        assert!(ctx.dag_items > 0, "epoch context with empty working set");

        // Release the old buffers before allocating the new ones.
        self.dag = None;
        self.cache = None;
        self.dag_items = 0;

        let cache = ctx.cache_data.clone();
        if cache.len() as u64 != ctx.cache_bytes {
            return Err(MinerError::Epoch(format!(
                "cache data is {} bytes, context declares {}",
                cache.len(),
                ctx.cache_bytes
            )));
        }

        let mut dag = vec![0u8; ctx.dag_bytes as usize];
        let cache_items = cache.len() / DAG_ITEM_BYTES;

        // Whole-extent generation pass in fixed-size chunks; every
        // chunk must complete before the DAG is considered valid.
        for (chunk_index, chunk) in dag
            .chunks_mut(DAG_CHUNK_ITEMS * DAG_ITEM_BYTES)
            .enumerate()
        {
            let first_item = chunk_index * DAG_CHUNK_ITEMS;
            chunk
                .par_chunks_mut(DAG_ITEM_BYTES)
                .enumerate()
                .for_each(|(offset, item)| {
                    let index = (first_item + offset) as u64;
                    let src = ((first_item + offset) * 31) % cache_items;
                    let mut hasher = Keccak512::new();
                    hasher.update(index.to_le_bytes());
                    hasher.update(&cache[src * DAG_ITEM_BYTES..(src + 1) * DAG_ITEM_BYTES]);
                    item.copy_from_slice(&hasher.finalize());
                });
        }

        self.cache = Some(cache);
        self.dag = Some(Arc::new(dag));
        self.dag_items = ctx.dag_items;
        Ok(())
    }

    fn kernel_builder(&self) -> Arc<dyn KernelBuilder> {
        let (platform_id, compute_capability) = match &self.descriptor {
            Some(d) => (d.platform.id(), d.compute_capability),
            None => (PlatformKind::Unknown.id(), 0),
        };
        Arc::new(CpuKernelBuilder {
            platform_id,
            compute_capability,
            local_work_size: self.settings.local_work_size,
        })
    }

    fn program_work(&mut self, header: &[u8; 32], target: u64) -> Result<(), MinerError> {
        self.header = *header;
        self.target = target;
        Ok(())
    }

    fn dispatch(&mut self, kernel: &KernelVariant, start_nonce: u64) -> Result<(), MinerError> {
        let program = kernel
            .program::<CpuProgram>()
            .ok_or_else(|| MinerError::Build("kernel was built by a different backend".into()))?;
        let dag = self
            .dag
            .clone()
            .ok_or_else(|| MinerError::Device("dispatch before epoch initialization".into()))?;

        let group = self.settings.local_work_size as u64;
        let groups = self.settings.global_work_multiplier as u64;
        let header = self.header;
        let target = self.target;
        let dag_items = self.dag_items;
        let kick = self.kick.clone();

        let per_group: Vec<(Vec<SearchResult>, u32)> = (0..groups)
            .into_par_iter()
            .map(|g| {
                let mut found = Vec::new();
                let mut evaluated = 0u32;
                let base = start_nonce + g * group;
                for lane in 0..group {
                    if kick.is_kicked() {
                        break;
                    }
                    let nonce = base + lane;
                    let (value, mix) = program.search_one(&header, nonce, &dag, dag_items);
                    evaluated += 1;
                    if value <= target {
                        found.push(SearchResult {
                            gid: (nonce - start_nonce) as u32,
                            mix,
                        });
                    }
                }
                (found, evaluated)
            })
            .collect();

        for (found, evaluated) in per_group {
            self.pending.hash_count += evaluated;
            for result in found {
                if self.pending.results.len() < MAX_SEARCH_RESULTS {
                    self.pending.results.push(result);
                }
            }
        }
        Ok(())
    }

    fn harvest(&mut self) -> Result<SearchResults, MinerError> {
        self.kick.take();
        Ok(std::mem::take(&mut self.pending))
    }

    fn kick_handle(&self) -> KickHandle {
        self.kick.clone()
    }

    fn sync(&mut self) -> Result<(), MinerError> {
        Ok(())
    }
}

/// Enumerates `count` CPU devices (0 = one per available core group)
///
/// Capability data comes from the host: total system memory bounds the
/// epoch admission check and the core count parameterizes batch sizing.
pub fn enumerate_devices(count: usize) -> Vec<DeviceDescriptor> {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let total_memory = system.total_memory();
    let cores = num_cpus::get() as u32;

    let count = if count == 0 {
        // One worker per four cores keeps the reference backend from
        // oversubscribing the host.
        (cores as usize / 4).max(1)
    } else {
        count
    };

    (0..count)
        .map(|i| DeviceDescriptor {
            name: format!("cpu-{}", i),
            platform: PlatformKind::Cpu,
            total_memory,
            compute_units: cores,
            compute_capability: 0,
        })
        .collect()
}
