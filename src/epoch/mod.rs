// src/epoch/mod.rs
//! Epoch contexts and the provider collaborator supplying them
//!
//! An epoch fixes the large device-resident working set (the DAG) and
//! the light cache it is generated from. The provider is only consulted
//! on a confirmed epoch change, never on the hot path, so it is allowed
//! to be slow; contexts are cached and shared immutably via `Arc`.

use crate::utils::error::MinerError;
use sha3::{Digest, Keccak256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Size in bytes of one DAG item.
pub const DAG_ITEM_BYTES: usize = 64;

/// Immutable description of one epoch's working set
///
/// Owned by the provider; device workers hold a borrowed `Arc` clone
/// that stays valid until their next epoch transition.
#[derive(Debug, Clone)]
pub struct EpochContext {
    /// Epoch this context belongs to
    pub epoch_number: u64,
    /// Size of the light cache in bytes
    pub cache_bytes: u64,
    /// Light cache contents, uploaded to the device on epoch change
    pub cache_data: Arc<Vec<u8>>,
    /// Size of the full DAG in bytes
    pub dag_bytes: u64,
    /// Number of [`DAG_ITEM_BYTES`]-sized items in the DAG
    pub dag_items: u64,
}

/// Collaborator supplying epoch contexts keyed by epoch number
///
/// May be slow; the mining loop only calls it after it has confirmed an
/// epoch transition.
pub trait EpochContextProvider: Send + Sync {
    /// Returns the context for `epoch`, building it if necessary.
    fn context_for(&self, epoch: u64) -> Result<Arc<EpochContext>, MinerError>;
}

/// Deterministic epoch context provider
///
/// Derives the light cache from the epoch number alone with a keccak
/// chain, so every worker (and every test) regenerates identical data
/// for the same epoch. Cache size grows linearly with the epoch number
/// and the DAG is a fixed multiple of the cache, mirroring how real
/// per-epoch working sets grow over time.
pub struct SyntheticEpochProvider {
    base_cache_bytes: u64,
    growth_bytes: u64,
    built: Mutex<HashMap<u64, Arc<EpochContext>>>,
}

/// DAG size as a multiple of the light cache size.
const DAG_CACHE_RATIO: u64 = 4;

impl SyntheticEpochProvider {
    /// Creates a provider whose epoch-0 cache is `base_cache_bytes`
    /// large, growing by `growth_bytes` per epoch. Both are rounded up
    /// to whole DAG items.
    pub fn new(base_cache_bytes: u64, growth_bytes: u64) -> Self {
        SyntheticEpochProvider {
            base_cache_bytes: base_cache_bytes.max(DAG_ITEM_BYTES as u64),
            growth_bytes,
            built: Mutex::new(HashMap::new()),
        }
    }

    fn cache_bytes_for(&self, epoch: u64) -> u64 {
        let raw = self.base_cache_bytes + epoch * self.growth_bytes;
        let item = DAG_ITEM_BYTES as u64;
        raw.div_ceil(item) * item
    }

    fn build(&self, epoch: u64) -> EpochContext {
        let cache_bytes = self.cache_bytes_for(epoch);
        let dag_bytes = cache_bytes * DAG_CACHE_RATIO;

        // Keccak chain seeded by the epoch number, 32 bytes per link.
        let mut cache = Vec::with_capacity(cache_bytes as usize);
        let mut link: [u8; 32] = Keccak256::digest(epoch.to_le_bytes()).into();
        while cache.len() < cache_bytes as usize {
            cache.extend_from_slice(&link);
            link = Keccak256::digest(link).into();
        }
        cache.truncate(cache_bytes as usize);

        EpochContext {
            epoch_number: epoch,
            cache_bytes,
            cache_data: Arc::new(cache),
            dag_bytes,
            dag_items: dag_bytes / DAG_ITEM_BYTES as u64,
        }
    }
}

impl Default for SyntheticEpochProvider {
    /// 1 MiB base cache growing by 64 KiB per epoch.
    fn default() -> Self {
        SyntheticEpochProvider::new(1024 * 1024, 64 * 1024)
    }
}

impl EpochContextProvider for SyntheticEpochProvider {
    fn context_for(&self, epoch: u64) -> Result<Arc<EpochContext>, MinerError> {
        let mut built = self.built.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(ctx) = built.get(&epoch) {
            return Ok(ctx.clone());
        }
        let ctx = Arc::new(self.build(epoch));
        built.insert(epoch, ctx.clone());
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contexts_are_deterministic_and_cached() {
        let a = SyntheticEpochProvider::new(4096, 1024);
        let b = SyntheticEpochProvider::new(4096, 1024);

        let ctx_a = a.context_for(7).unwrap();
        let ctx_b = b.context_for(7).unwrap();
        assert_eq!(ctx_a.cache_data, ctx_b.cache_data);

        // Second call returns the cached Arc.
        let again = a.context_for(7).unwrap();
        assert!(Arc::ptr_eq(&ctx_a, &again));
    }

    #[test]
    fn sizes_grow_with_epoch_and_stay_item_aligned() {
        let p = SyntheticEpochProvider::new(4000, 1000);
        let c0 = p.context_for(0).unwrap();
        let c5 = p.context_for(5).unwrap();

        assert!(c5.cache_bytes > c0.cache_bytes);
        assert_eq!(c0.cache_bytes % DAG_ITEM_BYTES as u64, 0);
        assert_eq!(c5.dag_bytes, c5.cache_bytes * DAG_CACHE_RATIO);
        assert_eq!(c5.dag_items * DAG_ITEM_BYTES as u64, c5.dag_bytes);
        assert_eq!(c0.cache_data.len() as u64, c0.cache_bytes);
    }
}
