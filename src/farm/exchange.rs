// src/farm/exchange.rs
//! Work/solution exchange between the dispatcher and device workers
//!
//! The exchange is the only shared surface between the dispatcher
//! thread(s) and the per-device mining loops: a single-writer,
//! multi-reader work slot (atomically swappable, so readers never block
//! the writer) with a version-tagged new-work signal, plus a
//! fire-and-forget solution channel. Work is applied by recency only;
//! intermediate packages may be skipped, the most recent always wins.

use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, SystemTime};

use crate::types::PERIOD_LENGTH;
use crate::utils::error::MinerError;

/// One unit of work assigned by the dispatcher
///
/// An immutable snapshot; workers compare it field-by-field against the
/// previously processed package to detect the three independent
/// transition classes (header, period seed, epoch). A default-valued
/// package (all-zero header) is the "no work yet" sentinel and is never
/// dispatched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkPackage {
    /// Block header hash to search against
    pub header: [u8; 32],
    /// Height of the block being sealed
    pub block_number: u64,
    /// 256-bit big-endian boundary a result hash must not exceed
    pub boundary: [u8; 32],
    /// Epoch the block belongs to; a change forces DAG regeneration
    pub epoch: u64,
    /// First nonce of the range assigned to this package
    pub start_nonce: u64,
}

impl WorkPackage {
    /// Whether this is the "no work yet" sentinel.
    pub fn is_null(&self) -> bool {
        self.header == [0u8; 32]
    }

    /// Kernel program period this package falls into.
    pub fn period_seed(&self) -> u64 {
        self.block_number / PERIOD_LENGTH
    }

    /// Upper 64 bits of the boundary, the form the device compares
    /// candidate hashes against.
    pub fn target_u64(&self) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&self.boundary[..8]);
        u64::from_be_bytes(word)
    }

    /// Short hex prefix of the header for log lines.
    pub fn abridged(&self) -> String {
        hex::encode(&self.header[..4])
    }
}

/// A candidate solution found by a device
///
/// Attributed to the work package that was in effect when its batch was
/// dispatched, not the one current at harvest time. Handed to the
/// dispatcher for validation and not retained by the worker afterwards.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Nonce that produced the candidate hash
    pub nonce: u64,
    /// Mix hash reported by the kernel alongside the nonce
    pub mix_hash: [u8; 32],
    /// Work package the candidate was computed against
    pub work: WorkPackage,
    /// Wall-clock instant the candidate was harvested
    pub found_at: SystemTime,
    /// Index of the device worker that found it
    pub device_index: usize,
}

/// Cross-thread work distribution and result submission contract
///
/// Single writer (the dispatcher via [`set_work`](Self::set_work)),
/// many readers (device workers via
/// [`current_work`](Self::current_work)). Readers that find no fresh
/// work park on a bounded wait instead of busy-polling.
pub struct WorkExchange {
    slot: ArcSwap<Option<WorkPackage>>,
    version: Mutex<u64>,
    signal: Condvar,
    solutions: Sender<Solution>,
}

impl WorkExchange {
    /// Creates an exchange and the receiving end of its solution
    /// channel. The receiver belongs to the dispatcher.
    pub fn new() -> (Arc<Self>, Receiver<Solution>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let exchange = Arc::new(WorkExchange {
            slot: ArcSwap::from_pointee(None),
            version: Mutex::new(0),
            signal: Condvar::new(),
            solutions: tx,
        });
        (exchange, rx)
    }

    /// Publishes a new work package and wakes every parked worker.
    ///
    /// Dispatcher side only. Overwrites whatever was in the slot;
    /// workers that missed intermediate packages simply adopt the
    /// newest one.
    pub fn set_work(&self, work: WorkPackage) {
        self.slot.store(Arc::new(Some(work)));
        let mut version = self.version.lock().unwrap_or_else(|e| e.into_inner());
        *version += 1;
        self.signal.notify_all();
    }

    /// Non-blocking snapshot of the current work package, if any.
    pub fn current_work(&self) -> Option<WorkPackage> {
        self.slot.load().as_ref().clone()
    }

    /// Parks the caller until new work is published, an external kick
    /// arrives, or `timeout` elapses. Returns whether the work version
    /// changed while waiting.
    ///
    /// Callers re-read [`current_work`](Self::current_work) afterwards
    /// regardless of the return value, so a spurious wakeup only costs
    /// one extra loop iteration.
    pub fn wait_for_new_work(&self, timeout: Duration) -> bool {
        let guard = self.version.lock().unwrap_or_else(|e| e.into_inner());
        let seen = *guard;
        let (guard, _) = self
            .signal
            .wait_timeout(guard, timeout)
            .unwrap_or_else(|e| e.into_inner());
        *guard != seen
    }

    /// Wakes parked workers without publishing new work.
    ///
    /// Used by the kick path so a worker can react to a stop request or
    /// an abort faster than its bounded wait would allow.
    pub fn notify(&self) {
        self.signal.notify_all();
    }

    /// Submits a found solution to the dispatcher. Fire-and-forget; the
    /// dispatcher validates and deduplicates independently.
    pub fn submit_solution(&self, solution: Solution) -> Result<(), MinerError> {
        self.solutions.send(solution)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn most_recent_work_wins() {
        let (ex, _rx) = WorkExchange::new();
        assert!(ex.current_work().is_none());

        for block in 1..=5u64 {
            let mut w = WorkPackage::default();
            w.header[0] = block as u8;
            w.block_number = block;
            ex.set_work(w);
        }

        let seen = ex.current_work().unwrap();
        assert_eq!(seen.block_number, 5);
    }

    #[test]
    fn wait_times_out_without_work() {
        let (ex, _rx) = WorkExchange::new();
        let start = Instant::now();
        let changed = ex.wait_for_new_work(Duration::from_millis(50));
        assert!(!changed);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn set_work_wakes_waiters() {
        let (ex, _rx) = WorkExchange::new();
        let waiter = {
            let ex = ex.clone();
            thread::spawn(move || ex.wait_for_new_work(Duration::from_secs(5)))
        };
        // Give the waiter a moment to park.
        thread::sleep(Duration::from_millis(50));
        let mut w = WorkPackage::default();
        w.header[0] = 1;
        ex.set_work(w);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn null_sentinel_and_target_helpers() {
        let w = WorkPackage::default();
        assert!(w.is_null());
        assert_eq!(w.target_u64(), 0);

        let mut w = WorkPackage::default();
        w.header[0] = 0xab;
        w.block_number = 1013;
        w.boundary[0] = 0x3f;
        assert!(!w.is_null());
        assert_eq!(w.period_seed(), 101);
        assert_eq!(w.target_u64(), 0x3f00_0000_0000_0000);
        assert_eq!(w.abridged(), "ab000000");
    }

    #[test]
    fn solutions_reach_the_dispatcher() {
        let (ex, rx) = WorkExchange::new();
        let mut w = WorkPackage::default();
        w.header[0] = 7;
        ex.submit_solution(Solution {
            nonce: 42,
            mix_hash: [0u8; 32],
            work: w.clone(),
            found_at: SystemTime::now(),
            device_index: 3,
        })
        .unwrap();

        let sol = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(sol.nonce, 42);
        assert_eq!(sol.device_index, 3);
        assert_eq!(sol.work, w);
    }
}
