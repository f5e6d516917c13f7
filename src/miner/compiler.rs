// src/miner/compiler.rs
//! Asynchronous period-kernel compiler
//!
//! Builds the next period-specific kernel variant on a helper thread
//! while the current variant keeps searching, so a period boundary
//! never blocks the search loop. At most one build is outstanding at a
//! time (join-then-replace); the mining loop joins only at the instant
//! it actually needs the result. An outstanding build the loop no
//! longer needs is simply dropped: the helper thread detaches and
//! finishes on its own without blocking a stop.

use crate::backend::{KernelBuilder, KernelVariant};
use crate::utils::error::MinerError;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct PendingBuild {
    period_seed: u64,
    thread: JoinHandle<Result<KernelVariant, MinerError>>,
}

/// Compile-ahead driver for one device worker
///
/// Owned by the mining loop thread; only the builds themselves run
/// elsewhere.
pub struct KernelCompiler {
    builder: Arc<dyn KernelBuilder>,
    pending: Option<PendingBuild>,
}

impl KernelCompiler {
    /// Creates a compiler over the backend's kernel builder.
    pub fn new(builder: Arc<dyn KernelBuilder>) -> Self {
        KernelCompiler {
            builder,
            pending: None,
        }
    }

    /// Seed of the build currently in flight, if any.
    pub fn pending_seed(&self) -> Option<u64> {
        self.pending.as_ref().map(|p| p.period_seed)
    }

    /// Kicks off a build for `period_seed` on a helper thread.
    ///
    /// The previous build must have been joined first; a request while
    /// one is outstanding is a caller bug and is ignored with a warning
    /// rather than stacking a second thread.
    pub fn request(&mut self, period_seed: u64) -> Result<(), MinerError> {
        if let Some(pending) = &self.pending {
            log::warn!(
                "compile for period {} requested while period {} is still in flight",
                period_seed,
                pending.period_seed
            );
            return Ok(());
        }

        let builder = self.builder.clone();
        let thread = thread::Builder::new()
            .name(format!("compile-{}", period_seed))
            .spawn(move || builder.build(period_seed))?;
        self.pending = Some(PendingBuild {
            period_seed,
            thread,
        });
        Ok(())
    }

    /// Joins the outstanding build and returns its kernel.
    ///
    /// A build failure surfaces here; the caller keeps its previously
    /// active kernel and decides how to pause.
    pub fn join(&mut self) -> Result<KernelVariant, MinerError> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| MinerError::Build("no kernel build outstanding".into()))?;
        pending
            .thread
            .join()
            .map_err(|_| MinerError::Build("kernel build thread panicked".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct TestBuilder {
        builds: AtomicU64,
        fail: bool,
    }

    impl KernelBuilder for TestBuilder {
        fn build(&self, period_seed: u64) -> Result<KernelVariant, MinerError> {
            self.builds.fetch_add(1, Ordering::Relaxed);
            if self.fail {
                return Err(MinerError::Build("synthetic compile error".into()));
            }
            let program: Arc<dyn Any + Send + Sync> = Arc::new(period_seed);
            Ok(KernelVariant::new(period_seed, program))
        }
    }

    #[test]
    fn request_then_join_produces_the_requested_seed() {
        let builder = Arc::new(TestBuilder {
            builds: AtomicU64::new(0),
            fail: false,
        });
        let mut compiler = KernelCompiler::new(builder.clone());

        assert!(compiler.pending_seed().is_none());
        compiler.request(100).unwrap();
        assert_eq!(compiler.pending_seed(), Some(100));

        let kernel = compiler.join().unwrap();
        assert_eq!(kernel.period_seed(), 100);
        assert!(compiler.pending_seed().is_none());
        assert_eq!(builder.builds.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn duplicate_request_does_not_stack_builds() {
        let builder = Arc::new(TestBuilder {
            builds: AtomicU64::new(0),
            fail: false,
        });
        let mut compiler = KernelCompiler::new(builder.clone());

        compiler.request(5).unwrap();
        compiler.request(6).unwrap();
        assert_eq!(compiler.pending_seed(), Some(5));
        assert_eq!(compiler.join().unwrap().period_seed(), 5);
        assert_eq!(builder.builds.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn build_failure_surfaces_at_join() {
        let builder = Arc::new(TestBuilder {
            builds: AtomicU64::new(0),
            fail: true,
        });
        let mut compiler = KernelCompiler::new(builder);

        compiler.request(7).unwrap();
        assert!(matches!(compiler.join(), Err(MinerError::Build(_))));
        // The failed build is consumed; joining again is a caller bug.
        assert!(compiler.join().is_err());
    }
}
