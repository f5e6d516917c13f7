// src/miner/worker.rs
//! Worker thread lifecycle state machine
//!
//! Generic start/stop/kill protocol for a single background thread
//! running a retryable loop body. All transitions happen through
//! compare-and-swap on an atomic state value so a concurrent
//! `restart()`/`stop()` from any thread cannot race the worker thread,
//! which polls its own state to decide between re-entering the body and
//! idle-sleeping.
//!
//! Legal transitions: `Starting -> Started` (body entered),
//! `Started -> Stopping` (requested), `Stopping -> Stopped` (body
//! returned), `Stopped -> Starting` (restart), `* -> Killing` (drop,
//! terminal).

use crate::utils::error::MinerError;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Lifecycle states of a worker thread
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    /// Thread is about to enter (or re-enter) the loop body
    Starting = 0,
    /// Loop body is running
    Started = 1,
    /// A caller asked the loop body to return
    Stopping = 2,
    /// Loop body has returned; thread idles awaiting restart or kill
    Stopped = 3,
    /// Terminal; the thread unwinds its outer loop and joins
    Killing = 4,
}

impl WorkerState {
    fn from_u8(value: u8) -> WorkerState {
        match value {
            0 => WorkerState::Starting,
            1 => WorkerState::Started,
            2 => WorkerState::Stopping,
            3 => WorkerState::Stopped,
            _ => WorkerState::Killing,
        }
    }
}

struct WorkerShared {
    state: AtomicU8,
}

impl WorkerShared {
    fn load(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn store(&self, state: WorkerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn swap(&self, state: WorkerState) -> WorkerState {
        WorkerState::from_u8(self.state.swap(state as u8, Ordering::AcqRel))
    }

    fn cas(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cloneable view of a worker's state, handed to the loop body
///
/// The body must poll [`should_stop`](Self::should_stop) at cooperative
/// checkpoints; it never receives forced preemption.
#[derive(Clone)]
pub struct WorkerHandle {
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    /// True whenever the state is anything but `Started`.
    pub fn should_stop(&self) -> bool {
        self.shared.load() != WorkerState::Started
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.shared.load()
    }
}

/// Loop body run by a worker thread; one call is one session.
pub type LoopBody = Box<dyn FnMut(&WorkerHandle) -> Result<(), MinerError> + Send>;

/// A single background thread running a retryable loop body
///
/// The body cannot assume any in-session state (compiled kernels, epoch
/// buffers) survives between sessions: every restart re-enters it from
/// scratch.
pub struct Worker {
    name: String,
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

const IDLE_POLL: Duration = Duration::from_millis(20);
const STATE_POLL: Duration = Duration::from_micros(200);

impl Worker {
    /// Spawns the worker thread and blocks until the first session has
    /// been entered (or has already finished).
    ///
    /// If the body returns an error the wrapper logs it and, when
    /// `exit_on_error` is set, terminates the whole process; otherwise
    /// the thread parks in `Stopped` until restarted or dropped.
    pub fn spawn(
        name: impl Into<String>,
        exit_on_error: bool,
        mut body: LoopBody,
    ) -> Result<Self, MinerError> {
        let name = name.into();
        let shared = Arc::new(WorkerShared {
            state: AtomicU8::new(WorkerState::Starting as u8),
        });

        let thread_shared = shared.clone();
        let thread_name = name.clone();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let handle = WorkerHandle {
                    shared: thread_shared.clone(),
                };
                while thread_shared.load() != WorkerState::Killing {
                    thread_shared.cas(WorkerState::Starting, WorkerState::Started);

                    if let Err(e) = body(&handle) {
                        log::error!("{}: worker loop failed: {}", thread_name, e);
                        if exit_on_error {
                            log::error!("{}: terminating due to exit-on-error", thread_name);
                            std::process::exit(1);
                        }
                    }

                    // Park in Stopped, but preserve a concurrent kill or
                    // restart request that raced the body's return.
                    let previous = thread_shared.swap(WorkerState::Stopped);
                    if previous == WorkerState::Killing || previous == WorkerState::Starting {
                        thread_shared.store(previous);
                    }

                    while thread_shared.load() == WorkerState::Stopped {
                        thread::sleep(IDLE_POLL);
                    }
                }
            })?;

        let worker = Worker {
            name,
            shared,
            thread: Mutex::new(Some(handle)),
        };
        while worker.shared.load() == WorkerState::Starting {
            thread::sleep(STATE_POLL);
        }
        Ok(worker)
    }

    /// Asks a stopped worker to run another session. No-op in any other
    /// state.
    pub fn restart(&self) {
        if self.shared.cas(WorkerState::Stopped, WorkerState::Starting) {
            while self.shared.load() == WorkerState::Starting {
                thread::sleep(STATE_POLL);
            }
        }
    }

    /// Asks the loop body to return without waiting for it.
    pub fn trigger_stop(&self) {
        self.shared.cas(WorkerState::Started, WorkerState::Stopping);
    }

    /// Requests a stop and blocks until the loop body has returned to
    /// idle.
    pub fn stop(&self) {
        loop {
            match self.shared.load() {
                WorkerState::Stopped | WorkerState::Killing => break,
                WorkerState::Started => {
                    self.shared.cas(WorkerState::Started, WorkerState::Stopping);
                }
                _ => {}
            }
            thread::sleep(STATE_POLL);
        }
    }

    /// True whenever the state is anything but `Started`.
    pub fn should_stop(&self) -> bool {
        self.shared.load() != WorkerState::Started
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.shared.load()
    }

    /// Cloneable handle onto this worker's state.
    pub fn handle(&self) -> WorkerHandle {
        WorkerHandle {
            shared: self.shared.clone(),
        }
    }

    /// Worker name, also the OS thread name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shared.swap(WorkerState::Killing);
        let mut thread = self.thread.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;

    fn counting_body(counter: Arc<AtomicU64>) -> LoopBody {
        Box::new(move |handle| {
            while !handle.should_stop() {
                counter.fetch_add(1, Ordering::Relaxed);
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn spawn_enters_started_and_runs_body() {
        let counter = Arc::new(AtomicU64::new(0));
        let worker = Worker::spawn("w", false, counting_body(counter.clone())).unwrap();
        assert_eq!(worker.state(), WorkerState::Started);
        assert!(!worker.should_stop());
        wait_for(|| counter.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn stop_blocks_until_stopped_and_restart_resumes() {
        let counter = Arc::new(AtomicU64::new(0));
        let worker = Worker::spawn("w", false, counting_body(counter.clone())).unwrap();

        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert!(worker.should_stop());
        let at_stop = counter.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::Relaxed), at_stop);

        worker.restart();
        assert_eq!(worker.state(), WorkerState::Started);
        wait_for(|| counter.load(Ordering::Relaxed) > at_stop);
    }

    #[test]
    fn body_error_parks_worker_as_stopped_and_allows_restart() {
        let attempts = Arc::new(AtomicU64::new(0));
        let body_attempts = attempts.clone();
        let body: LoopBody = Box::new(move |handle| {
            let n = body_attempts.fetch_add(1, Ordering::Relaxed);
            if n == 0 {
                return Err(MinerError::Device("simulated driver failure".into()));
            }
            while !handle.should_stop() {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });

        let worker = Worker::spawn("w", false, body).unwrap();
        wait_for(|| worker.state() == WorkerState::Stopped);
        assert_eq!(attempts.load(Ordering::Relaxed), 1);

        worker.restart();
        wait_for(|| attempts.load(Ordering::Relaxed) == 2);
        assert_eq!(worker.state(), WorkerState::Started);
    }

    #[test]
    fn drop_joins_the_thread() {
        let counter = Arc::new(AtomicU64::new(0));
        let worker = Worker::spawn("w", false, counting_body(counter.clone())).unwrap();
        drop(worker);
        let after_drop = counter.load(Ordering::Relaxed);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(counter.load(Ordering::Relaxed), after_drop);
    }

    #[test]
    fn drop_while_stopped_joins_promptly() {
        let worker = Worker::spawn(
            "w",
            false,
            Box::new(|_| Ok(())),
        )
        .unwrap();
        wait_for(|| worker.state() == WorkerState::Stopped);
        drop(worker);
    }

    #[test]
    fn observed_transitions_follow_the_state_machine() {
        // Record the state at every body entry; the body must only ever
        // observe Started (never Killing) when it runs.
        let observed = Arc::new(Mutex::new(Vec::new()));
        let body_observed = observed.clone();
        let body: LoopBody = Box::new(move |handle| {
            body_observed.lock().unwrap().push(handle.state());
            while !handle.should_stop() {
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        });

        let worker = Worker::spawn("w", false, body).unwrap();
        wait_for(|| observed.lock().unwrap().len() == 1);
        worker.stop();
        worker.restart();
        wait_for(|| observed.lock().unwrap().len() == 2);
        worker.stop();
        drop(worker);

        let observed = observed.lock().unwrap();
        assert!(observed.len() >= 2);
        for state in observed.iter() {
            assert_eq!(*state, WorkerState::Started);
        }
    }
}
