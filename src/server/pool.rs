//! One detached thread per request, with a drain barrier.
//!
//! Workers are never joined. The pool tracks them through a live counter
//! guarded by a mutex; the last worker to finish signals a condition variable
//! that [`WorkerPool::await_drain`] waits on. Results come back over a
//! channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::error::{FibError, Result};
use crate::status;
use crate::theme::Themed;
use crate::work::{WorkError, fibonacci};

/// The result of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkOutcome {
    pub worker_id: u64,
    pub request: u64,
    pub result: std::result::Result<u64, WorkError>,
    pub elapsed: Duration,
}

struct PoolShared {
    live: Mutex<usize>,
    drained: Condvar,
}

impl PoolShared {
    fn live(&self) -> MutexGuard<'_, usize> {
        // A panicking worker cannot leave the counter inconsistent: it only
        // ever holds the lock for a single increment or decrement.
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Decrements the live count when the worker ends, panics included.
struct LiveGuard {
    shared: Arc<PoolShared>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        let mut live = self.shared.live();
        *live = live.saturating_sub(1);
        if *live == 0 {
            self.shared.drained.notify_all();
        }
    }
}

/// Spawns workers and waits for them to finish.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    next_id: AtomicU64,
    outcome_tx: Sender<WorkOutcome>,
    outcome_rx: Receiver<WorkOutcome>,
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerPool {
    pub fn new() -> Self {
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        Self {
            shared: Arc::new(PoolShared {
                live: Mutex::new(0),
                drained: Condvar::new(),
            }),
            next_id: AtomicU64::new(0),
            outcome_tx,
            outcome_rx,
        }
    }

    /// Start a detached worker computing F(`n`).
    ///
    /// The live count is raised before the thread exists, so a concurrent
    /// drain can never observe zero while this worker is pending.
    pub fn submit(&self, n: u64) -> Result<()> {
        let worker_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.shared.live() += 1;

        let guard = LiveGuard {
            shared: Arc::clone(&self.shared),
        };
        let tx = self.outcome_tx.clone();

        let spawned = thread::Builder::new()
            .name(format!("fib-worker-{worker_id}"))
            .spawn(move || {
                let _guard = guard;
                run_worker(worker_id, n, &tx);
            });

        match spawned {
            // Detached: the handle is dropped without joining.
            Ok(_handle) => {
                debug!(worker_id, request = n, "Started worker");
                Ok(())
            }
            // The closure (and its guard) was dropped, undoing the increment.
            Err(source) => Err(FibError::WorkerSpawn { request: n, source }),
        }
    }

    /// Workers started and not yet finished.
    pub fn live_workers(&self) -> usize {
        *self.shared.live()
    }

    /// Workers started over the pool's lifetime.
    pub fn dispatched(&self) -> u64 {
        self.next_id.load(Ordering::Relaxed)
    }

    /// Block until no worker is live.
    ///
    /// `on_wait` is called with the live count before each wait slice of at
    /// most `interval`. Returns as soon as the last worker finishes.
    pub fn await_drain<F>(&self, interval: Duration, mut on_wait: F)
    where
        F: FnMut(usize),
    {
        let mut live = self.shared.live();
        while *live > 0 {
            on_wait(*live);
            live = self
                .shared
                .drained
                .wait_timeout(live, interval)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Outcomes reported so far, in completion order.
    pub fn take_outcomes(&self) -> Vec<WorkOutcome> {
        self.outcome_rx.try_iter().collect()
    }
}

fn run_worker(worker_id: u64, n: u64, tx: &Sender<WorkOutcome>) {
    let started = Instant::now();
    let result = fibonacci(n);

    match &result {
        Ok(value) => status::server(format!("Fibonacci {} is {}", n, value.result())),
        Err(e) => {
            warn!(worker_id, request = n, error = %e, "Worker could not compute");
            status::server(format!("Could not compute: {e}").warning());
        }
    }

    // The receiver lives as long as the pool; a send can only fail after
    // the pool is gone, when nobody wants the outcome.
    let _ = tx.send(WorkOutcome {
        worker_id,
        request: n,
        result,
        elapsed: started.elapsed(),
    });
}
