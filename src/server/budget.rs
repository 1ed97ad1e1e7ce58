//! CPU-time budget enforcement.
//!
//! The soft `RLIMIT_CPU` makes the kernel send `SIGXCPU` once the process has
//! used its budget, and again every second after that. No handler runs in
//! signal context: the signal stays blocked in every thread and a dedicated
//! watcher thread collects it with `sigwait(2)`, then flips [`BudgetState`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use nix::sys::pthread::{Pthread, pthread_kill, pthread_self};
use nix::sys::resource::{Resource, getrlimit, setrlimit};
use nix::sys::signal::{SigSet, Signal};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelNotifier;
use crate::error::{FibError, Result};
use crate::status;
use crate::theme::Themed;

/// Delivered by the kernel when the soft CPU limit is reached.
const BUDGET_SIGNAL: Signal = Signal::SIGXCPU;
/// Directed at the watcher thread to make it exit.
const STOP_SIGNAL: Signal = Signal::SIGUSR2;

fn budget_signals() -> SigSet {
    let mut set = SigSet::empty();
    set.add(BUDGET_SIGNAL);
    set.add(STOP_SIGNAL);
    set
}

/// Block the budget signals in the calling thread.
///
/// Call from the main thread before any other thread is spawned; threads
/// inherit the mask, so only the watcher ever receives the signals.
pub fn block_budget_signals() -> Result<()> {
    budget_signals()
        .thread_block()
        .map_err(|e| FibError::SignalSetup(format!("blocking {BUDGET_SIGNAL}: {e}")))
}

/// Validate a requested soft limit against the hard limit.
fn check_cpu_limit(seconds: u64, hard: libc::rlim_t) -> Result<libc::rlim_t> {
    if seconds == 0 {
        return Err(FibError::InvalidConfig(
            "CPU limit must be at least one second".into(),
        ));
    }
    let soft = seconds as libc::rlim_t;
    if hard != libc::RLIM_INFINITY && soft > hard {
        return Err(FibError::CpuLimit(format!(
            "requested {seconds}s exceeds the hard limit of {hard}s"
        )));
    }
    Ok(soft)
}

/// Set the soft `RLIMIT_CPU` of this process to `seconds`.
///
/// The hard limit is left untouched.
pub fn configure_cpu_limit(seconds: u64) -> Result<()> {
    let (current, hard) = getrlimit(Resource::RLIMIT_CPU)
        .map_err(|e| FibError::CpuLimit(format!("getrlimit: {e}")))?;
    let soft = check_cpu_limit(seconds, hard)?;

    setrlimit(Resource::RLIMIT_CPU, soft, hard)
        .map_err(|e| FibError::CpuLimit(format!("setrlimit: {e}")))?;
    debug!(soft, hard, previous = current, "Configured CPU limit");
    Ok(())
}

struct NotifierSlot {
    notifier: Option<Box<dyn CancelNotifier>>,
    notified: bool,
}

/// Shared `{Active, BudgetExceeded}` state of the server.
///
/// The transition happens once. The attached notifier is invoked exactly
/// once, either at the transition or at attach time if it already happened.
pub struct BudgetState {
    exceeded: AtomicBool,
    slot: Mutex<NotifierSlot>,
}

impl Default for BudgetState {
    fn default() -> Self {
        Self::new()
    }
}

impl BudgetState {
    pub fn new() -> Self {
        Self {
            exceeded: AtomicBool::new(false),
            slot: Mutex::new(NotifierSlot {
                notifier: None,
                notified: false,
            }),
        }
    }

    pub fn is_exceeded(&self) -> bool {
        self.exceeded.load(Ordering::SeqCst)
    }

    /// Enter `BudgetExceeded`. Returns `true` only for the first call.
    pub fn trip(&self) -> bool {
        if self.exceeded.swap(true, Ordering::SeqCst) {
            debug!("Repeated budget signal ignored");
            return false;
        }
        warn!("CPU budget exceeded");
        status::server("CPU budget exceeded, asking the interface to stop".warning());
        self.notify_once();
        true
    }

    /// Register who to cancel. Sent right away if the budget is already gone.
    pub fn attach_notifier(&self, notifier: Box<dyn CancelNotifier>) {
        self.lock_slot().notifier = Some(notifier);
        if self.is_exceeded() {
            self.notify_once();
        }
    }

    fn notify_once(&self) {
        let mut guard = self.lock_slot();
        let slot = &mut *guard;
        if slot.notified {
            return;
        }
        let Some(notifier) = slot.notifier.as_ref() else {
            debug!("No producer attached yet, deferring cancellation");
            return;
        };
        slot.notified = true;
        if let Err(e) = notifier.notify() {
            error!(error = %e, "Failed to cancel the interface");
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, NotifierSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Thread that turns `SIGXCPU` into [`BudgetState::trip`].
pub struct BudgetWatcher {
    thread: Pthread,
    handle: Option<JoinHandle<()>>,
}

impl BudgetWatcher {
    /// Spawn the watcher and wait until it is ready to receive signals.
    pub fn start(state: Arc<BudgetState>) -> Result<Self> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new()
            .name("cpu-budget".to_string())
            .spawn(move || {
                let signals = budget_signals();
                if let Err(e) = signals.thread_block() {
                    error!(error = %e, "Budget watcher could not block its signals");
                    return;
                }
                if ready_tx.send(pthread_self()).is_err() {
                    return;
                }
                watch(&signals, &state);
            })
            .map_err(|e| FibError::SignalSetup(format!("spawning budget watcher: {e}")))?;

        let thread = ready_rx
            .recv()
            .map_err(|_| FibError::SignalSetup("budget watcher exited during startup".into()))?;
        debug!("Budget watcher running");

        Ok(Self {
            thread,
            handle: Some(handle),
        })
    }

    #[cfg(test)]
    fn thread(&self) -> Pthread {
        self.thread
    }

    /// Wake the watcher and wait for it to exit.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        if !handle.is_finished()
            && let Err(e) = pthread_kill(self.thread, STOP_SIGNAL)
        {
            warn!(error = %e, "Failed to stop budget watcher");
            return;
        }
        if handle.join().is_err() {
            warn!("Budget watcher panicked");
        }
        debug!("Budget watcher stopped");
    }
}

impl Drop for BudgetWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch(signals: &SigSet, state: &BudgetState) {
    loop {
        match signals.wait() {
            Ok(BUDGET_SIGNAL) => {
                if state.trip() {
                    info!("Received {BUDGET_SIGNAL}");
                }
            }
            Ok(STOP_SIGNAL) => break,
            Ok(other) => debug!(signal = %other, "Ignoring unexpected signal"),
            Err(e) => {
                error!(error = %e, "sigwait failed, budget no longer enforced");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    /// Counts notifications.
    #[derive(Clone, Default)]
    struct CountingNotifier(Arc<AtomicUsize>);

    impl CountingNotifier {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    impl CancelNotifier for CountingNotifier {
        fn notify(&self) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_trip_is_one_shot() {
        let state = BudgetState::new();
        let notifier = CountingNotifier::default();
        state.attach_notifier(Box::new(notifier.clone()));

        assert!(!state.is_exceeded());
        assert!(state.trip());
        assert!(!state.trip());
        assert!(!state.trip());
        assert!(state.is_exceeded());
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_trip_before_attach_notifies_on_attach() {
        let state = BudgetState::new();
        assert!(state.trip());

        let notifier = CountingNotifier::default();
        state.attach_notifier(Box::new(notifier.clone()));
        assert_eq!(notifier.count(), 1);

        state.trip();
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_reattach_after_notify_does_not_resend() {
        let state = BudgetState::new();
        let first = CountingNotifier::default();
        state.attach_notifier(Box::new(first.clone()));
        assert!(state.trip());
        assert_eq!(first.count(), 1);

        let second = CountingNotifier::default();
        state.attach_notifier(Box::new(second.clone()));
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 0);
    }

    #[test]
    fn test_concurrent_trips_notify_once() {
        let state = Arc::new(BudgetState::new());
        let notifier = CountingNotifier::default();
        state.attach_notifier(Box::new(notifier.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || state.trip())
            })
            .collect();
        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&first| first)
            .count();

        assert_eq!(firsts, 1);
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_check_cpu_limit() {
        assert_eq!(check_cpu_limit(5, libc::RLIM_INFINITY).unwrap(), 5);
        assert_eq!(check_cpu_limit(5, 10).unwrap(), 5);
        assert_eq!(check_cpu_limit(10, 10).unwrap(), 10);
        assert!(matches!(
            check_cpu_limit(11, 10),
            Err(FibError::CpuLimit(_))
        ));
        assert!(matches!(
            check_cpu_limit(0, libc::RLIM_INFINITY),
            Err(FibError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_watcher_trips_on_sigxcpu() {
        let state = Arc::new(BudgetState::new());
        let notifier = CountingNotifier::default();
        state.attach_notifier(Box::new(notifier.clone()));

        let mut watcher = BudgetWatcher::start(Arc::clone(&state)).unwrap();
        pthread_kill(watcher.thread(), BUDGET_SIGNAL).unwrap();
        assert!(wait_until(|| state.is_exceeded()));

        // Repeats after the soft limit are absorbed.
        pthread_kill(watcher.thread(), BUDGET_SIGNAL).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(notifier.count(), 1);

        watcher.stop();
        assert!(watcher.handle.is_none());
    }

    #[test]
    fn test_watcher_stops_without_signal() {
        let state = Arc::new(BudgetState::new());
        let watcher = BudgetWatcher::start(Arc::clone(&state)).unwrap();
        drop(watcher);
        assert!(!state.is_exceeded());
    }
}
