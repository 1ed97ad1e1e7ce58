//! Cooperative cancellation between the server and the interface.
//!
//! The interface owns a [`CancelToken`]: an atomic flag plus a self-pipe. The
//! `SIGUSR1` handler sets the flag and writes one byte to the pipe, so a
//! thread blocked in `poll(2)` on user input wakes up even if the signal
//! landed between its flag check and the blocking call.
//!
//! The server side only sees the [`CancelNotifier`] trait. In production that
//! is a [`SignalNotifier`] aimed at the interface process; tests pass a token
//! directly.

use std::os::unix::io::{AsFd, BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, kill, sigaction};
use nix::unistd::Pid;
use tracing::debug;

use crate::error::{FibError, Result};

/// The signal the server sends to stop the interface.
pub const CANCEL_SIGNAL: Signal = Signal::SIGUSR1;

/// Token the signal handler reads. The only process-global state.
static SIGNAL_TOKEN: OnceLock<CancelToken> = OnceLock::new();

/// Something that can tell the request producer to stop.
pub trait CancelNotifier: Send {
    fn notify(&self) -> Result<()>;
}

struct Inner {
    cancelled: AtomicBool,
    wake_rx: OwnedFd,
    wake_tx: OwnedFd,
}

/// One-shot cancellation flag with a pollable wake-up descriptor.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Result<Self> {
        let (wake_rx, wake_tx) = nix::unistd::pipe2(OFlag::O_CLOEXEC | OFlag::O_NONBLOCK)?;
        Ok(Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                wake_rx,
                wake_tx,
            }),
        })
    }

    /// Set the flag and wake any poller.
    ///
    /// Async-signal-safe: one atomic swap and at most one `write(2)`.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            // Full pipe means a wake-up is already pending.
            let _ = nix::unistd::write(&self.inner.wake_tx, &[1u8]);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Descriptor that becomes readable once the token is cancelled.
    pub fn wake_fd(&self) -> BorrowedFd<'_> {
        self.inner.wake_rx.as_fd()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelNotifier for CancelToken {
    fn notify(&self) -> Result<()> {
        self.cancel();
        Ok(())
    }
}

/// Notifies another process by sending it a signal.
#[derive(Debug, Clone, Copy)]
pub struct SignalNotifier {
    pid: Pid,
    signal: Signal,
}

impl SignalNotifier {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid,
            signal: CANCEL_SIGNAL,
        }
    }
}

impl CancelNotifier for SignalNotifier {
    fn notify(&self) -> Result<()> {
        match kill(self.pid, self.signal) {
            Ok(()) => {
                debug!(pid = %self.pid, signal = %self.signal, "Sent cancellation signal");
                Ok(())
            }
            // Already gone: nothing left to cancel, reaping reports how it ended.
            Err(Errno::ESRCH) => {
                debug!(pid = %self.pid, "Cancellation target already exited");
                Ok(())
            }
            Err(e) => Err(FibError::Sys(e)),
        }
    }
}

extern "C" fn on_cancel_signal(_signal: libc::c_int) {
    if let Some(token) = SIGNAL_TOKEN.get() {
        token.cancel();
    }
}

/// Install the `SIGUSR1` handler and return the token it cancels.
///
/// The handler is installed without `SA_RESTART`, so blocking calls return
/// `EINTR` as well. Calling this again returns the same token.
pub fn install_cancel_handler() -> Result<CancelToken> {
    if SIGNAL_TOKEN.get().is_none() {
        // Losing a race with another installer is fine: its token wins.
        let _ = SIGNAL_TOKEN.set(CancelToken::new()?);
    }
    let token = SIGNAL_TOKEN
        .get()
        .cloned()
        .ok_or_else(|| FibError::SignalSetup("cancellation token unavailable".into()))?;

    let action = SigAction::new(
        SigHandler::Handler(on_cancel_signal),
        SaFlags::empty(),
        SigSet::empty(),
    );
    // Safety: the handler only touches an initialized OnceLock, an atomic and
    // write(2), all of which are async-signal-safe.
    unsafe { sigaction(CANCEL_SIGNAL, &action) }
        .map_err(|e| FibError::SignalSetup(format!("sigaction({CANCEL_SIGNAL}): {e}")))?;

    debug!(signal = %CANCEL_SIGNAL, "Installed cancellation handler");
    Ok(token)
}
