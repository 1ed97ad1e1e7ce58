//! The interface as a child process.
//!
//! The server re-executes its own binary with the `interface` subcommand.
//! Standard streams are inherited so the user talks to the interface on the
//! same terminal the server runs in.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::termination::{ProducerExit, analyze_wait_status};
use super::{ProducerHandle, ProducerLauncher};
use crate::cancel::{CancelNotifier, SignalNotifier};
use crate::channel::InputPolicy;
use crate::error::{FibError, Result};

/// Launches `<exe> [flags] interface <PIPE> [--lenient]`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    exe: PathBuf,
    /// Global flags placed before the subcommand (color, verbosity).
    global_args: Vec<OsString>,
    policy: InputPolicy,
}

impl ProcessLauncher {
    pub fn new(exe: impl Into<PathBuf>, policy: InputPolicy) -> Self {
        Self {
            exe: exe.into(),
            global_args: Vec::new(),
            policy,
        }
    }

    /// Launcher for the currently running binary.
    pub fn current_exe(policy: InputPolicy) -> Result<Self> {
        let exe = std::env::current_exe()
            .map_err(|e| FibError::ProducerSpawn(format!("locating own executable: {e}")))?;
        Ok(Self::new(exe, policy))
    }

    pub fn with_global_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.global_args.push(arg.into());
        self
    }

    fn command(&self, pipe: &Path) -> Command {
        let mut cmd = Command::new(&self.exe);
        cmd.args(&self.global_args).arg("interface").arg(pipe);
        if self.policy == InputPolicy::Lenient {
            cmd.arg("--lenient");
        }
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

impl ProducerLauncher for ProcessLauncher {
    type Handle = ProducerProc;

    fn launch(&self, pipe: &Path) -> Result<ProducerProc> {
        let child = self.command(pipe).spawn().map_err(|e| {
            FibError::ProducerSpawn(format!("{}: {}", self.exe.display(), e))
        })?;
        let raw = i32::try_from(child.id())
            .map_err(|_| FibError::ProducerSpawn(format!("pid {} out of range", child.id())))?;
        debug!(pid = raw, exe = %self.exe.display(), "Launched interface");
        // `Child` neither waits nor kills on drop; the pid is reaped below.
        Ok(ProducerProc::new(Pid::from_raw(raw)))
    }
}

/// Handle to the interface process, reaped exactly once.
///
/// Dropped unreaped (an error path), the process is terminated and reaped
/// so it never lingers as a zombie.
pub struct ProducerProc {
    pid: Pid,
    status: Option<WaitStatus>,
}

impl ProducerProc {
    pub fn new(pid: Pid) -> Self {
        Self { pid, status: None }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    fn try_wait(&mut self) -> Result<Option<WaitStatus>> {
        if let Some(status) = self.status {
            return Ok(Some(status));
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => Ok(None),
            Ok(status) => {
                self.status = Some(status);
                Ok(Some(status))
            }
            Err(Errno::EINTR) => Ok(None),
            Err(e) => Err(FibError::Sys(e)),
        }
    }

    fn wait(&mut self) -> Result<WaitStatus> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        loop {
            match waitpid(self.pid, None) {
                Ok(status) => {
                    self.status = Some(status);
                    return Ok(status);
                }
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(FibError::Sys(e)),
            }
        }
    }
}

impl ProducerHandle for ProducerProc {
    fn id(&self) -> u32 {
        self.pid.as_raw().unsigned_abs()
    }

    fn notifier(&self) -> Box<dyn CancelNotifier> {
        Box::new(SignalNotifier::new(self.pid))
    }

    fn has_exited(&mut self) -> Result<bool> {
        Ok(self.try_wait()?.is_some())
    }

    fn reap(&mut self) -> Result<ProducerExit> {
        let status = self.wait()?;
        Ok(ProducerExit {
            pid: self.id(),
            reason: analyze_wait_status(status),
        })
    }
}

impl Drop for ProducerProc {
    fn drop(&mut self) {
        if self.status.is_some() {
            return;
        }
        warn!(pid = %self.pid, "Terminating unreaped interface");
        let _ = kill(self.pid, Signal::SIGTERM);
        std::thread::sleep(Duration::from_millis(50));
        if let Ok(Some(_)) = self.try_wait() {
            return;
        }
        let _ = kill(self.pid, Signal::SIGKILL);
        let _ = self.wait();
    }
}
