//! How the interface process ended.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;

/// Reason why the producer process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Killed by `SIGXCPU`: its own CPU limit, inherited from the server.
    CpuLimitExceeded,
    /// Process is still running.
    StillAlive,
    Unknown,
}

impl TerminationReason {
    /// Only a clean zero exit counts as success.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn description(&self) -> String {
        match self {
            Self::Exited(code) => format!("exited with code {}", code),
            Self::Signaled(sig) => format!("was killed by signal {}", sig),
            Self::CpuLimitExceeded => "exceeded its CPU limit (SIGXCPU)".to_string(),
            Self::StillAlive => "is still running".to_string(),
            Self::Unknown => "ended for an unknown reason".to_string(),
        }
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, Signal::SIGXCPU, _) => TerminationReason::CpuLimitExceeded,
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}

/// A reaped producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerExit {
    pub pid: u32,
    pub reason: TerminationReason,
}

impl std::fmt::Display for ProducerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interface (pid {}) {}", self.pid, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_only_zero_exit_is_success() {
        assert!(TerminationReason::Exited(0).is_success());
        assert!(!TerminationReason::Exited(1).is_success());
        assert!(!TerminationReason::Signaled(Signal::SIGTERM).is_success());
        assert!(!TerminationReason::CpuLimitExceeded.is_success());
        assert!(!TerminationReason::StillAlive.is_success());
    }

    #[test]
    fn test_analyze_wait_status() {
        let pid = Pid::from_raw(1);
        assert_eq!(
            analyze_wait_status(WaitStatus::Exited(pid, 0)),
            TerminationReason::Exited(0)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::Signaled(pid, Signal::SIGUSR1, false)),
            TerminationReason::Signaled(Signal::SIGUSR1)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::Signaled(pid, Signal::SIGXCPU, true)),
            TerminationReason::CpuLimitExceeded
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::StillAlive),
            TerminationReason::StillAlive
        );
    }

    #[test]
    fn test_producer_exit_display() {
        let exit = ProducerExit {
            pid: 4242,
            reason: TerminationReason::Signaled(Signal::SIGUSR1),
        };
        let text = exit.to_string();
        assert!(text.contains("4242"));
        assert!(text.contains("SIGUSR1"));
    }
}
