//! Error types for fibpipe.

use std::path::PathBuf;

use thiserror::Error;

use crate::channel::protocol::ParseError;

/// Main error type for fibpipe.
///
/// Every variant except [`FibError::Malformed`] is fatal for the process that
/// raises it: the binary prints the chain and exits with status 1.
#[derive(Error, Debug)]
pub enum FibError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("CPU limit error: {0}")]
    CpuLimit(String),

    #[error("Failed to set up signal handling: {0}")]
    SignalSetup(String),

    #[error("Failed to {op} channel {}: {source}", path.display())]
    Channel {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to start worker for request {request}: {source}")]
    WorkerSpawn {
        request: u64,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to launch interface: {0}")]
    ProducerSpawn(String),

    #[error("Interface failed: {0}")]
    ProducerFailed(String),

    #[error("Malformed request: {0}")]
    Malformed(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("System call failed: {0}")]
    Sys(#[from] nix::errno::Errno),
}

impl FibError {
    /// Build a channel error for `op` on `path`.
    pub fn channel(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Channel {
            op,
            path: path.into(),
            source,
        }
    }

    /// Whether the owning loop may log the error and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Result type alias for fibpipe operations.
pub type Result<T> = std::result::Result<T, FibError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_channel_error_message() {
        let err = FibError::channel(
            "open",
            "/tmp/fibpipe-test.fifo",
            io::Error::new(io::ErrorKind::NotFound, "no such file"),
        );
        let msg = err.to_string();
        assert!(msg.contains("open"));
        assert!(msg.contains("/tmp/fibpipe-test.fifo"));
        assert!(msg.contains("no such file"));
    }

    #[test]
    fn test_worker_spawn_error_message() {
        let err = FibError::WorkerSpawn {
            request: 42,
            source: io::Error::new(io::ErrorKind::OutOfMemory, "resource exhausted"),
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("resource exhausted"));
    }

    #[test]
    fn test_only_malformed_is_recoverable() {
        let malformed: FibError = ParseError::NotANumber("abc".to_string()).into();
        assert!(malformed.is_recoverable());

        assert!(!FibError::InvalidConfig("x".into()).is_recoverable());
        assert!(!FibError::ProducerFailed("killed".into()).is_recoverable());
        assert!(!FibError::Sys(nix::errno::Errno::EPERM).is_recoverable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed");
        let err: FibError = io_err.into();
        assert!(err.to_string().contains("pipe closed"));
    }

    #[test]
    fn test_errno_conversion() {
        let err: FibError = nix::errno::Errno::ESRCH.into();
        assert!(err.to_string().starts_with("System call failed"));
    }
}
