//! Named pipe lifecycle: creation, the two endpoints, removal.

use std::fs::{self, OpenOptions};
use std::io;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::os::unix::io::AsFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::stat::Mode;
use tracing::{debug, warn};

use super::ipc::{LineReader, LineWriter, PipeFd};
use super::protocol::InputPolicy;
use super::{RequestReader, RequestWriter};
use crate::error::{FibError, Result};

/// A FIFO created by the server. Removed when dropped.
#[derive(Debug)]
pub struct Fifo {
    path: PathBuf,
    removed: bool,
}

impl Fifo {
    /// Create the FIFO at `path` with mode `0700`.
    ///
    /// A stale FIFO at the same path is replaced. Anything else occupying the
    /// path is left alone and reported as an error.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_fifo() => {
                debug!(path = %path.display(), "Replacing stale FIFO");
                fs::remove_file(&path).map_err(|e| FibError::channel("replace", &path, e))?;
            }
            Ok(_) => {
                return Err(FibError::channel(
                    "create",
                    &path,
                    io::Error::new(
                        io::ErrorKind::AlreadyExists,
                        "path exists and is not a FIFO",
                    ),
                ));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(FibError::channel("inspect", &path, e)),
        }

        nix::unistd::mkfifo(&path, Mode::S_IRWXU)
            .map_err(|e| FibError::channel("create", &path, io::Error::from(e)))?;
        debug!(path = %path.display(), "Created FIFO");

        Ok(Self {
            path,
            removed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Attach the read end without waiting for a writer.
    ///
    /// The descriptor is opened non-blocking, so the reader exists before the
    /// interface is launched and the interface's write-side open cannot block.
    pub fn open_read(&self, policy: InputPolicy) -> Result<FifoReader> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&self.path)
            .map_err(|e| FibError::channel("open", &self.path, e))?;
        debug!(path = %self.path.display(), "Reader attached to FIFO");
        Ok(FifoReader {
            fd: PipeFd::from(file),
            path: self.path.clone(),
            policy,
        })
    }

    /// Remove the FIFO from the filesystem.
    pub fn remove(mut self) -> Result<()> {
        self.removed = true;
        fs::remove_file(&self.path).map_err(|e| FibError::channel("remove", &self.path, e))
    }
}

impl Drop for Fifo {
    fn drop(&mut self) {
        if !self.removed
            && let Err(e) = fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove FIFO");
        }
    }
}

/// Read end of the FIFO, attached but not yet connected to a writer.
pub struct FifoReader {
    fd: PipeFd,
    path: PathBuf,
    policy: InputPolicy,
}

impl FifoReader {
    /// Block until a writer has connected.
    ///
    /// Readiness means the writer produced data or already hung up. Every
    /// `poll_interval` without readiness `still_waiting` is consulted; when it
    /// returns `false` the writer is deemed gone and an error is returned.
    pub fn await_writer<F>(
        self,
        poll_interval: Duration,
        mut still_waiting: F,
    ) -> Result<RequestReader>
    where
        F: FnMut() -> Result<bool>,
    {
        let timeout_ms = u16::try_from(poll_interval.as_millis()).unwrap_or(u16::MAX);

        loop {
            let mut fds = [PollFd::new(self.fd.as_fd(), PollFlags::POLLIN)];
            match poll(&mut fds, PollTimeout::from(timeout_ms)) {
                Ok(0) => {
                    if !still_waiting()? {
                        return Err(FibError::channel(
                            "connect",
                            &self.path,
                            io::Error::new(
                                io::ErrorKind::NotConnected,
                                "writer exited before attaching",
                            ),
                        ));
                    }
                }
                Ok(_) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(FibError::channel("poll", &self.path, io::Error::from(e))),
            }
        }

        debug!(path = %self.path.display(), "Writer attached to FIFO");
        Ok(RequestReader::new(
            LineReader::new(self.fd),
            self.path,
            self.policy,
        ))
    }
}

/// Open the write end of the FIFO at `path`.
///
/// Blocks until a reader is attached; the server guarantees one is.
pub fn open_write(path: &Path) -> Result<RequestWriter> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| FibError::channel("open", path, e))?;
    Ok(RequestWriter::new(
        LineWriter::new(PipeFd::from(file)),
        path.to_path_buf(),
    ))
}
