//! The request channel between the interface and the server.
//!
//! A named pipe carries newline-terminated integers in one direction. The
//! server owns the FIFO (see [`Fifo`]); the interface only opens the write
//! end with [`open_write`].

mod fifo;
pub mod ipc;
pub mod protocol;

use std::path::PathBuf;

use tracing::{trace, warn};

pub use fifo::{Fifo, FifoReader, open_write};
pub use protocol::{InputPolicy, ParseError, Request, SENTINEL, parse_request};

use crate::error::{FibError, Result};
use ipc::{LineReader, LineWriter};

/// Server-side view of a connected channel.
///
/// Yields one item per line. `None` means the writer hung up; a malformed
/// line yields a recoverable [`FibError::Malformed`] and reading continues.
pub struct RequestReader {
    reader: LineReader,
    path: PathBuf,
    policy: InputPolicy,
    done: bool,
}

impl RequestReader {
    pub(crate) fn new(reader: LineReader, path: PathBuf, policy: InputPolicy) -> Self {
        Self {
            reader,
            path,
            policy,
            done: false,
        }
    }
}

impl Iterator for RequestReader {
    type Item = Result<Request>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.reader.read_line() {
            Ok(Some(line)) => {
                trace!(line, "Read line from channel");
                Some(parse_request(line, self.policy).map_err(FibError::from))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                warn!(path = %self.path.display(), error = %e, "Channel read failed");
                Some(Err(FibError::channel("read", &self.path, e)))
            }
        }
    }
}

/// Interface-side view of the channel.
pub struct RequestWriter {
    writer: LineWriter,
    path: PathBuf,
}

impl RequestWriter {
    pub(crate) fn new(writer: LineWriter, path: PathBuf) -> Self {
        Self { writer, path }
    }

    /// Send one request and flush it so the server sees it immediately.
    pub fn send(&mut self, request: Request) -> Result<()> {
        self.writer
            .write_line(&request.to_line())
            .map_err(|e| FibError::channel("write", &self.path, e))
    }
}
