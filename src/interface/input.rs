//! Interruptible line input.
//!
//! Reads raw bytes from a descriptor (stdin in production) while also
//! watching a wake descriptor. Whichever becomes readable first decides the
//! outcome, so a cancellation that arrives while the user is thinking ends the
//! read immediately.

use std::io;
use std::os::unix::io::{AsFd, BorrowedFd};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

const CHUNK_SIZE: usize = 1024;

/// Result of waiting for one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// A complete line, without its terminator.
    Line(String),
    /// The wake descriptor fired before a line was complete.
    Interrupted,
    /// The input was closed and nothing is left to deliver.
    Eof,
}

/// Line reader over a raw descriptor that can be woken up.
pub struct FdInput<F> {
    source: F,
    pending: Vec<u8>,
    eof: bool,
}

impl<F: AsFd> FdInput<F> {
    pub fn new(source: F) -> Self {
        Self {
            source,
            pending: Vec::with_capacity(CHUNK_SIZE),
            eof: false,
        }
    }

    /// Wait for the next line or for `wake` to become readable.
    ///
    /// Buffered complete lines are returned without blocking. A final line
    /// without a newline is delivered before [`InputEvent::Eof`].
    pub fn next_event(&mut self, wake: BorrowedFd<'_>) -> io::Result<InputEvent> {
        loop {
            if let Some(line) = self.take_line() {
                return Ok(InputEvent::Line(line));
            }
            if self.eof {
                if self.pending.is_empty() {
                    return Ok(InputEvent::Eof);
                }
                let rest = std::mem::take(&mut self.pending);
                return Ok(InputEvent::Line(decode(&rest)));
            }

            let mut fds = [
                PollFd::new(self.source.as_fd(), PollFlags::POLLIN),
                PollFd::new(wake, PollFlags::POLLIN),
            ];
            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(io::Error::from(e)),
            }

            if is_ready(&fds[1]) {
                return Ok(InputEvent::Interrupted);
            }
            if is_ready(&fds[0]) {
                self.fill()?;
            }
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; CHUNK_SIZE];
        match nix::unistd::read(self.source.as_fd(), &mut chunk) {
            Ok(0) => self.eof = true,
            Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => {}
            Err(e) => return Err(io::Error::from(e)),
        }
        Ok(())
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.pending.drain(..=end).collect();
        Some(decode(&line[..end]))
    }
}

fn is_ready(fd: &PollFd<'_>) -> bool {
    fd.revents().is_some_and(|r| {
        r.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
    })
}

fn decode(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
