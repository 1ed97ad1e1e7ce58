//! Line-based I/O over pipe file descriptors.
//!
//! `EINTR` is retried here. Cancellation never relies on interrupting these
//! reads and writes; the interruptible read lives in `interface::input`.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

/// Buffer size for channel I/O. Requests are a few bytes each.
const DEFAULT_BUFFER_SIZE: usize = 4 * 1024;

/// A pipe or FIFO descriptor that implements `Read`/`Write`.
///
/// Works for both blocking and non-blocking descriptors: on `EAGAIN` it
/// waits for readiness with `poll(2)` and tries again.
pub struct PipeFd {
    fd: OwnedFd,
}

impl PipeFd {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd }
    }

    fn wait_ready(&self, events: PollFlags) -> io::Result<()> {
        let mut fds = [PollFd::new(self.fd.as_fd(), events)];
        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) | Err(Errno::EINTR) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}

impl From<OwnedFd> for PipeFd {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

impl From<std::fs::File> for PipeFd {
    fn from(file: std::fs::File) -> Self {
        Self::new(file.into())
    }
}

impl AsFd for PipeFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for PipeFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Read for PipeFd {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::read(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => self.wait_ready(PollFlags::POLLIN)?,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }
}

impl Write for PipeFd {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        loop {
            match nix::unistd::write(&self.fd, buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(Errno::EAGAIN) => self.wait_ready(PollFlags::POLLOUT)?,
                Err(e) => return Err(io::Error::from(e)),
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Buffered line reader.
pub struct LineReader {
    reader: BufReader<PipeFd>,
    line_buffer: String,
}

impl LineReader {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            reader: BufReader::with_capacity(DEFAULT_BUFFER_SIZE, fd),
            line_buffer: String::with_capacity(64),
        }
    }

    /// Read a line without its terminator. Returns `None` on EOF.
    pub fn read_line(&mut self) -> io::Result<Option<&str>> {
        self.line_buffer.clear();
        if self.reader.read_line(&mut self.line_buffer)? == 0 {
            return Ok(None);
        }
        if self.line_buffer.ends_with('\n') {
            self.line_buffer.pop();
        }
        if self.line_buffer.ends_with('\r') {
            self.line_buffer.pop();
        }
        Ok(Some(&self.line_buffer))
    }
}

/// Buffered line writer that flushes after every line.
pub struct LineWriter {
    writer: BufWriter<PipeFd>,
}

impl LineWriter {
    pub fn new(fd: PipeFd) -> Self {
        Self {
            writer: BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, fd),
        }
    }

    /// Write a line (appending a newline if missing) and flush.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}

#[cfg(test)]
pub(crate) fn test_pipe() -> (PipeFd, PipeFd) {
    let (read_fd, write_fd) = nix::unistd::pipe().expect("Failed to create pipe");
    (PipeFd::new(read_fd), PipeFd::new(write_fd))
}
