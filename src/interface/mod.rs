//! The interface process: reads numbers from the user and forwards them to
//! the server over the request channel.
//!
//! It stops when the user enters the sentinel, when its input ends, or when
//! the server cancels it with `SIGUSR1`. In every case the sentinel is the
//! last thing written to the channel.

mod input;

use std::io;
use std::path::PathBuf;

use tracing::{debug, info, warn};

pub use input::{FdInput, InputEvent};

use crate::cancel::{self, CancelToken};
use crate::channel::{self, InputPolicy, Request, RequestWriter, parse_request};
use crate::error::Result;
use crate::status::{self, Role};
use crate::theme::Themed;

const PROMPT: &str = "Which Fibonacci number do you want :";

/// Interface configuration.
#[derive(Debug, Clone, Default)]
pub struct InterfaceConfig {
    /// Write end of the request channel.
    pub pipe: PathBuf,
    pub policy: InputPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceState {
    Accepting,
    Cancelled,
}

/// Why the read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The user entered the sentinel.
    Sentinel,
    /// Input was closed; the sentinel was sent on the user's behalf.
    EndOfInput,
    /// The server asked us to stop.
    Cancelled,
}

/// What the interface did during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSummary {
    /// Non-sentinel requests forwarded.
    pub sent: usize,
    /// Lines rejected by strict parsing.
    pub rejected: usize,
    pub state: InterfaceState,
    pub ended_by: EndReason,
}

/// Run the interface against the FIFO in `config`, reading from stdin.
pub fn run(config: &InterfaceConfig) -> Result<InterfaceSummary> {
    // Installed before the channel is opened: the server only signals once
    // the writer is connected.
    let token = cancel::install_cancel_handler()?;
    let mut writer = channel::open_write(&config.pipe)?;
    info!(pipe = %config.pipe.display(), policy = %config.policy, "Connected to server");

    let mut input = FdInput::new(io::stdin());
    let summary = run_loop(&mut input, &mut writer, &token, config.policy)?;
    info!(
        sent = summary.sent,
        rejected = summary.rejected,
        ended_by = ?summary.ended_by,
        "Interface finished"
    );
    Ok(summary)
}

/// The read-forward loop.
///
/// Cancellation is checked at the top of every iteration; a cancellation that
/// lands during the blocking read interrupts it, and the next check sees it.
pub fn run_loop<F: std::os::unix::io::AsFd>(
    input: &mut FdInput<F>,
    writer: &mut RequestWriter,
    token: &CancelToken,
    policy: InputPolicy,
) -> Result<InterfaceSummary> {
    let mut sent = 0;
    let mut rejected = 0;

    let ended_by = loop {
        if token.is_cancelled() {
            debug!("Received cancellation, stopping loop");
            status::interface("Reading from user abandoned".warning());
            writer.send(Request::Shutdown)?;
            break EndReason::Cancelled;
        }

        status::prompt(Role::Interface, PROMPT);
        match input.next_event(token.wake_fd())? {
            InputEvent::Interrupted => {
                println!();
                continue;
            }
            InputEvent::Eof => {
                println!();
                status::interface("End of input, sending the sentinel");
                writer.send(Request::Shutdown)?;
                break EndReason::EndOfInput;
            }
            InputEvent::Line(text) => match parse_request(&text, policy) {
                Ok(Request::Shutdown) => {
                    writer.send(Request::Shutdown)?;
                    break EndReason::Sentinel;
                }
                Ok(request) => {
                    writer.send(request)?;
                    sent += 1;
                    debug!(value = request.value(), "Forwarded request");
                }
                Err(e) => {
                    rejected += 1;
                    warn!(input = %text, error = %e, "Rejected input");
                    status::interface(format!("Ignoring input: {e}").warning());
                }
            },
        }
    };

    status::interface("Interface is exiting");
    let state = if ended_by == EndReason::Cancelled {
        InterfaceState::Cancelled
    } else {
        InterfaceState::Accepting
    };
    Ok(InterfaceSummary {
        sent,
        rejected,
        state,
        ended_by,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RequestReader;
    use crate::channel::ipc::{LineReader, LineWriter, test_pipe};
    use std::io::Write;
    use std::time::Duration;

    /// A writer plus the reader that sees what it sent.
    fn channel_pair() -> (RequestWriter, RequestReader) {
        let (read_fd, write_fd) = test_pipe();
        (
            RequestWriter::new(LineWriter::new(write_fd), PathBuf::from("test")),
            RequestReader::new(
                LineReader::new(read_fd),
                PathBuf::from("test"),
                InputPolicy::Strict,
            ),
        )
    }

    fn user_typing(data: &[u8]) -> FdInput<crate::channel::ipc::PipeFd> {
        let (read_fd, mut write_fd) = test_pipe();
        write_fd.write_all(data).unwrap();
        drop(write_fd);
        FdInput::new(read_fd)
    }

    fn drain(writer: RequestWriter, reader: RequestReader) -> Vec<Request> {
        drop(writer);
        reader.map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_forwards_until_sentinel() {
        let (mut writer, reader) = channel_pair();
        let token = CancelToken::new().unwrap();
        let mut input = user_typing(b"5\n8\n3\n0\n99\n");

        let summary = run_loop(&mut input, &mut writer, &token, InputPolicy::Strict).unwrap();

        assert_eq!(summary.sent, 3);
        assert_eq!(summary.ended_by, EndReason::Sentinel);
        assert_eq!(summary.state, InterfaceState::Accepting);
        assert_eq!(
            drain(writer, reader),
            vec![
                Request::Compute(5),
                Request::Compute(8),
                Request::Compute(3),
                Request::Shutdown
            ]
        );
    }

    #[test]
    fn test_strict_rejects_and_keeps_going() {
        let (mut writer, reader) = channel_pair();
        let token = CancelToken::new().unwrap();
        let mut input = user_typing(b"abc\n\n7\n0\n");

        let summary = run_loop(&mut input, &mut writer, &token, InputPolicy::Strict).unwrap();

        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.sent, 1);
        assert_eq!(
            drain(writer, reader),
            vec![Request::Compute(7), Request::Shutdown]
        );
    }

    #[test]
    fn test_lenient_garbage_is_the_sentinel() {
        let (mut writer, reader) = channel_pair();
        let token = CancelToken::new().unwrap();
        let mut input = user_typing(b"4\nabc\n9\n");

        let summary = run_loop(&mut input, &mut writer, &token, InputPolicy::Lenient).unwrap();

        assert_eq!(summary.ended_by, EndReason::Sentinel);
        assert_eq!(
            drain(writer, reader),
            vec![Request::Compute(4), Request::Shutdown]
        );
    }

    #[test]
    fn test_end_of_input_sends_sentinel() {
        let (mut writer, reader) = channel_pair();
        let token = CancelToken::new().unwrap();
        let mut input = user_typing(b"6\n");

        let summary = run_loop(&mut input, &mut writer, &token, InputPolicy::Strict).unwrap();

        assert_eq!(summary.ended_by, EndReason::EndOfInput);
        assert_eq!(
            drain(writer, reader),
            vec![Request::Compute(6), Request::Shutdown]
        );
    }

    #[test]
    fn test_cancelled_before_first_prompt() {
        let (mut writer, reader) = channel_pair();
        let token = CancelToken::new().unwrap();
        token.cancel();
        let mut input = user_typing(b"5\n");

        let summary = run_loop(&mut input, &mut writer, &token, InputPolicy::Strict).unwrap();

        assert_eq!(summary.sent, 0);
        assert_eq!(summary.state, InterfaceState::Cancelled);
        assert_eq!(drain(writer, reader), vec![Request::Shutdown]);
    }

    #[test]
    fn test_cancel_during_blocked_read() {
        let (mut writer, reader) = channel_pair();
        let token = CancelToken::new().unwrap();
        // The user never types anything; the write end stays open.
        let (read_fd, _keep_open) = test_pipe();
        let mut input = FdInput::new(read_fd);

        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                token.cancel();
            })
        };

        let summary = run_loop(&mut input, &mut writer, &token, InputPolicy::Strict).unwrap();
        canceller.join().unwrap();

        assert_eq!(summary.ended_by, EndReason::Cancelled);
        assert_eq!(drain(writer, reader), vec![Request::Shutdown]);
    }
}
