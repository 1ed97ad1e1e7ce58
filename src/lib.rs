//! fibpipe: a two-process Fibonacci demo.
//!
//! An interface process reads numbers from the user and writes them to a
//! named pipe. A server process reads the pipe and computes each Fibonacci
//! number on its own thread, under a CPU-time budget. When the budget runs
//! out the server signals the interface to stop, drains its workers, reaps
//! the interface and removes the pipe.

pub mod cancel;
pub mod channel;
pub mod error;
pub mod interface;
pub mod logging;
pub mod paths;
pub mod server;
pub mod status;
pub mod theme;
pub mod usage;
pub mod work;

pub use error::{FibError, Result};
