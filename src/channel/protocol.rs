//! Wire protocol for the request channel.
//!
//! One base-10 ASCII integer per line. `0` is the sentinel that ends the
//! stream and starts the server's shutdown.

use clap::ValueEnum;
use thiserror::Error;

/// The reserved value that means "no more requests".
pub const SENTINEL: u64 = 0;

/// A single request travelling from the interface to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Compute the Fibonacci number for this (non-zero) input.
    Compute(u64),
    /// The sentinel: stop reading and begin shutdown.
    Shutdown,
}

impl Request {
    /// Map a raw value onto a request, treating [`SENTINEL`] as shutdown.
    pub fn from_value(value: u64) -> Self {
        if value == SENTINEL {
            Self::Shutdown
        } else {
            Self::Compute(value)
        }
    }

    /// The value carried on the wire.
    pub fn value(&self) -> u64 {
        match self {
            Self::Compute(n) => *n,
            Self::Shutdown => SENTINEL,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }

    /// Serialize to a wire line (with newline).
    pub fn to_line(&self) -> String {
        format!("{}\n", self.value())
    }
}

/// How text that is not a clean non-negative integer is handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum InputPolicy {
    /// Reject it. The interface re-prompts and the server skips the line.
    #[default]
    Strict,
    /// C `atoi` coercion: use the longest numeric prefix, and read anything
    /// without one (or with a minus sign) as the sentinel.
    Lenient,
}

impl std::fmt::Display for InputPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::Lenient => write!(f, "lenient"),
        }
    }
}

/// Why a line could not be read as a request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty input")]
    Empty,

    #[error("'{0}' is not a non-negative integer")]
    NotANumber(String),
}

/// Parse one line of text (user input or wire data) into a request.
pub fn parse_request(text: &str, policy: InputPolicy) -> Result<Request, ParseError> {
    match policy {
        InputPolicy::Strict => parse_strict(text),
        InputPolicy::Lenient => Ok(parse_lenient(text)),
    }
}

fn parse_strict(text: &str) -> Result<Request, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    trimmed
        .parse::<u64>()
        .map(Request::from_value)
        .map_err(|_| ParseError::NotANumber(trimmed.to_string()))
}

fn parse_lenient(text: &str) -> Request {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: u64 = 0;
    let mut seen_digit = false;
    for byte in digits.bytes().take_while(u8::is_ascii_digit) {
        seen_digit = true;
        value = value
            .saturating_mul(10)
            .saturating_add(u64::from(byte - b'0'));
    }

    if negative || !seen_digit {
        return Request::Shutdown;
    }
    Request::from_value(value)
}
