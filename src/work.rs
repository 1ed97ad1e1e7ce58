//! The unit of work each worker runs: the n-th Fibonacci number.
//!
//! The naive recursion is intentional. The workload exists to burn CPU time
//! so that the server's CPU budget can actually be reached.

use thiserror::Error;

/// Largest input whose Fibonacci number fits in a `u64` (F(93) = 12200160415121876738).
pub const MAX_FIBONACCI_INPUT: u64 = 93;

/// Errors produced by the work function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkError {
    #[error(
        "Fibonacci {0} does not fit in 64 bits (largest supported input is {max})",
        max = MAX_FIBONACCI_INPUT
    )]
    Overflow(u64),
}

/// Compute F(n) with F(0) = 0, F(1) = 1, F(n) = F(n-1) + F(n-2).
///
/// Inputs above [`MAX_FIBONACCI_INPUT`] are rejected up front instead of
/// overflowing. Running time grows as roughly 1.6^n.
pub fn fibonacci(n: u64) -> Result<u64, WorkError> {
    if n > MAX_FIBONACCI_INPUT {
        return Err(WorkError::Overflow(n));
    }
    Ok(fib_recursive(n))
}

fn fib_recursive(n: u64) -> u64 {
    if n <= 1 {
        return n;
    }
    fib_recursive(n - 1) + fib_recursive(n - 2)
}
