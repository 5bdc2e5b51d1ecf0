//! Process Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A process error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for process operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
/// Budget violations during supervision are *not* errors: they are reported
/// through [`Outcome`](crate::Outcome) so the caller decides what they mean.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The program could not be found on `PATH`.
    #[display("program not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// The program exists but the operating system refused to start it.
    #[display("failed to spawn: {_0}")]
    Spawn(#[error(not(source))] String),
    /// A short auxiliary command ran past its dedicated timeout.
    #[display("{program} timed out after {seconds}s")]
    Timeout {
        /// Program that was killed.
        program: String,
        /// Timeout that was exceeded.
        seconds: u64,
    },
    /// A short auxiliary command exited unsuccessfully.
    #[display("{program} exited with code {code}: {output}")]
    NonZeroExit {
        /// Program that failed.
        program: String,
        /// Exit code, or `-1` if terminated by a signal.
        code: i32,
        /// Captured (bounded) output, for diagnostics.
        output: String,
    },
    /// A short auxiliary command printed more than the query cap; its
    /// output can't be trusted to be complete.
    #[display("{program} printed more than {cap} bytes")]
    OutputTooLarge {
        /// Program whose output was cut.
        program: String,
        /// Cap that was exceeded.
        cap: usize,
    },
    /// Waiting on, or reading from, the child process failed.
    #[display("I/O error while supervising process")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Io)
    }
}
