//! Compression Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A compression error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for compression operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Failed to initialize an encoder/decoder for requested compression format.
    #[display("failed to initialize codec")]
    Encoder,
    /// Data is corrupt or malformed. Don't retry with the same input. Used for reading/decoding.
    #[display("invalid or corrupted data")]
    InvalidData,
    /// An archive entry would be written outside the destination directory.
    #[display("unsafe archive entry: {}", _0.display())]
    UnsafeEntry(#[error(not(source))] PathBuf),
    /// Unpacking stopped because the unpacked size exceeded the limit.
    #[display("unpacked size exceeds limit of {_0} bytes")]
    LimitExceeded(#[error(not(source))] u64),
    /// Unpacking stopped because its deadline passed.
    #[display("unpacking ran past its deadline")]
    DeadlineExceeded,
    /// An I/O operation failed. Used for writing/encoding.
    #[display("I/O error")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Io)
    }
}
