//! Scan Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A scan error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for scan operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A saved position no longer exists in the mirror.
    #[display("integrity violation: {_0}")]
    IntegrityViolation(#[error(not(source))] String),
    /// A directory of the mirror could not be listed.
    #[display("unreadable directory: {}", _0.display())]
    Unreadable(#[error(not(source))] PathBuf),
    /// A file could not be read.
    #[display("I/O error")]
    Io,
    /// The file metadata is derived from is too large to hand to the generator.
    #[display("{} is {size} bytes, over the {limit} byte limit", path.display())]
    OversizedSource {
        path: PathBuf,
        size: u64,
        limit: u64,
    },
    /// A generated descriptor is already on disk where a new one was about to be built.
    #[display("refusing to overwrite existing artifact {}", _0.display())]
    ArtifactExists(#[error(not(source))] PathBuf),
    /// A read-only pass found no generated descriptor to reuse.
    #[display("no generated artifact at {}", _0.display())]
    ArtifactMissing(#[error(not(source))] PathBuf),
    /// A descriptor exceeds the size it may be read back at.
    #[display("{} is {size} bytes, over the {limit} byte cap", path.display())]
    ArtifactTooLarge {
        path: PathBuf,
        size: u64,
        limit: u64,
    },
    /// A descriptor isn't a JSON object.
    #[display("invalid descriptor {}", _0.display())]
    InvalidDescriptor(#[error(not(source))] PathBuf),
    /// The external generation step failed.
    #[display("metadata generation failed: {_0}")]
    Generation(#[error(not(source))] String),
}

impl ErrorKind {
    /// Whether this error arose while building metadata (rather than walking).
    pub fn is_metadata(&self) -> bool {
        matches!(
            self,
            Self::OversizedSource { .. }
                | Self::ArtifactExists(_)
                | Self::ArtifactMissing(_)
                | Self::ArtifactTooLarge { .. }
                | Self::InvalidDescriptor(_)
                | Self::Generation(_)
        )
    }
}
