//! Retrieval Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A retrieval error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for retrieval operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// What the engine does with each is decided by [`ErrorKind::disposition`].
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The repository kind tag isn't registered.
    #[display("unknown repository kind: {_0}")]
    UnknownKind(#[error(not(source))] String),
    /// A required external tool is missing or too old.
    #[display("tool unavailable: {_0}")]
    ToolUnavailable(#[error(not(source))] String),
    /// The requested revision names both a tag and a remote branch.
    #[display("ambiguous reference: {_0} is both a tag and a branch")]
    AmbiguousReference(#[error(not(source))] String),
    /// The requested revision only exists as an obsolete local branch.
    #[display("missing remote branch: {_0}")]
    MissingRemoteBranch(#[error(not(source))] String),
    /// A tag shadows the default branch locally; there's nothing safe to switch to.
    #[display("irrecoverable reference: tag {_0} collides with the default branch")]
    IrrecoverableReference(#[error(not(source))] String),
    /// The requested revision can't be expressed for this repository kind.
    #[display("invalid revision: {_0}")]
    InvalidRevision(#[error(not(source))] String),
    /// A supervised command ran out of space or time.
    #[display("{command}: {reason}")]
    BudgetExceeded {
        /// The command that was terminated.
        command: String,
        /// Which limit tripped.
        reason: String,
    },
    /// An external tool failed. On the update path this triggers a fresh checkout.
    #[display("{_0}")]
    ToolFailed(#[error(not(source))] String),
    /// A fresh checkout failed; the mirror directory has been removed.
    #[display("checkout failed")]
    CheckoutFailed,
    /// The downloaded archive is malformed or tries to escape the mirror.
    #[display("invalid archive")]
    InvalidArchive,
    /// Local state contradicts itself, e.g. a checkout with no resolvable revision.
    #[display("integrity violation: {_0}")]
    IntegrityViolation(#[error(not(source))] String),
    /// A filesystem operation on the mirror failed.
    #[display("I/O error")]
    Io,
}

/// What the engine should do when an error reaches it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Discard the mirror and fall back to a fresh checkout.
    Fallback,
    /// A budget was exhausted; retrying with a checkout won't help.
    FatalBudget,
    /// Give up on this repository.
    Fatal,
    /// Local state can't be trusted any more.
    FatalIntegrity,
}

impl ErrorKind {
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::ToolFailed(_) | Self::Io => Disposition::Fallback,
            Self::BudgetExceeded { .. } => Disposition::FatalBudget,
            Self::IntegrityViolation(_) => Disposition::FatalIntegrity,
            Self::UnknownKind(_)
            | Self::ToolUnavailable(_)
            | Self::AmbiguousReference(_)
            | Self::MissingRemoteBranch(_)
            | Self::IrrecoverableReference(_)
            | Self::InvalidRevision(_)
            | Self::CheckoutFailed
            | Self::InvalidArchive => Disposition::Fatal,
        }
    }

    /// Returns `true` if retrying the whole retrieval later might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ToolFailed(_) | Self::CheckoutFailed | Self::Io)
    }
}
