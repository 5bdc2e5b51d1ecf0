//! Local mirrors of remote repositories.
//!
//! The [`Engine`] keeps one directory per repository identity (see
//! [`LocalMirror`]) and brings it up to date by driving `git`, `svn` or
//! `curl` through the [`trawl_process::Supervisor`]:
//!
//! 1. The tool must be installed and recent enough ([`Tools`] probes once).
//! 2. An existing mirror that already matches the remote is left alone.
//! 3. Otherwise it's updated in place, unless it's already over the byte
//!    budget.
//! 4. Failing that, it's deleted and checked out afresh. A failed checkout
//!    is deleted too, so nothing half-built is ever mistaken for a mirror.
//!
//! Budget violations are never retried: see [`error::Disposition`].

mod archive;
mod context;
mod descriptor;
mod engine;
pub mod error;
mod git;
mod mirror;
mod session;
mod svn;

pub use crate::context::{ExecContext, Tool, Tools, Version};
pub use crate::descriptor::{Credentials, RepositoryDescriptor, RepositoryKind};
pub use crate::engine::{DEFAULT_FINGERPRINT_PREFIX, Engine};
pub use crate::mirror::LocalMirror;
