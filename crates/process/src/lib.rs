//! Resource-bounded execution of external tools.
//!
//! Retrieval drives existing command-line tools (`git`, `svn`, `curl`, ...)
//! instead of implementing their protocols, and those tools operate on
//! untrusted remote content. The [`Supervisor`] runs them with two hard
//! ceilings described by a [`Budget`]:
//!
//! - **Size**: the cumulative size of a watched directory (usually the
//!   directory the tool is writing into), measured by [`directory_size`].
//! - **Time**: wall-clock time since the process was spawned.
//!
//! Exceeding either interrupts the whole process group and is reported as an
//! [`Outcome`], never silently. Short auxiliary commands go through
//! [`Supervisor::run_simple`] instead, which only enforces a timeout and
//! turns a non-zero exit into an error.

mod budget;
pub mod error;
mod output;
mod size;
mod supervise;
mod tool;

pub use crate::budget::Budget;
pub use crate::output::CapturedOutput;
pub use crate::size::directory_size;
pub use crate::supervise::{
    DEFAULT_OUTPUT_CAP, DEFAULT_POLL_INTERVAL, DEFAULT_QUERY_CAP, Outcome, Supervision, Supervisor,
};
pub use crate::tool::locate;
