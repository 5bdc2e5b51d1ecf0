use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::path::PathBuf;

/// Locate an executable on `PATH`.
///
/// # Errors
/// Returns [`ErrorKind::NotFound`] naming the program if it isn't installed.
pub fn locate(program: &str) -> Result<PathBuf> {
    let path = which::which(program).or_raise(|| ErrorKind::NotFound(program.to_string()))?;
    tracing::trace!(program, path = %path.display(), "Located external tool");
    Ok(path)
}
