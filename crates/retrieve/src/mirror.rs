use crate::descriptor::RepositoryDescriptor;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::io;
use std::path::{Path, PathBuf};
use trawl_process::directory_size;

const REPO_DIR: &str = "repo";
const FREED_DIR: &str = "freed";
const DOWNLOAD_DIR: &str = "download";

/// The on-disk home of one repository identity.
///
/// ```text
/// <root>/<repository identity>/repo      the checkout (or unpacked archive)
/// <root>/<repository identity>/freed     artifacts written by later passes
/// <root>/<repository identity>/download  an archive while it's being fetched
/// ```
///
/// Nothing here locks: callers serialize access per identity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalMirror {
    base: PathBuf,
}

impl LocalMirror {
    pub fn new(root: impl AsRef<Path>, descriptor: &RepositoryDescriptor) -> Self {
        Self { base: root.as_ref().join(descriptor.repository_identity()) }
    }

    /// The per-identity directory holding `repo`, `freed` and `download`.
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn repo(&self) -> PathBuf {
        self.base.join(REPO_DIR)
    }

    pub fn freed(&self) -> PathBuf {
        self.base.join(FREED_DIR)
    }

    /// Scratch directory for downloads, watched on its own so nothing else
    /// in the mirror counts against a download's budget.
    pub fn download(&self) -> PathBuf {
        self.base.join(DOWNLOAD_DIR)
    }

    /// Whether the checkout carries the kind-specific `marker` (such as `.git`).
    pub fn has_marker(&self, marker: &str) -> bool {
        self.repo().join(marker).is_dir()
    }

    /// Current size of the checkout in bytes.
    pub fn size(&self) -> u64 {
        directory_size(self.repo())
    }

    /// Remove the checkout, if any.
    pub fn discard(&self) -> Result<()> {
        match std::fs::remove_dir_all(self.repo()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e).or_raise(|| ErrorKind::Io),
            _ => Ok(()),
        }
    }

    /// Remove the checkout and recreate it empty.
    pub fn reset(&self) -> Result<()> {
        self.discard()?;
        std::fs::create_dir_all(self.repo()).or_raise(|| ErrorKind::Io)
    }

    /// Make sure the artifact directory exists.
    pub fn ensure_freed(&self) -> Result<PathBuf> {
        let freed = self.freed();
        std::fs::create_dir_all(&freed).or_raise(|| ErrorKind::Io)?;
        Ok(freed)
    }

    /// Empty the artifact directory, ready for a fresh build pass.
    pub fn reset_freed(&self) -> Result<PathBuf> {
        match std::fs::remove_dir_all(self.freed()) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e).or_raise(|| ErrorKind::Io),
            _ => {},
        }
        self.ensure_freed()
    }
}
