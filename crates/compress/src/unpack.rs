//! Bounded Tarball Unpacking

use crate::Compression;
use crate::error::{ErrorKind, Result};
use exn::{ResultExt, bail};
use std::io::{self, Read};
use std::path::{Component, Path};
use std::time::Instant;
use tar::EntryType;
use tracing::{debug, instrument};

/// Statistics about a completed unpack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Unpacked {
    /// Number of archive entries written to the destination.
    pub entries: usize,
    /// Sum of the declared sizes of every entry written.
    pub bytes: u64,
}

/// How far an unpack may go before it's abandoned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Limits {
    /// Ceiling on the running total of entry sizes.
    pub max_bytes: Option<u64>,
    /// Moment after which no more data is decompressed.
    pub deadline: Option<Instant>,
}

impl Limits {
    #[must_use]
    pub fn unlimited() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Refuses to hand out any more data once the deadline has passed, so a
/// single huge entry can't outlive it.
struct Deadline<R> {
    inner: R,
    limits: Limits,
}

impl<R: Read> Read for Deadline<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.limits.expired() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "unpack deadline passed"));
        }
        self.inner.read(buf)
    }
}

/// Unpack a (possibly compressed) tar stream into `destination`.
///
/// Entries with absolute paths or `..` components are refused with
/// [`ErrorKind::UnsafeEntry`]. Unpacking stops with
/// [`ErrorKind::LimitExceeded`] as soon as the running total of entry sizes
/// would exceed `limits.max_bytes`, and with [`ErrorKind::DeadlineExceeded`]
/// once `limits.deadline` has passed. Entries written before that point are
/// left in place for the caller to clean up.
///
/// Archive permissions are not trusted: directories end up `0755`, files
/// `0755` or `0644` depending on whether any execute bit was set.
#[instrument(skip(reader, limits), fields(compression = %compression, destination = %destination.display()))]
pub fn unpack<R: Read>(reader: R, compression: Compression, destination: &Path, limits: Limits) -> Result<Unpacked> {
    std::fs::create_dir_all(destination).or_raise(|| ErrorKind::Io)?;
    let stream = Deadline { inner: compression.wrap_reader(reader)?, limits };
    let mut archive = tar::Archive::new(stream);
    archive.set_preserve_permissions(false);
    archive.set_overwrite(true);
    let failed = |kind: ErrorKind| if limits.expired() { ErrorKind::DeadlineExceeded } else { kind };

    let mut unpacked = Unpacked::default();
    for entry in archive.entries().or_raise(|| failed(ErrorKind::InvalidData))? {
        if limits.expired() {
            bail!(ErrorKind::DeadlineExceeded);
        }
        let mut entry = entry.or_raise(|| failed(ErrorKind::InvalidData))?;
        let path = entry.path().or_raise(|| ErrorKind::InvalidData)?.into_owned();
        if !is_contained(&path) {
            bail!(ErrorKind::UnsafeEntry(path));
        }
        let total = unpacked.bytes.saturating_add(entry.size());
        if let Some(limit) = limits.max_bytes
            && total > limit
        {
            bail!(ErrorKind::LimitExceeded(limit));
        }
        let entry_type = entry.header().entry_type();
        let mode = entry.header().mode().unwrap_or(0o644);
        // `unpack_in` also refuses to follow symlinks out of the destination.
        if !entry.unpack_in(destination).or_raise(|| failed(ErrorKind::Io))? {
            bail!(ErrorKind::UnsafeEntry(path));
        }
        sanitize_permissions(&destination.join(&path), entry_type, mode).or_raise(|| ErrorKind::Io)?;
        unpacked.bytes = total;
        unpacked.entries += 1;
    }
    debug!(entries = unpacked.entries, bytes = unpacked.bytes, "unpacked archive");
    Ok(unpacked)
}

fn is_contained(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Setuid/setgid bits and read-only directories from the archive would
/// outlive it in the mirror; neither survives.
#[cfg(unix)]
fn sanitize_permissions(path: &Path, entry_type: EntryType, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let sane = match entry_type {
        EntryType::Directory => 0o755,
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse if mode & 0o111 != 0 => 0o755,
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => 0o644,
        // Links share their target's mode; setting it would follow them.
        _ => return Ok(()),
    };
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(sane))
}

#[cfg(not(unix))]
fn sanitize_permissions(_path: &Path, _entry_type: EntryType, _mode: u32) -> io::Result<()> {
    Ok(())
}
