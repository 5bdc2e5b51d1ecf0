//! One-shot archive downloads.
//!
//! Nothing is incremental here: every retrieve downloads the archive again
//! and unpacks it into an empty checkout.

use crate::error::{ErrorKind, Result};
use crate::session::Session;
use exn::{OptionExt, ResultExt};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::time::Instant;
use trawl_compress::error::ErrorKind as CompressErrorKind;
use trawl_compress::{Compression, Limits};

const DOWNLOAD_NAME: &str = "archive.partial";

pub(crate) struct Archive<'a> {
    session: Session<'a>,
    fingerprint_prefix: u64,
    fingerprint: Option<String>,
}

impl<'a> Archive<'a> {
    pub(crate) fn new(session: Session<'a>, fingerprint_prefix: u64) -> Self {
        Self { session, fingerprint_prefix, fingerprint: None }
    }

    pub(crate) fn checkout(&mut self) -> Result<()> {
        let scratch = self.session.mirror.download();
        clear(&scratch)?;
        std::fs::create_dir_all(&scratch).or_raise(|| ErrorKind::Io)?;
        let download = scratch.join(DOWNLOAD_NAME);
        let mut command = self.session.command("curl");
        command
            .args(["--fail", "--silent", "--show-error", "--location", "--output"])
            .arg(&download)
            .args(self.session.exec.credential_args())
            .arg(&self.session.url)
            .current_dir(&scratch);
        let fetched = self.session.supervised(command, &scratch).and_then(|()| self.unpack(&download));
        // Whatever happened, the download itself is never kept.
        if let Err(e) = clear(&scratch) {
            tracing::warn!(error = %e, "Could not remove archive download");
        }
        fetched
    }

    pub(crate) fn revision(&self) -> Result<String> {
        self.fingerprint.clone().ok_or_raise(|| ErrorKind::IntegrityViolation("archive was never downloaded".to_string()))
    }

    /// Unpack into the checkout under the same budget the download had.
    fn unpack(&mut self, download: &Path) -> Result<()> {
        let prefix = read_prefix(download, self.fingerprint_prefix)?;
        let compression = select_compression(&self.session.url, &prefix);
        tracing::debug!(%compression, "Unpacking archive");
        let budget = self.session.budget;
        let limits = Limits {
            max_bytes: budget.max_bytes,
            deadline: budget.max_duration.map(|duration| Instant::now() + duration),
        };
        let file = File::open(download).or_raise(|| ErrorKind::Io)?;
        let unpacked = trawl_compress::unpack(BufReader::new(file), compression, &self.session.mirror.repo(), limits)
            .map_err(|e| {
                let kind = match &*e {
                    CompressErrorKind::LimitExceeded(_) => ErrorKind::BudgetExceeded {
                        command: "unpack".to_string(),
                        reason: "size budget exceeded".to_string(),
                    },
                    CompressErrorKind::DeadlineExceeded => ErrorKind::BudgetExceeded {
                        command: "unpack".to_string(),
                        reason: "time budget exceeded".to_string(),
                    },
                    CompressErrorKind::Io => ErrorKind::Io,
                    _ => ErrorKind::InvalidArchive,
                };
                e.raise(kind)
            })?;
        tracing::debug!(entries = unpacked.entries, bytes = unpacked.bytes, "Unpacked archive");
        self.fingerprint = Some(blake3::hash(&prefix).to_hex().to_string());
        Ok(())
    }
}

fn clear(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e).or_raise(|| ErrorKind::Io),
        _ => Ok(()),
    }
}

fn read_prefix(path: &Path, limit: u64) -> Result<Vec<u8>> {
    let mut prefix = Vec::new();
    File::open(path).or_raise(|| ErrorKind::Io)?.take(limit).read_to_end(&mut prefix).or_raise(|| ErrorKind::Io)?;
    Ok(prefix)
}

/// Pick the decompression filter from the URL's file name, cross-checked
/// against the content's magic bytes. The content wins when it's recognised.
fn select_compression(url: &str, prefix: &[u8]) -> Compression {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let by_name = Compression::from_path(path);
    if by_name.check_magic_bytes(prefix) {
        return by_name;
    }
    match Compression::from_magic_bytes(prefix) {
        // No usable extension; the content is all there is to go on.
        Some(sniffed) if by_name == Compression::None => sniffed,
        Some(sniffed) => {
            tracing::warn!(%by_name, %sniffed, "Archive content disagrees with its name");
            sniffed
        },
        None => {
            tracing::warn!(%by_name, "Archive content doesn't look compressed");
            by_name
        },
    }
}
