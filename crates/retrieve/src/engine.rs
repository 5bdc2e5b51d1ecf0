use crate::archive::Archive;
use crate::context::{ExecContext, Tool, Tools};
use crate::descriptor::{RepositoryDescriptor, RepositoryKind};
use crate::error::{Disposition, ErrorKind, Result};
use crate::git::Git;
use crate::mirror::LocalMirror;
use crate::session::Session;
use crate::svn::Subversion;
use std::path::PathBuf;
use tracing::{info, instrument, warn};
use trawl_process::Budget;

/// Default number of leading archive bytes hashed into its fingerprint.
pub const DEFAULT_FINGERPRINT_PREFIX: u64 = 1024 * 1024;

/// One retriever per repository kind, dispatched exhaustively.
enum Retriever<'a> {
    Git(Git<'a>),
    Subversion(Subversion<'a>),
    Archive(Archive<'a>),
}

impl<'a> Retriever<'a> {
    fn new(kind: RepositoryKind, session: Session<'a>, fingerprint_prefix: u64) -> Result<Self> {
        Ok(match kind {
            RepositoryKind::Git => Retriever::Git(Git::new(session)),
            RepositoryKind::Subversion => Retriever::Subversion(Subversion::new(session)?),
            RepositoryKind::Archive => Retriever::Archive(Archive::new(session, fingerprint_prefix)),
        })
    }

    fn exists(&self) -> bool {
        match self {
            Retriever::Git(git) => git.exists(),
            Retriever::Subversion(svn) => svn.exists(),
            // Archives are always downloaded afresh.
            Retriever::Archive(_) => false,
        }
    }

    fn remote_differs(&mut self) -> Result<bool> {
        match self {
            Retriever::Git(git) => git.remote_differs(),
            Retriever::Subversion(svn) => svn.remote_differs(),
            Retriever::Archive(_) => Ok(true),
        }
    }

    fn update(&mut self) -> Result<()> {
        match self {
            Retriever::Git(git) => git.update(),
            Retriever::Subversion(svn) => svn.update(),
            Retriever::Archive(archive) => archive.checkout(),
        }
    }

    fn checkout(&mut self) -> Result<()> {
        match self {
            Retriever::Git(git) => git.checkout(),
            Retriever::Subversion(svn) => svn.checkout(),
            Retriever::Archive(archive) => archive.checkout(),
        }
    }

    fn revision(&self) -> Result<String> {
        match self {
            Retriever::Git(git) => git.revision(),
            Retriever::Subversion(svn) => svn.revision(),
            Retriever::Archive(archive) => archive.revision(),
        }
    }
}

enum Existing {
    Unchanged(String),
    Updated(String),
    NeedsCheckout,
}

/// Brings local mirrors up to date, incrementally where possible.
#[derive(Debug)]
pub struct Engine<'a> {
    tools: &'a Tools,
    mirror_root: PathBuf,
    budget: Budget,
    fingerprint_prefix: u64,
    notes: Vec<String>,
}

impl<'a> Engine<'a> {
    pub fn new(tools: &'a Tools, mirror_root: impl Into<PathBuf>, budget: Budget) -> Self {
        Self {
            tools,
            mirror_root: mirror_root.into(),
            budget,
            fingerprint_prefix: DEFAULT_FINGERPRINT_PREFIX,
            notes: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_fingerprint_prefix(mut self, bytes: u64) -> Self {
        self.fingerprint_prefix = bytes;
        self
    }

    /// Diagnostic notes recorded by every retrieve so far, oldest first.
    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn mirror(&self, descriptor: &RepositoryDescriptor) -> LocalMirror {
        LocalMirror::new(&self.mirror_root, descriptor)
    }

    /// Bring the mirror for `descriptor` up to date, returning whether
    /// anything on disk changed. On success the concrete revision is recorded
    /// on the descriptor.
    ///
    /// An existing mirror is updated in place when possible. Failed updates
    /// fall back to a fresh checkout, unless they failed on a budget: that
    /// error is returned as is and the mirror discarded. A failed checkout
    /// leaves no mirror behind either.
    #[instrument(skip_all, fields(kind = %descriptor.kind(), url = %descriptor.url(), revision = %descriptor.revision()))]
    pub fn retrieve(&mut self, descriptor: &mut RepositoryDescriptor) -> Result<bool> {
        self.tools.require(Tool::for_kind(descriptor.kind()))?;
        let mirror = self.mirror(descriptor);
        let session = Session {
            tools: self.tools,
            budget: self.budget,
            exec: ExecContext::for_descriptor(descriptor),
            mirror: mirror.clone(),
            url: descriptor.url().to_string(),
            revision: descriptor.revision().to_string(),
        };
        let mut retriever = Retriever::new(descriptor.kind(), session, self.fingerprint_prefix)?;

        if retriever.exists() {
            let existing = match self.reconcile(&mut retriever, &mirror) {
                Ok(existing) => existing,
                Err(e) => {
                    // A budget that stopped the update would stop a checkout
                    // too; what's left of the mirror can't be trusted.
                    if e.disposition() == Disposition::FatalBudget {
                        self.note(format!("update stopped ({e}); discarding mirror"));
                        if let Err(discard) = mirror.discard() {
                            warn!(error = %discard, "Could not remove interrupted mirror");
                        }
                    }
                    return Err(e);
                },
            };
            match existing {
                Existing::Unchanged(revision) => {
                    descriptor.resolve(revision);
                    return Ok(false);
                },
                Existing::Updated(revision) => {
                    descriptor.resolve(revision);
                    return Ok(true);
                },
                Existing::NeedsCheckout => {},
            }
        }

        mirror.reset()?;
        let checked_out = retriever.checkout().and_then(|()| retriever.revision());
        match checked_out {
            Ok(revision) => {
                self.note(format!("checked out {} at {revision}", descriptor.url()));
                descriptor.resolve(revision);
                Ok(true)
            },
            Err(e) => {
                if let Err(discard) = mirror.discard() {
                    warn!(error = %discard, "Could not remove failed checkout");
                }
                match e.disposition() {
                    Disposition::Fallback => Err(e.raise(ErrorKind::CheckoutFailed)),
                    _ => Err(e),
                }
            },
        }
    }

    /// Compare an existing mirror with the remote and update it in place
    /// when that's worth trying.
    fn reconcile(&mut self, retriever: &mut Retriever<'_>, mirror: &LocalMirror) -> Result<Existing> {
        let differs = match retriever.remote_differs() {
            Ok(differs) => differs,
            Err(e) if e.disposition() == Disposition::Fallback => {
                self.note(format!("could not compare mirror with remote ({e}); checking out afresh"));
                return Ok(Existing::NeedsCheckout);
            },
            Err(e) => return Err(e),
        };
        if !differs {
            let revision = retriever.revision()?;
            self.note(format!("mirror already at {revision}; nothing to do"));
            return Ok(Existing::Unchanged(revision));
        }
        let size = mirror.size();
        if self.budget.exceeds_bytes(size) {
            self.note(format!("mirror is {size} bytes, over the byte budget; checking out afresh"));
            return Ok(Existing::NeedsCheckout);
        }
        match retriever.update().and_then(|()| retriever.revision()) {
            Ok(revision) => {
                self.note(format!("updated mirror to {revision}"));
                Ok(Existing::Updated(revision))
            },
            Err(e) if e.disposition() == Disposition::Fallback => {
                self.note(format!("update failed ({e}); checking out afresh"));
                Ok(Existing::NeedsCheckout)
            },
            Err(e) => Err(e),
        }
    }

    fn note(&mut self, note: String) {
        info!("{note}");
        self.notes.push(note);
    }
}
