use crate::error::{Error, ErrorKind};
use exn::OptionExt;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// The closed set of repository kinds the engine knows how to retrieve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RepositoryKind {
    Git,
    Subversion,
    /// A one-shot tarball download (`.tar`, `.tar.gz`, `.tgz`, ...).
    Archive,
}

// Every accepted tag, including aliases.
const KINDS: &[(&str, RepositoryKind)] = &[
    ("git", RepositoryKind::Git),
    ("svn", RepositoryKind::Subversion),
    ("subversion", RepositoryKind::Subversion),
    ("archive", RepositoryKind::Archive),
    ("tarball", RepositoryKind::Archive),
];

impl RepositoryKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Subversion => "svn",
            Self::Archive => "archive",
        }
    }
}

impl FromStr for RepositoryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        KINDS
            .iter()
            .find(|(name, _)| *name == tag)
            .map(|(_, kind)| *kind)
            .ok_or_raise(|| ErrorKind::UnknownKind(s.to_string()))
    }
}

impl Display for RepositoryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// Up to two opaque secrets. What they mean depends on the kind: an SSH key
/// and known-hosts file for git, a username and password otherwise.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub first: Option<String>,
    pub second: Option<String>,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("Credentials").field("first", &redact(&self.first)).field("second", &redact(&self.second)).finish()
    }
}

/// What to retrieve, and (after a successful retrieve) what was retrieved.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RepositoryDescriptor {
    kind: RepositoryKind,
    url: String,
    revision: String,
    credentials: Credentials,
    resolved: Option<String>,
}

impl RepositoryDescriptor {
    /// An empty `revision` means the repository's default.
    pub fn new(kind: RepositoryKind, url: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            revision: revision.into(),
            credentials: Credentials::default(),
            resolved: None,
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, first: Option<String>, second: Option<String>) -> Self {
        self.credentials = Credentials { first, second };
        self
    }

    pub fn kind(&self) -> RepositoryKind {
        self.kind
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The revision as requested by the caller.
    pub fn revision(&self) -> &str {
        &self.revision
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The concrete revision recorded by the last successful retrieve.
    pub fn resolved_revision(&self) -> Option<&str> {
        self.resolved.as_deref()
    }

    pub(crate) fn resolve(&mut self, revision: String) {
        self.resolved = Some(revision);
    }

    /// Stable across revisions; names the mirror directory.
    pub fn repository_identity(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.url.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Varies with the (resolved, if known) revision; suitable as a cache key.
    pub fn checkout_identity(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.kind.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.url.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.resolved.as_deref().unwrap_or(&self.revision).as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}
