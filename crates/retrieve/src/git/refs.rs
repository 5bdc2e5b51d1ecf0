//! Classification of a requested revision against the local ref listing.

use crate::error::{ErrorKind, Result};
use std::collections::BTreeSet;

const TAG_PREFIX: &str = "refs/tags/";
const REMOTE_PREFIX: &str = "refs/remotes/origin/";
const LOCAL_PREFIX: &str = "refs/heads/";

/// The names found in a `git for-each-ref --format=%(refname)` listing.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Refs {
    tags: BTreeSet<String>,
    remote_branches: BTreeSet<String>,
    local_branches: BTreeSet<String>,
}

impl Refs {
    pub(crate) fn parse(listing: &str) -> Self {
        let mut refs = Refs::default();
        for line in listing.lines().map(str::trim) {
            if let Some(tag) = line.strip_prefix(TAG_PREFIX) {
                refs.tags.insert(tag.to_string());
            } else if let Some(branch) = line.strip_prefix(REMOTE_PREFIX) {
                if branch != "HEAD" {
                    refs.remote_branches.insert(branch.to_string());
                }
            } else if let Some(branch) = line.strip_prefix(LOCAL_PREFIX) {
                refs.local_branches.insert(branch.to_string());
            }
        }
        refs
    }

    pub(crate) fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(String::as_str)
    }
}

/// What a revision should be checked out as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Reference {
    Tag(String),
    /// Check out, then hard-reset to `origin/<name>`.
    RemoteBranch(String),
    /// Anything else, most likely a (partial) commit id.
    Opaque(String),
}

impl Reference {
    /// A revision expression peeling to the target commit.
    pub(crate) fn commit_expression(&self) -> String {
        match self {
            Reference::Tag(name) => format!("{TAG_PREFIX}{name}^{{commit}}"),
            Reference::RemoteBranch(name) => format!("{REMOTE_PREFIX}{name}^{{commit}}"),
            Reference::Opaque(rev) => format!("{rev}^{{commit}}"),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Classification {
    Ready(Reference),
    /// The name is a tag, shadowed by a local branch that no longer exists
    /// upstream. Deleting the branch makes it a plain tag.
    StaleLocalBranch(String),
}

pub(crate) fn classify(refs: &Refs, name: &str, default_branch: &str) -> Result<Classification> {
    let tag = refs.tags.contains(name);
    let remote = refs.remote_branches.contains(name);
    let local = refs.local_branches.contains(name);
    match (tag, remote, local) {
        (true, true, _) => exn::bail!(ErrorKind::AmbiguousReference(name.to_string())),
        (true, false, true) if name == default_branch => {
            exn::bail!(ErrorKind::IrrecoverableReference(name.to_string()))
        },
        (true, false, true) => Ok(Classification::StaleLocalBranch(name.to_string())),
        (false, false, true) => exn::bail!(ErrorKind::MissingRemoteBranch(name.to_string())),
        (_, true, _) => Ok(Classification::Ready(Reference::RemoteBranch(name.to_string()))),
        (true, false, false) => Ok(Classification::Ready(Reference::Tag(name.to_string()))),
        (false, false, false) => Ok(Classification::Ready(Reference::Opaque(name.to_string()))),
    }
}
