//! Git mirrors.

mod refs;

use self::refs::{Classification, Reference, Refs, classify};
use crate::error::{ErrorKind, Result};
use crate::session::Session;
use exn::OptionExt;
use std::process::Command;
use tracing::{debug, warn};

const MARKER: &str = ".git";
const ORIGIN_HEAD: &str = "refs/remotes/origin/HEAD";

/// Where a retrieve is headed, and what has to be cleared out of the way
/// before getting there.
struct Target {
    reference: Reference,
    default_branch: String,
    /// A local branch shadowing the wanted tag, deleted before switching.
    stale_branch: Option<String>,
}

pub(crate) struct Git<'a> {
    session: Session<'a>,
    fetched: bool,
    target: Option<Target>,
}

impl<'a> Git<'a> {
    pub(crate) fn new(session: Session<'a>) -> Self {
        Self { session, fetched: false, target: None }
    }

    pub(crate) fn exists(&self) -> bool {
        self.session.mirror.has_marker(MARKER)
    }

    /// Only reads: refs are fetched, but the working tree and local
    /// branches are left exactly as they are.
    pub(crate) fn remote_differs(&mut self) -> Result<bool> {
        self.fetch()?;
        let target = self.resolve_target()?;
        let stale = target.stale_branch.is_some();
        let wanted = self.commit_of(&target.reference);
        self.target = Some(target);
        if stale {
            // Only an update can get rid of it.
            return Ok(true);
        }
        let Some(wanted) = wanted else {
            // Unknown to git; the checkout will report it.
            return Ok(true);
        };
        if self.head()? != wanted {
            return Ok(true);
        }
        self.is_dirty()
    }

    pub(crate) fn update(&mut self) -> Result<()> {
        self.fetch()?;
        let target = match self.target.take() {
            Some(target) => target,
            None => self.resolve_target()?,
        };
        self.advance(&target)
    }

    pub(crate) fn checkout(&mut self) -> Result<()> {
        let url = self.session.url.clone();
        self.run(&["clone", "--no-checkout", "--", &url, "."])?;
        // A fresh clone already carries every branch and tag.
        self.fetched = true;
        let target = self.resolve_target()?;
        self.advance(&target)
    }

    pub(crate) fn revision(&self) -> Result<String> {
        self.head()
    }

    fn git(&self, args: &[&str]) -> Command {
        let mut command = self.session.command("git");
        command.args(args);
        command
    }

    fn run(&self, args: &[&str]) -> Result<()> {
        self.session.supervised(self.git(args), &self.session.mirror.repo())
    }

    fn query(&self, args: &[&str]) -> Result<String> {
        self.session.query(self.git(args))
    }

    /// Refresh remote-tracking refs, once per retrieve. Local tags are
    /// dropped first so tags deleted upstream disappear here too.
    fn fetch(&mut self) -> Result<()> {
        if self.fetched {
            return Ok(());
        }
        let refs = Refs::parse(&self.query(&["for-each-ref", "--format=%(refname)", "refs/tags"])?);
        let tags: Vec<&str> = refs.tags().collect();
        if !tags.is_empty() {
            let mut args = vec!["tag", "-d"];
            args.extend(tags);
            self.query(&args)?;
        }
        self.run(&["fetch", "--force", "--prune", "--tags", "origin", "+refs/heads/*:refs/remotes/origin/*"])?;
        self.fetched = true;
        Ok(())
    }

    fn default_branch(&self) -> Result<String> {
        let head = match self.query(&["symbolic-ref", "--quiet", ORIGIN_HEAD]) {
            Ok(head) => head,
            Err(_) => {
                debug!("origin/HEAD missing; asking the remote");
                self.run(&["remote", "set-head", "origin", "--auto"])?;
                self.query(&["symbolic-ref", "--quiet", ORIGIN_HEAD])?
            },
        };
        let head = head.trim();
        head.strip_prefix("refs/remotes/origin/")
            .map(str::to_string)
            .ok_or_raise(|| ErrorKind::ToolFailed(format!("unexpected origin HEAD: {head}")))
    }

    fn resolve_target(&self) -> Result<Target> {
        let default_branch = self.default_branch()?;
        if self.session.revision.is_empty() {
            let reference = Reference::RemoteBranch(default_branch.clone());
            return Ok(Target { reference, default_branch, stale_branch: None });
        }
        let refs = Refs::parse(&self.query(&["for-each-ref", "--format=%(refname)"])?);
        Ok(match classify(&refs, &self.session.revision, &default_branch)? {
            Classification::Ready(reference) => Target { reference, default_branch, stale_branch: None },
            Classification::StaleLocalBranch(name) => {
                Target { reference: Reference::Tag(name.clone()), default_branch, stale_branch: Some(name) }
            },
        })
    }

    /// Clear any stale branch, switch to the target and tidy up.
    fn advance(&self, target: &Target) -> Result<()> {
        if let Some(name) = &target.stale_branch {
            warn!(branch = %name, "Deleting obsolete local branch that shadows a tag");
            let upstream = format!("refs/remotes/origin/{}", target.default_branch);
            self.run(&["checkout", "--force", "-B", &target.default_branch, &upstream])?;
            self.run(&["branch", "-D", name])?;
        }
        self.switch_to(&target.reference)?;
        self.tidy()
    }

    fn commit_of(&self, reference: &Reference) -> Option<String> {
        let expression = reference.commit_expression();
        self.query(&["rev-parse", "--verify", "--quiet", &expression]).ok().map(|s| s.trim().to_string())
    }

    fn head(&self) -> Result<String> {
        let head = self.query(&["rev-parse", "--verify", "HEAD"])?;
        Ok(head.trim().to_string())
    }

    /// Modified, untracked or ignored files all count.
    fn is_dirty(&self) -> Result<bool> {
        let status = self.query(&["status", "--porcelain", "--ignored", "--untracked-files=all"])?;
        Ok(!status.trim().is_empty())
    }

    fn switch_to(&self, reference: &Reference) -> Result<()> {
        match reference {
            Reference::RemoteBranch(name) => {
                let upstream = format!("refs/remotes/origin/{name}");
                self.run(&["checkout", "--force", "-B", name, &upstream])?;
                // Discard local-only commits.
                self.run(&["reset", "--hard", &upstream])
            },
            Reference::Tag(_) | Reference::Opaque(_) => {
                self.run(&["checkout", "--force", "--detach", &reference.commit_expression()])
            },
        }
    }

    /// Bring submodules in line and drop anything untracked or ignored, so the
    /// tree depends on nothing but the resolved revision.
    fn tidy(&self) -> Result<()> {
        self.run(&["submodule", "sync", "--recursive"])?;
        self.run(&["submodule", "update", "--init", "--recursive", "--force"])?;
        self.run(&["clean", "-ffdx"])?;
        self.run(&["submodule", "foreach", "--recursive", "git clean -ffdx"])
    }
}
