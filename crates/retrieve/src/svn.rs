//! Subversion mirrors.

use crate::error::{ErrorKind, Result};
use crate::session::Session;
use exn::OptionExt;
use std::process::Command;

const MARKER: &str = ".svn";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Revision {
    Head,
    Number(u64),
}

impl Revision {
    fn parse(requested: &str) -> Result<Self> {
        let requested = requested.trim();
        if requested.is_empty() || requested.eq_ignore_ascii_case("latest") || requested.eq_ignore_ascii_case("head") {
            return Ok(Revision::Head);
        }
        requested
            .trim_start_matches(['r', 'R'])
            .parse()
            .ok()
            .map(Revision::Number)
            .ok_or_raise(|| ErrorKind::InvalidRevision(requested.to_string()))
    }

    fn as_arg(&self) -> String {
        match self {
            Revision::Head => "HEAD".to_string(),
            Revision::Number(n) => n.to_string(),
        }
    }
}

pub(crate) struct Subversion<'a> {
    session: Session<'a>,
    revision: Revision,
}

impl<'a> Subversion<'a> {
    pub(crate) fn new(session: Session<'a>) -> Result<Self> {
        let revision = Revision::parse(&session.revision)?;
        Ok(Self { session, revision })
    }

    pub(crate) fn exists(&self) -> bool {
        self.session.mirror.has_marker(MARKER)
    }

    pub(crate) fn remote_differs(&self) -> Result<bool> {
        let range = format!("{}:0", self.revision.as_arg());
        let url = self.session.url.clone();
        let remote = parse_log(&self.query("log", &["-l", "1", "-q", "-r", &range, &url])?);
        if remote.is_none() || remote != self.last_change()? {
            return Ok(true);
        }
        let status = self.query("status", &["--no-ignore", "--ignore-externals"])?;
        Ok(status.lines().any(is_local_change))
    }

    pub(crate) fn update(&self) -> Result<()> {
        self.run("revert", &["--recursive", "."])?;
        self.run("update", &["--force", "-r", &self.revision.as_arg(), "."])?;
        self.run("cleanup", &["--remove-unversioned", "--remove-ignored", "--include-externals", "."])
    }

    pub(crate) fn checkout(&self) -> Result<()> {
        let url = self.session.url.clone();
        self.run("checkout", &["--force", "-r", &self.revision.as_arg(), &url, "."])
    }

    /// The revision the working copy's last change was made in.
    pub(crate) fn revision(&self) -> Result<String> {
        self.last_change()?.ok_or_raise(|| ErrorKind::IntegrityViolation("working copy has no log entry".to_string()))
    }

    fn last_change(&self) -> Result<Option<String>> {
        Ok(parse_log(&self.query("log", &["-l", "1", "-q"])?))
    }

    fn svn(&self, subcommand: &str, args: &[&str]) -> Command {
        let mut command = self.session.command("svn");
        command.arg(subcommand).args(self.session.exec.credential_args()).args(args);
        command
    }

    fn run(&self, subcommand: &str, args: &[&str]) -> Result<()> {
        self.session.supervised(self.svn(subcommand, args), &self.session.mirror.repo())
    }

    fn query(&self, subcommand: &str, args: &[&str]) -> Result<String> {
        self.session.query(self.svn(subcommand, args))
    }
}

/// The revision number of the first entry of `svn log -q` output
/// (`r1234 | author | date`).
fn parse_log(log: &str) -> Option<String> {
    log.lines().find_map(|line| {
        let (revision, _) = line.split_once(" | ")?;
        let number = revision.strip_prefix('r')?;
        number.chars().all(|c| c.is_ascii_digit()).then(|| number.to_string())
    })
}

/// A `svn status` line describing a local modification (externals excluded).
fn is_local_change(line: &str) -> bool {
    match line.chars().next() {
        None | Some('X') => false,
        Some(_) => !line.starts_with("Performing status on external"),
    }
}
