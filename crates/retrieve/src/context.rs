//! Tool capabilities and per-invocation execution context.

use crate::descriptor::{RepositoryDescriptor, RepositoryKind};
use crate::error::{ErrorKind, Result};
use regex::Regex;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::process::Command;
use std::sync::{LazyLock, OnceLock};
use std::time::Duration;
use trawl_process::Supervisor;

static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").unwrap());

/// External programs the engine drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Tool {
    Git,
    Subversion,
    Curl,
}

impl Tool {
    pub fn program(&self) -> &'static str {
        match self {
            Tool::Git => "git",
            Tool::Subversion => "svn",
            Tool::Curl => "curl",
        }
    }

    /// `svn cleanup --remove-unversioned` arrived in 1.9.
    pub fn minimum_version(&self) -> Version {
        match self {
            Tool::Git => Version(2, 0, 0),
            Tool::Subversion => Version(1, 9, 0),
            Tool::Curl => Version(0, 0, 0),
        }
    }

    fn version_args(&self) -> &'static [&'static str] {
        match self {
            Tool::Subversion => &["--version", "--quiet"],
            Tool::Git | Tool::Curl => &["--version"],
        }
    }

    pub fn for_kind(kind: RepositoryKind) -> Self {
        match kind {
            RepositoryKind::Git => Tool::Git,
            RepositoryKind::Subversion => Tool::Subversion,
            RepositoryKind::Archive => Tool::Curl,
        }
    }

    fn index(&self) -> usize {
        match self {
            Tool::Git => 0,
            Tool::Subversion => 1,
            Tool::Curl => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version(pub u32, pub u32, pub u32);

impl Version {
    /// Find the first dotted version number in a `--version` banner.
    pub fn parse(banner: &str) -> Option<Self> {
        let captures = VERSION_REGEX.captures(banner)?;
        let part = |i: usize| -> Option<u32> { captures.get(i).map_or(Some(0), |m| m.as_str().parse().ok()) };
        Some(Version(part(1)?, part(2)?, part(3)?))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// Capabilities shared by every retrieval in a run.
///
/// Each tool is probed at most once; the answer can't change while the
/// process is alive.
pub struct Tools {
    supervisor: Supervisor,
    probe_timeout: Duration,
    probes: [OnceLock<std::result::Result<Version, String>>; 3],
}

impl Debug for Tools {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Tools").field("supervisor", &self.supervisor).field("probe_timeout", &self.probe_timeout).finish()
    }
}

impl Tools {
    pub fn new(supervisor: Supervisor, probe_timeout: Duration) -> Self {
        Self { supervisor, probe_timeout, probes: Default::default() }
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// The installed version of `tool`, or why it can't be used.
    pub fn availability(&self, tool: Tool) -> std::result::Result<Version, String> {
        self.probes[tool.index()].get_or_init(|| self.probe(tool)).clone()
    }

    pub fn is_available(&self, tool: Tool) -> bool {
        self.availability(tool).is_ok()
    }

    pub fn require(&self, tool: Tool) -> Result<Version> {
        match self.availability(tool) {
            Ok(version) => Ok(version),
            Err(reason) => exn::bail!(ErrorKind::ToolUnavailable(reason)),
        }
    }

    fn probe(&self, tool: Tool) -> std::result::Result<Version, String> {
        let program = tool.program();
        let path = trawl_process::locate(program).map_err(|e| e.to_string())?;
        let mut command = Command::new(&path);
        command.args(tool.version_args()).env("LC_ALL", "C");
        let banner = self.supervisor.run_simple(command, self.probe_timeout).map_err(|e| e.to_string())?;
        let version = Version::parse(&banner).ok_or_else(|| format!("{program}: unrecognised version output"))?;
        if version < tool.minimum_version() {
            return Err(format!("{program} {version} is older than {}", tool.minimum_version()));
        }
        tracing::debug!(program, path = %path.display(), %version, "Tool available");
        Ok(version)
    }
}

/// Environment and arguments applied to every command of one retrieval.
///
/// Credentials travel here, scoped to the child processes, and never through
/// this process's own environment.
#[derive(Clone, Default)]
pub struct ExecContext {
    env: Vec<(String, String)>,
    args: Vec<String>,
}

impl Debug for ExecContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let keys: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ExecContext").field("env", &keys).field("args", &self.args.len()).finish()
    }
}

impl ExecContext {
    pub fn for_descriptor(descriptor: &RepositoryDescriptor) -> Self {
        let credentials = descriptor.credentials();
        // Tool output is parsed, so pin the locale.
        let mut context = ExecContext { env: vec![("LC_ALL".to_string(), "C".to_string())], args: Vec::new() };
        match descriptor.kind() {
            RepositoryKind::Git => {
                context.env.push(("GIT_TERMINAL_PROMPT".to_string(), "0".to_string()));
                if let Some(key) = &credentials.first {
                    let mut ssh = format!("ssh -i {} -o IdentitiesOnly=yes -o BatchMode=yes", shell_quote(key));
                    if let Some(known_hosts) = &credentials.second {
                        ssh.push_str(&format!(
                            " -o UserKnownHostsFile={} -o StrictHostKeyChecking=yes",
                            shell_quote(known_hosts)
                        ));
                    }
                    context.env.push(("GIT_SSH_COMMAND".to_string(), ssh));
                }
            },
            RepositoryKind::Subversion => {
                context.args.push("--non-interactive".to_string());
                if let Some(username) = &credentials.first {
                    context.args.extend(["--username".to_string(), username.clone()]);
                }
                if let Some(password) = &credentials.second {
                    context.args.extend(["--password".to_string(), password.clone(), "--no-auth-cache".to_string()]);
                }
            },
            RepositoryKind::Archive => {
                if let Some(username) = &credentials.first {
                    let user = match &credentials.second {
                        Some(password) => format!("{username}:{password}"),
                        None => username.clone(),
                    };
                    context.args.extend(["--user".to_string(), user]);
                }
            },
        }
        context
    }

    /// A command for `program` carrying this context's environment.
    pub fn command(&self, program: &str) -> Command {
        let mut command = Command::new(program);
        command.envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        command
    }

    /// Credential arguments for tools that take them on the command line.
    pub fn credential_args(&self) -> &[String] {
        &self.args
    }
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("git version 2.43.0", Some(Version(2, 43, 0)))]
    #[case("git version 2.39.3 (Apple Git-146)", Some(Version(2, 39, 3)))]
    #[case("1.14.2\n", Some(Version(1, 14, 2)))]
    #[case("curl 8.5.0 (x86_64-pc-linux-gnu) libcurl/8.5.0", Some(Version(8, 5, 0)))]
    #[case("svn, version 1.8", Some(Version(1, 8, 0)))]
    #[case("no digits here", None)]
    fn test_version_parse(#[case] banner: &str, #[case] expected: Option<Version>) {
        assert_eq!(Version::parse(banner), expected);
    }

    #[test]
    fn minimum_versions_order() {
        assert!(Version(1, 8, 17) < Tool::Subversion.minimum_version());
        assert!(Version(1, 14, 0) >= Tool::Subversion.minimum_version());
        assert!(Version(1, 9, 9) < Tool::Git.minimum_version());
    }

    fn env_of(command: &Command, key: &str) -> Option<String> {
        command
            .get_envs()
            .find(|(k, _)| *k == key)
            .and_then(|(_, v)| v)
            .map(|v| v.to_string_lossy().into_owned())
    }

    #[test]
    fn git_credentials_become_ssh_command() {
        let descriptor = RepositoryDescriptor::new(RepositoryKind::Git, "git@example.com:x.git", "")
            .with_credentials(Some("/keys/deploy key".into()), Some("/keys/known_hosts".into()));
        let context = ExecContext::for_descriptor(&descriptor);
        let command = context.command("git");
        let ssh = env_of(&command, "GIT_SSH_COMMAND").unwrap();
        assert!(ssh.contains("-i '/keys/deploy key'"));
        assert!(ssh.contains("UserKnownHostsFile='/keys/known_hosts'"));
        assert_eq!(env_of(&command, "GIT_TERMINAL_PROMPT").as_deref(), Some("0"));
        assert!(context.credential_args().is_empty());
    }

    #[test]
    fn git_without_credentials_uses_default_ssh() {
        let context = ExecContext::for_descriptor(&RepositoryDescriptor::new(RepositoryKind::Git, "x", ""));
        assert_eq!(env_of(&context.command("git"), "GIT_SSH_COMMAND"), None);
    }

    #[test]
    fn svn_credentials_become_arguments() {
        let descriptor = RepositoryDescriptor::new(RepositoryKind::Subversion, "https://svn.example.com/r", "")
            .with_credentials(Some("alice".into()), Some("hunter2".into()));
        let context = ExecContext::for_descriptor(&descriptor);
        assert_eq!(
            context.credential_args(),
            ["--non-interactive", "--username", "alice", "--password", "hunter2", "--no-auth-cache"]
        );
        assert!(!format!("{context:?}").contains("hunter2"));
    }

    #[test]
    fn archive_credentials_become_curl_user() {
        let descriptor = RepositoryDescriptor::new(RepositoryKind::Archive, "https://example.com/a.tgz", "")
            .with_credentials(Some("alice".into()), Some("hunter2".into()));
        assert_eq!(ExecContext::for_descriptor(&descriptor).credential_args(), ["--user", "alice:hunter2"]);
    }

    #[test]
    fn shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn availability_is_memoised() {
        let tools = Tools::new(Supervisor::new(), Duration::from_secs(10));
        let first = tools.availability(Tool::Git);
        let second = tools.availability(Tool::Git);
        assert_eq!(first, second);
        if which::which("git").is_err() {
            assert!(matches!(*tools.require(Tool::Git).unwrap_err(), ErrorKind::ToolUnavailable(_)));
        }
    }
}
