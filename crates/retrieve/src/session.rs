use crate::context::{ExecContext, Tools};
use crate::error::{Error, ErrorKind, Result};
use crate::mirror::LocalMirror;
use std::path::Path;
use std::process::Command;
use trawl_process::error::ErrorKind as ProcessErrorKind;
use trawl_process::{Budget, Outcome};

/// Everything one retriever needs to run commands against one mirror.
pub(crate) struct Session<'a> {
    pub(crate) tools: &'a Tools,
    pub(crate) budget: Budget,
    pub(crate) exec: ExecContext,
    pub(crate) mirror: LocalMirror,
    pub(crate) url: String,
    pub(crate) revision: String,
}

impl Session<'_> {
    /// A command for `program`, running inside the checkout.
    pub(crate) fn command(&self, program: &str) -> Command {
        let mut command = self.exec.command(program);
        command.current_dir(self.mirror.repo());
        command
    }

    /// Run a potentially long command under the budget, watching `watched`.
    pub(crate) fn supervised(&self, command: Command, watched: &Path) -> Result<()> {
        let what = describe(&command);
        let run = self
            .tools
            .supervisor()
            .supervise(command, watched, &self.budget)
            .map_err(|e| raise_process(e, &what))?;
        match run.outcome {
            Outcome::Success if run.exit_code == 0 => Ok(()),
            Outcome::Success => {
                let output = run.output.to_string_lossy();
                exn::bail!(ErrorKind::ToolFailed(format!(
                    "{what} exited with code {}: {}",
                    run.exit_code,
                    output.trim()
                )))
            },
            Outcome::Timeout => {
                exn::bail!(ErrorKind::BudgetExceeded { command: what, reason: "time budget exceeded".to_string() })
            },
            Outcome::SizeExceeded => {
                exn::bail!(ErrorKind::BudgetExceeded { command: what, reason: "size budget exceeded".to_string() })
            },
        }
    }

    /// Run a short query command and return its stdout.
    pub(crate) fn query(&self, command: Command) -> Result<String> {
        let what = describe(&command);
        self.tools.supervisor().run_simple(command, self.tools.probe_timeout()).map_err(|e| raise_process(e, &what))
    }
}

/// Program and subcommand; never the remaining arguments, which may carry
/// credentials.
fn describe(command: &Command) -> String {
    let program = command.get_program().to_string_lossy();
    match command.get_args().next() {
        Some(sub) => format!("{program} {}", sub.to_string_lossy()),
        None => program.into_owned(),
    }
}

fn raise_process(err: trawl_process::error::Error, what: &str) -> Error {
    let kind = match &*err {
        ProcessErrorKind::NotFound(program) => ErrorKind::ToolUnavailable(program.clone()),
        other => ErrorKind::ToolFailed(format!("{what}: {other}")),
    };
    err.raise(kind)
}
