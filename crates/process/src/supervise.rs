//! Budgeted supervision of external processes.

use crate::budget::Budget;
use crate::error::{ErrorKind, Result};
use crate::output::{CapturedOutput, SharedOutput};
use crate::size::directory_size;
use exn::ResultExt;
use std::io;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{Receiver, channel};
use std::time::{Duration, Instant};
use tracing::instrument;

/// How often budgets are re-evaluated while a process runs.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default amount of output retained for diagnostics.
pub const DEFAULT_OUTPUT_CAP: usize = 64 * 1024;
/// Default limit on the stdout of a short query, which is parsed rather than
/// merely reported.
pub const DEFAULT_QUERY_CAP: usize = 16 * 1024 * 1024;
// Granularity of exit detection between budget ticks, so that short-lived
// commands don't pay for a full poll interval.
const EXIT_CHECK_INTERVAL: Duration = Duration::from_millis(20);
// How long an interrupted process group gets before the whole group is
// killed, and how long reader threads get to hit EOF afterwards.
const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// How a supervised run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The process exited by itself (whatever its exit code).
    Success,
    /// The time budget ran out and the process was terminated.
    Timeout,
    /// The watched directory outgrew the byte budget and the process was terminated.
    SizeExceeded,
}

impl Outcome {
    /// Whether this outcome is a budget violation.
    pub fn is_budget_violation(&self) -> bool {
        !matches!(self, Outcome::Success)
    }
}

/// The immutable record of one supervised invocation.
#[derive(Clone, Debug)]
pub struct Supervision {
    pub outcome: Outcome,
    /// Exit code of the process; `-1` if it was killed or died by signal.
    pub exit_code: i32,
    pub output: CapturedOutput,
    pub elapsed: Duration,
}

impl Supervision {
    /// The process finished on its own and reported success.
    pub fn succeeded(&self) -> bool {
        self.outcome == Outcome::Success && self.exit_code == 0
    }
}

/// Runs commands while watching a directory's size and the wall clock.
///
/// The supervisor itself is stateless between invocations; construct one
/// and reuse it for every command of a retrieval.
#[derive(Clone, Debug)]
pub struct Supervisor {
    poll_interval: Duration,
    output_cap: Option<usize>,
    query_cap: usize,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            output_cap: Some(DEFAULT_OUTPUT_CAP),
            query_cap: DEFAULT_QUERY_CAP,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Limit retained output to `cap` bytes (`None` keeps everything).
    #[must_use]
    pub fn with_output_cap(mut self, cap: Option<usize>) -> Self {
        self.output_cap = cap;
        self
    }

    /// Limit the stdout [`run_simple`](Self::run_simple) accepts to `cap` bytes.
    #[must_use]
    pub fn with_query_cap(mut self, cap: usize) -> Self {
        self.query_cap = cap;
        self
    }

    /// Keep the full output of every command. Only meant for diagnosing a
    /// misbehaving tool: output is held in memory.
    #[must_use]
    pub fn diagnostic(self) -> Self {
        self.with_output_cap(None)
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run `command` to completion or until `budget` is exhausted.
    ///
    /// Every poll interval the supervisor checks, in order: whether the
    /// process has exited; the cumulative size of `watched` (only if a byte
    /// limit is set); the elapsed time (only if a time limit is set). If a
    /// process is observed to have exited on the same tick a budget trips,
    /// the run counts as [`Outcome::Success`].
    ///
    /// Budget violations are reported in the returned [`Supervision`], not as
    /// errors. Errors are reserved for failing to start or wait on the process.
    #[instrument(skip_all, fields(program = %program_name(&command), watched = %watched.display()))]
    pub fn supervise(&self, command: Command, watched: &Path, budget: &Budget) -> Result<Supervision> {
        self.run(command, Some(watched), budget)
    }

    /// Run a short auxiliary command (version probes, ref listings, ...)
    /// with no directory watching and no size limit, returning its stdout.
    ///
    /// # Errors
    /// - [`ErrorKind::Timeout`] if it runs longer than `timeout`.
    /// - [`ErrorKind::NonZeroExit`] if it exits unsuccessfully; the error
    ///   carries stderr (or stdout, if stderr was empty).
    /// - [`ErrorKind::OutputTooLarge`] if stdout outgrows the query cap.
    pub fn run_simple(&self, mut command: Command, timeout: Duration) -> Result<String> {
        let program = program_name(&command);
        let stdout = SharedOutput::new(Some(self.query_cap));
        let stderr = SharedOutput::new(self.output_cap);
        let simple = Supervisor { poll_interval: EXIT_CHECK_INTERVAL, ..self.clone() };
        let budget = Budget::unlimited().with_max_duration(timeout);
        let run = simple.run_with(&mut command, None, &budget, &stdout, &stderr)?;
        let captured = stdout.snapshot();
        if captured.is_truncated() {
            exn::bail!(ErrorKind::OutputTooLarge { program, cap: self.query_cap });
        }
        let stdout = String::from_utf8_lossy(captured.as_bytes()).into_owned();
        match run.outcome {
            Outcome::Success if run.exit_code == 0 => Ok(stdout),
            Outcome::Success => {
                let stderr = stderr.snapshot().to_string_lossy();
                let output = if stderr.trim().is_empty() { stdout } else { stderr };
                exn::bail!(ErrorKind::NonZeroExit { program, code: run.exit_code, output: output.trim().to_string() })
            },
            Outcome::Timeout | Outcome::SizeExceeded => {
                exn::bail!(ErrorKind::Timeout { program, seconds: timeout.as_secs() })
            },
        }
    }

    fn run(&self, mut command: Command, watched: Option<&Path>, budget: &Budget) -> Result<Supervision> {
        let output = SharedOutput::new(self.output_cap);
        self.run_with(&mut command, watched, budget, &output, &output)
    }

    fn run_with(
        &self,
        command: &mut Command,
        watched: Option<&Path>,
        budget: &Budget,
        stdout: &SharedOutput,
        stderr: &SharedOutput,
    ) -> Result<Supervision> {
        let program = program_name(command);
        let (mut child, readers) = spawn(command, &program, stdout, stderr)?;
        let started = Instant::now();
        tracing::debug!(program = %program, pid = child.id(), "Spawned supervised process");

        // The exit status is recorded exactly once: the first time it's seen.
        let mut exit: Option<ExitStatus> = None;
        let outcome = loop {
            if let Some(status) = wait_for_exit(&mut child, self.poll_interval)? {
                exit = Some(status);
                break Outcome::Success;
            }
            let tripped = match watched {
                Some(dir) if budget.max_bytes.is_some() && budget.exceeds_bytes(directory_size(dir)) => {
                    Some(Outcome::SizeExceeded)
                },
                _ if budget.exceeds_duration(started.elapsed()) => Some(Outcome::Timeout),
                _ => None,
            };
            if let Some(tripped) = tripped {
                // Completion observed on the same tick wins over the budget.
                if let Some(status) = child.try_wait().or_raise(|| ErrorKind::Io)? {
                    exit = Some(status);
                    break Outcome::Success;
                }
                break tripped;
            }
        };

        let exit_code = match (outcome, exit) {
            (Outcome::Success, Some(status)) => status.code().unwrap_or(-1),
            _ => {
                tracing::warn!(
                    program = %program,
                    outcome = ?outcome,
                    elapsed = ?started.elapsed(),
                    "Budget exceeded; terminating process group"
                );
                terminate(&mut child)?;
                -1
            },
        };
        await_readers(&readers, 2, TERMINATION_GRACE);

        Ok(Supervision { outcome, exit_code, output: stdout.snapshot(), elapsed: started.elapsed() })
    }
}

pub(crate) fn program_name(command: &Command) -> String {
    command.get_program().to_string_lossy().into_owned()
}

fn spawn(
    command: &mut Command,
    program: &str,
    stdout: &SharedOutput,
    stderr: &SharedOutput,
) -> Result<(Child, Receiver<()>)> {
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Own process group, so termination reaches grandchildren too.
        command.process_group(0);
    }
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == io::ErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(program.to_string())),
        Err(e) => return Err(e).or_raise(|| ErrorKind::Spawn(program.to_string())),
    };
    let (done, readers) = channel();
    match (child.stdout.take(), child.stderr.take()) {
        (Some(out), Some(err)) => {
            stdout.drain(out, done.clone());
            stderr.drain(err, done);
        },
        _ => {
            let _ = child.kill();
            let _ = child.wait();
            exn::bail!(ErrorKind::Spawn(program.to_string()));
        },
    }
    Ok((child, readers))
}

/// Wait up to `limit` for the child to exit, checking frequently.
fn wait_for_exit(child: &mut Child, limit: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Instant::now() + limit;
    loop {
        if let Some(status) = child.try_wait().or_raise(|| ErrorKind::Io)? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        std::thread::sleep(EXIT_CHECK_INTERVAL.min(deadline - now));
    }
}

/// Interrupt the child's process group, then kill the whole group if the
/// leader hasn't gone away within the grace period. Never blocks indefinitely.
fn terminate(child: &mut Child) -> Result<()> {
    signal_group(child, "INT");
    if wait_for_exit(child, TERMINATION_GRACE)?.is_some() {
        // The leader is gone; anything it left behind in the group goes too.
        signal_group(child, "KILL");
        return Ok(());
    }
    tracing::debug!(pid = child.id(), "Process ignored interrupt; killing process group");
    signal_group(child, "KILL");
    // Fails only if the process already exited, which is what we want anyway.
    let _ = child.kill();
    child.wait().or_raise(|| ErrorKind::Io)?;
    Ok(())
}

#[cfg(unix)]
fn signal_group(child: &Child, signal: &str) {
    let group = format!("-{}", child.id());
    let signalled = Command::new("kill")
        .args(["-s", signal, "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok_and(|s| s.success());
    if !signalled {
        tracing::debug!(pid = child.id(), signal, "Could not signal process group");
    }
}

#[cfg(not(unix))]
fn signal_group(_child: &Child, _signal: &str) {}

fn await_readers(readers: &Receiver<()>, count: usize, grace: Duration) {
    let deadline = Instant::now() + grace;
    for _ in 0..count {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if readers.recv_timeout(remaining).is_err() {
            // Something (a grandchild, usually) still holds the pipe open.
            // Report what we have rather than wait for it.
            tracing::debug!("Output reader did not finish within grace period");
            return;
        }
    }
}
