//! External command execution with bounded deadlines and captured output.
//!
//! Every invocation captures stdout and stderr fully in memory. Optional
//! sinks receive a live copy of the same bytes while the process runs, which
//! is how command output reaches the operation transcript.

use crate::error::{MachineError, Result};
use async_trait::async_trait;
use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

/// Shared duplicate-write target for command output.
pub type OutputSink = Arc<Mutex<dyn Write + Send>>;

const READ_CHUNK: usize = 8 * 1024;

/// Per-invocation options for [`run_command`].
///
/// A zero `timeout` means no deadline.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Deadline for the whole invocation (zero = unbounded).
    pub timeout: Duration,
    /// Working directory for the child.
    pub dir: Option<PathBuf>,
    /// Variables added on top of the inherited process environment.
    pub env: Vec<(String, String)>,
    /// Live copy of stdout.
    pub stdout: Option<OutputSink>,
    /// Live copy of stderr.
    pub stderr: Option<OutputSink>,
    /// Emit start and finish events through `tracing`.
    pub log: bool,
}

impl RunOptions {
    /// Options with no deadline, no sinks and command logging enabled.
    pub fn new() -> Self {
        Self {
            log: true,
            ..Default::default()
        }
    }

    /// Set the deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the child's working directory.
    pub fn dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    /// Add environment overrides.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Mirror both stdout and stderr into `sink`.
    pub fn sink(mut self, sink: Option<OutputSink>) -> Self {
        self.stdout = sink.clone();
        self.stderr = sink;
        self
    }

    /// Disable start/finish events.
    pub fn quiet(mut self) -> Self {
        self.log = false;
        self
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("timeout", &self.timeout)
            .field("dir", &self.dir)
            .field("env", &self.env)
            .field("stdout", &self.stdout.is_some())
            .field("stderr", &self.stderr.is_some())
            .field("log", &self.log)
            .finish()
    }
}

/// Outcome of one command invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    /// Normalized command line, for diagnostics only.
    pub command: String,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Exit code, -1 when the process was killed or ended by a signal.
    pub exit_code: i32,
    /// Wall-clock time from spawn to exit or deadline.
    pub duration: Duration,
    /// Whether the deadline expired.
    pub timed_out: bool,
}

/// Seam for executing external commands.
///
/// The machine controller and the orchestrators only talk to the outside
/// world through this trait, so tests can script podman's behaviour.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`.
    async fn run(&self, opts: &RunOptions, program: &Path, args: &[String]) -> Result<RunResult>;
}

/// [`CommandRunner`] backed by real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, opts: &RunOptions, program: &Path, args: &[String]) -> Result<RunResult> {
        run_command(opts, program, args).await
    }
}

/// Execute `program` with `args` under `opts`.
///
/// On timeout or non-zero exit the captured [`RunResult`] travels inside the
/// error so callers can still inspect partial output.
///
/// # Errors
/// - [`MachineError::InvalidInput`] if `program` is empty
/// - [`MachineError::LaunchFailed`] if the process cannot be spawned
/// - [`MachineError::Timeout`] if the deadline expires
/// - [`MachineError::ProcessFailed`] on a non-zero exit
pub async fn run_command<P, I, S>(opts: &RunOptions, program: P, args: I) -> Result<RunResult>
where
    P: AsRef<OsStr>,
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    if program.is_empty() {
        return Err(MachineError::InvalidInput(
            "command name is required".into(),
        ));
    }
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
    let command = command_line(program, &args);

    let mut cmd = Command::new(program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = &opts.dir {
        cmd.current_dir(dir);
    }
    cmd.envs(opts.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    if opts.log {
        tracing::info!(command = %command, "running command");
    }
    let start = Instant::now();
    let mut child = cmd.spawn().map_err(|source| {
        tracing::warn!(command = %command, error = %source, "failed to launch command");
        MachineError::LaunchFailed {
            command: command.clone(),
            source,
        }
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut out_buf = Vec::new();
    let mut err_buf = Vec::new();

    let waited: Option<std::io::Result<ExitStatus>> = {
        let io = async {
            let (out, err) = tokio::join!(
                pump(stdout, &mut out_buf, opts.stdout.as_ref()),
                pump(stderr, &mut err_buf, opts.stderr.as_ref()),
            );
            out?;
            err?;
            child.wait().await
        };
        if opts.timeout.is_zero() {
            Some(io.await)
        } else {
            tokio::time::timeout(opts.timeout, io).await.ok()
        }
    };

    let timed_out = waited.is_none();
    if timed_out {
        if let Err(e) = child.kill().await {
            tracing::warn!(command = %command, error = %e, "failed to kill timed-out command");
        }
    }
    let status = match waited {
        Some(Ok(status)) => Some(status),
        Some(Err(source)) => {
            return Err(MachineError::io(format!("wait for {command}"), source));
        }
        None => None,
    };

    let result = RunResult {
        command,
        stdout: String::from_utf8_lossy(&out_buf).into_owned(),
        stderr: String::from_utf8_lossy(&err_buf).into_owned(),
        exit_code: status.and_then(|s| s.code()).unwrap_or(-1),
        duration: start.elapsed(),
        timed_out,
    };

    if opts.log {
        tracing::info!(
            exit_code = result.exit_code,
            elapsed_ms = result.duration.as_millis() as u64,
            timed_out,
            "command finished"
        );
    }

    if timed_out {
        return Err(MachineError::Timeout {
            timeout: opts.timeout,
            result: Box::new(result),
        });
    }
    if result.exit_code != 0 {
        return Err(MachineError::ProcessFailed {
            result: Box::new(result),
        });
    }
    Ok(result)
}

/// Copy a child stream into `buf`, duplicating each chunk into `sink`.
async fn pump<R>(reader: Option<R>, buf: &mut Vec<u8>, sink: Option<&OutputSink>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(sink) = sink {
            // The guard must be released before logging: the sink may also
            // back the tracing writer.
            let written = {
                let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
                sink.write_all(&chunk[..n]).and_then(|_| sink.flush())
            };
            // A broken sink must not break capture.
            if let Err(e) = written {
                tracing::debug!(error = %e, "output sink write failed");
            }
        }
    }
}

/// Render a command line for logs. Never re-parsed.
pub fn command_line(program: &OsStr, args: &[OsString]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(OsString::as_os_str))
        .map(|part| shell_quote(&part.to_string_lossy()).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> Cow<'_, str> {
    if s.is_empty() {
        return Cow::Borrowed("\"\"");
    }
    if s.chars().any(|c| c.is_whitespace() || c == '"') {
        return Cow::Owned(format!("\"{}\"", s.replace('"', "\\\"")));
    }
    Cow::Borrowed(s)
}
