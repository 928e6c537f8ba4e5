//! Process helpers for invoking Bazel.
//!
//! Bazel can be extremely chatty on both stdout and stderr. Each invocation drains the two
//! streams on independent reader threads so neither OS pipe buffer can stall the child, caps the
//! number of bytes kept per stream, and supports a wall-clock timeout (or an explicit infinite
//! sentinel for long-running builds).
//!
//! Cancellation is cooperative: a cancelled token prevents a command from being spawned, but an
//! invocation that has already started runs to completion or until its timeout fires.

use std::{
    fmt,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};

pub use tokio_util::sync::CancellationToken;

/// Captured stdout/stderr from a command, truncated to a maximum size.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoundedOutput {
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream had more bytes than were captured, or a reader did not finish
    /// within the join deadline.
    pub truncated: bool,
}

impl BoundedOutput {
    /// Combine stdout/stderr into a single string (stdout first).
    pub fn combined(&self) -> String {
        let mut s = String::new();
        s.push_str(&self.stdout);
        if !self.stderr.is_empty() {
            if !s.is_empty() && !s.ends_with('\n') {
                s.push('\n');
            }
            s.push_str(&self.stderr);
        }
        s
    }
}

/// Which captured stream(s) a line selector runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
    /// Stdout lines followed by stderr lines.
    Both,
}

/// Wall-clock limit for a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Wait for the process however long it takes.
    #[default]
    Infinite,
    /// Terminate the process tree once the duration has elapsed.
    After(Duration),
}

impl Timeout {
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Timeout::Infinite => None,
            Timeout::After(duration) => Some(duration),
        }
    }
}

impl From<Option<Duration>> for Timeout {
    fn from(value: Option<Duration>) -> Self {
        value.map_or(Timeout::Infinite, Timeout::After)
    }
}

/// Options controlling command execution.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub timeout: Timeout,
    /// Maximum bytes to capture *per stream* (stdout and stderr).
    pub max_bytes: usize,
    /// Checked before the process is spawned.
    pub cancellation: Option<CancellationToken>,
    /// How long to wait after a graceful termination signal before force-killing the tree.
    pub kill_grace: Duration,
    /// Upper bound on waiting for the reader threads once the child has exited.
    pub reader_join_timeout: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: Timeout::Infinite,
            // 16MiB per stream keeps memory bounded while still capturing the aspect file
            // listing of very large builds.
            max_bytes: 16 * 1024 * 1024,
            cancellation: None,
            kill_grace: Duration::from_millis(250),
            reader_join_timeout: Duration::from_secs(5),
        }
    }
}

/// A full command invocation (cwd + program + args).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(cwd: &Path, program: &Path, args: &[String]) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
            program: program.to_path_buf(),
            args: args.to_vec(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Human-readable, not a round-trippable shell snippet.
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') || arg.contains('\t') {
                write!(f, " \"{}\"", arg.replace('"', "\\\""))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Result of running a command with bounded output capture.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: ExitStatus,
    pub output: BoundedOutput,
    pub timed_out: bool,
}

impl CommandResult {
    /// Exit code of the process, or `None` when it was terminated by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.status.success()
    }

    pub fn stdout_lines(&self) -> impl Iterator<Item = &str> {
        self.output.stdout.lines()
    }

    pub fn stderr_lines(&self) -> impl Iterator<Item = &str> {
        self.output.stderr.lines()
    }

    /// Run `selector` over every captured line of `stream` and keep what it returns.
    pub fn select_lines<F>(&self, stream: OutputStream, mut selector: F) -> Vec<String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let stdout = matches!(stream, OutputStream::Stdout | OutputStream::Both)
            .then(|| self.stdout_lines())
            .into_iter()
            .flatten();
        let stderr = matches!(stream, OutputStream::Stderr | OutputStream::Both)
            .then(|| self.stderr_lines())
            .into_iter()
            .flatten();
        stdout.chain(stderr).filter_map(&mut selector).collect()
    }
}

/// Structured description of a command that exited unsuccessfully or timed out.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    pub command: CommandSpec,
    pub status: ExitStatus,
    pub output: BoundedOutput,
    pub timed_out: bool,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "`{}` exited with {}", self.command, self.status)?;
        if self.timed_out {
            writeln!(f, "timed_out: true")?;
        }
        if self.output.truncated {
            writeln!(f, "output_truncated: true")?;
        }
        if !self.output.stdout.is_empty() {
            writeln!(f, "stdout:\n{}", self.output.stdout)?;
        }
        if !self.output.stderr.is_empty() {
            writeln!(f, "stderr:\n{}", self.output.stderr)?;
        }
        Ok(())
    }
}

impl std::error::Error for CommandFailure {}

#[derive(Debug, thiserror::Error)]
pub enum RunCommandError {
    #[error("failed to run `{command}`: {source}")]
    Io {
        command: CommandSpec,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` was cancelled before it started")]
    Cancelled { command: CommandSpec },

    #[error(transparent)]
    Failed(Box<CommandFailure>),
}

impl RunCommandError {
    /// `true` when the program itself could not be found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// Run a command, capturing at most `opts.max_bytes` bytes of stdout and stderr each.
///
/// A non-zero exit is *not* an error here; callers that need that use [`run_command_checked`].
pub fn run_command(
    cwd: &Path,
    program: &Path,
    args: &[String],
    opts: RunOptions,
) -> Result<CommandResult, RunCommandError> {
    let command = CommandSpec::new(cwd, program, args);
    run_command_spec(&command, opts)
}

/// Run a command and treat non-zero exits / timeouts as errors.
pub fn run_command_checked(
    cwd: &Path,
    program: &Path,
    args: &[String],
    opts: RunOptions,
) -> Result<CommandResult, RunCommandError> {
    let command = CommandSpec::new(cwd, program, args);
    let result = run_command_spec(&command, opts)?;

    if !result.success() {
        return Err(RunCommandError::Failed(Box::new(CommandFailure {
            command,
            status: result.status,
            output: result.output,
            timed_out: result.timed_out,
        })));
    }

    Ok(result)
}

fn run_command_spec(
    command: &CommandSpec,
    opts: RunOptions,
) -> Result<CommandResult, RunCommandError> {
    if opts
        .cancellation
        .as_ref()
        .is_some_and(CancellationToken::is_cancelled)
    {
        tracing::debug!(target: "bef.process", command = %command, "skipping cancelled command");
        return Err(RunCommandError::Cancelled {
            command: command.clone(),
        });
    }

    let io_err = |source: io::Error| RunCommandError::Io {
        command: command.clone(),
        source,
    };

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&command.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group on Unix so a timeout can kill the whole tree (the Bazel client plus
    // anything it forked that still holds our pipes).
    #[cfg(unix)]
    unsafe {
        use std::os::unix::process::CommandExt;

        cmd.pre_exec(|| {
            // SAFETY: `setpgid` is async-signal-safe and does not allocate.
            if libc::setpgid(0, 0) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }

    tracing::debug!(target: "bef.process", command = %command, cwd = %command.cwd.display(), "spawning");
    let start = Instant::now();
    let mut child = cmd.spawn().map_err(io_err)?;

    let Some(stdout) = child.stdout.take() else {
        return Err(io_err(io::Error::other("child stdout was not captured")));
    };
    let Some(stderr) = child.stderr.take() else {
        return Err(io_err(io::Error::other("child stderr was not captured")));
    };

    let max_bytes = opts.max_bytes;
    let stdout_rx = spawn_reader(stdout, max_bytes, "stdout").map_err(io_err)?;
    let stderr_rx = spawn_reader(stderr, max_bytes, "stderr").map_err(io_err)?;

    let mut timed_out = false;
    let status = match opts.timeout {
        Timeout::Infinite => child.wait().map_err(io_err)?,
        Timeout::After(timeout) => {
            let poll = Duration::from_millis(50);
            loop {
                if let Some(status) = child.try_wait().map_err(io_err)? {
                    break status;
                }
                if start.elapsed() >= timeout {
                    timed_out = true;
                    tracing::warn!(
                        target: "bef.process",
                        command = %command,
                        timeout_ms = timeout.as_millis() as u64,
                        "command timed out; terminating process tree"
                    );
                    break terminate_process_tree(&mut child, opts.kill_grace).map_err(io_err)?;
                }
                thread::sleep(poll.min(timeout.saturating_sub(start.elapsed())));
            }
        }
    };

    // Both readers share one deadline measured from the child's exit.
    let deadline = Instant::now() + opts.reader_join_timeout;
    let (stdout_bytes, stdout_truncated) = join_reader(&stdout_rx, deadline, "stdout", command);
    let (stderr_bytes, stderr_truncated) = join_reader(&stderr_rx, deadline, "stderr", command);

    tracing::debug!(
        target: "bef.process",
        command = %command,
        status = %status,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "command finished"
    );

    Ok(CommandResult {
        status,
        output: BoundedOutput {
            stdout: String::from_utf8_lossy(&stdout_bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr_bytes).into_owned(),
            truncated: stdout_truncated || stderr_truncated,
        },
        timed_out,
    })
}

type ReaderResult = io::Result<(Vec<u8>, bool)>;

fn spawn_reader(
    reader: impl Read + Send + 'static,
    max_bytes: usize,
    stream: &'static str,
) -> io::Result<Receiver<ReaderResult>> {
    let (tx, rx) = bounded(1);
    thread::Builder::new()
        .name(format!("bef-process-{stream}"))
        .spawn(move || {
            // The receiver may already be gone after a join timeout.
            let _ = tx.send(read_bounded(reader, max_bytes));
        })?;
    Ok(rx)
}

fn join_reader(
    rx: &Receiver<ReaderResult>,
    deadline: Instant,
    stream: &'static str,
    command: &CommandSpec,
) -> (Vec<u8>, bool) {
    let wait = deadline.saturating_duration_since(Instant::now());
    match rx.recv_timeout(wait) {
        Ok(Ok(captured)) => captured,
        Ok(Err(err)) => {
            tracing::warn!(
                target: "bef.process",
                command = %command,
                stream,
                error = %err,
                "failed to read child output"
            );
            (Vec::new(), true)
        }
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(
                target: "bef.process",
                command = %command,
                stream,
                "output reader did not finish in time; output is incomplete"
            );
            (Vec::new(), true)
        }
        Err(RecvTimeoutError::Disconnected) => {
            tracing::warn!(
                target: "bef.process",
                command = %command,
                stream,
                "output reader exited without a result"
            );
            (Vec::new(), true)
        }
    }
}

fn terminate_process_tree(
    child: &mut std::process::Child,
    grace: Duration,
) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        let pid = child.id() as i32;
        // Negative pid targets the process group set up in `pre_exec`.
        unsafe {
            let _ = libc::kill(-pid, libc::SIGTERM);
        }

        let start = Instant::now();
        while start.elapsed() < grace {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(Duration::from_millis(25));
        }

        unsafe {
            let _ = libc::kill(-pid, libc::SIGKILL);
        }
        child.wait()
    }

    #[cfg(windows)]
    {
        let _ = grace;
        // `Child::kill()` only terminates the immediate process; `bazel.exe` wrappers keep the
        // pipes open through their children.
        let pid = child.id().to_string();
        let _ = Command::new("taskkill")
            .args(["/PID", &pid, "/T", "/F"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        let _ = child.kill();
        child.wait()
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = grace;
        let _ = child.kill();
        child.wait()
    }
}

fn read_bounded(mut reader: impl Read, max_bytes: usize) -> io::Result<(Vec<u8>, bool)> {
    let mut out = Vec::new();
    let mut truncated = false;
    let mut buf = [0u8; 8 * 1024];

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };

        if out.len() < max_bytes {
            let to_store = (max_bytes - out.len()).min(n);
            out.extend_from_slice(&buf[..to_store]);
            if to_store < n {
                truncated = true;
            }
        } else {
            truncated = true;
        }
    }

    Ok((out, truncated))
}
