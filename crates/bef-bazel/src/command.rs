use crate::error::{BazelError, Result};
use bef_config::BazelConfig;
use bef_process::{run_command, CancellationToken, OutputStream, RunCommandError, RunOptions, Timeout};
use std::path::Path;

/// Exit code and captured output of one Bazel invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub truncated: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Apply `selector` to every stdout line, then every stderr line.
    pub fn select_lines<F>(&self, stream: OutputStream, mut selector: F) -> Vec<String>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let stdout = matches!(stream, OutputStream::Stdout | OutputStream::Both)
            .then(|| self.stdout.lines())
            .into_iter()
            .flatten();
        let stderr = matches!(stream, OutputStream::Stderr | OutputStream::Both)
            .then(|| self.stderr.lines())
            .into_iter()
            .flatten();
        stdout.chain(stderr).filter_map(&mut selector).collect()
    }
}

/// Runs a build tool command and returns its output.
///
/// A non-zero exit status is reported through [`CommandOutput::exit_code`], not as an error;
/// errors are reserved for the command not running at all.
pub trait CommandRunner: Send + Sync {
    fn run(&self, cwd: &Path, program: &Path, args: &[String]) -> Result<CommandOutput>;

    /// Like [`CommandRunner::run`], but refuses to start once `cancellation` has fired.
    fn run_cancellable(
        &self,
        cwd: &Path,
        program: &Path,
        args: &[String],
        cancellation: Option<&CancellationToken>,
    ) -> Result<CommandOutput> {
        if cancellation.is_some_and(CancellationToken::is_cancelled) {
            return Err(cancelled(program, args));
        }
        self.run(cwd, program, args)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<R> {
    fn run(&self, cwd: &Path, program: &Path, args: &[String]) -> Result<CommandOutput> {
        (**self).run(cwd, program, args)
    }
}

fn cancelled(program: &Path, args: &[String]) -> BazelError {
    let program = program.file_name().unwrap_or(program.as_os_str());
    BazelError::Cancelled {
        operation: format!(
            "`{} {}`",
            program.to_string_lossy(),
            args.first().map(String::as_str).unwrap_or_default()
        ),
    }
}

/// Spawns real processes through `bef-process`.
#[derive(Debug, Clone)]
pub struct DefaultCommandRunner {
    timeout: Timeout,
    max_bytes: usize,
}

impl Default for DefaultCommandRunner {
    fn default() -> Self {
        Self {
            timeout: Timeout::Infinite,
            max_bytes: RunOptions::default().max_bytes,
        }
    }
}

impl DefaultCommandRunner {
    pub fn from_config(config: &BazelConfig) -> Self {
        Self {
            timeout: config.timeout().into(),
            max_bytes: config.max_output_bytes,
        }
    }

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }
}

impl CommandRunner for DefaultCommandRunner {
    fn run(&self, cwd: &Path, program: &Path, args: &[String]) -> Result<CommandOutput> {
        let opts = RunOptions {
            timeout: self.timeout,
            max_bytes: self.max_bytes,
            ..RunOptions::default()
        };

        let result = run_command(cwd, program, args, opts).map_err(|err| {
            if err.is_not_found() {
                BazelError::ExecutableNotFound {
                    program: program.to_path_buf(),
                }
            } else if let RunCommandError::Cancelled { .. } = err {
                cancelled(program, args)
            } else {
                BazelError::Spawn(err)
            }
        })?;

        if result.timed_out {
            return Err(BazelError::TimedOut {
                command: bef_process::CommandSpec::new(cwd, program, args).to_string(),
            });
        }
        if result.output.truncated {
            tracing::debug!(
                target: "bef.bazel",
                program = %program.display(),
                "bazel output was truncated"
            );
        }

        Ok(CommandOutput {
            exit_code: result.exit_code(),
            stdout: result.output.stdout,
            stderr: result.output.stderr,
            truncated: result.output.truncated,
        })
    }
}
