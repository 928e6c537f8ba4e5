use crate::{aspect::AspectParseError, label::LabelError, problems::BazelProblem};
use bef_config::ConfigError;
use bef_process::RunCommandError;
use std::{io, path::PathBuf};

pub type Result<T, E = BazelError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum BazelError {
    /// The configured Bazel executable does not exist. Never retried.
    #[error("bazel executable `{}` was not found", program.display())]
    ExecutableNotFound { program: PathBuf },

    #[error(transparent)]
    Spawn(RunCommandError),

    #[error("`{command}` timed out")]
    TimedOut { command: String },

    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    #[error("`bazel {subcommand}` failed with exit code {exit_code:?}{}", format_problems(problems))]
    CommandFailed {
        subcommand: String,
        exit_code: Option<i32>,
        problems: Vec<BazelProblem>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Label(#[from] LabelError),

    #[error(transparent)]
    AspectParse(#[from] AspectParseError),

    #[error("failed to access `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Message(String),
}

impl BazelError {
    /// Problems reported by Bazel for a failed invocation, if any.
    pub fn problems(&self) -> &[BazelProblem] {
        match self {
            Self::CommandFailed { problems, .. } => problems,
            _ => &[],
        }
    }

    /// `true` for errors that make every further Bazel invocation pointless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ExecutableNotFound { .. } | Self::Spawn(_))
    }
}

fn format_problems(problems: &[BazelProblem]) -> String {
    let mut out = String::new();
    for problem in problems {
        out.push_str("\n  ");
        out.push_str(&problem.to_string());
    }
    out
}
