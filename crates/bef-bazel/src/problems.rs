use crate::label::TargetLabel;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, sync::OnceLock};

/// A structured error reported by Bazel for a build or query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BazelProblem {
    pub target: Option<TargetLabel>,
    pub file: Option<PathBuf>,
    pub line: Option<u32>,
    pub message: String,
}

impl BazelProblem {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            target: None,
            file: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn for_target(target: TargetLabel, message: impl Into<String>) -> Self {
        Self {
            target: Some(target),
            ..Self::message(message)
        }
    }
}

impl fmt::Display for BazelProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{}", file.display())?;
            if let Some(line) = self.line {
                write!(f, ":{line}")?;
            }
            f.write_str(": ")?;
        }
        if let Some(target) = &self.target {
            write!(f, "[{target}] ")?;
        }
        f.write_str(&self.message)
    }
}

fn located_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^ERROR: (?P<file>[^:\s][^:]*):(?P<line>\d+)(?::\d+)?: (?P<msg>.*)$")
            .expect("valid regex")
    })
}

fn plain_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^ERROR: (?P<msg>.*)$").expect("valid regex"))
}

fn javac_error_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<file>[^:\s][^:]*\.(?:java|kt|scala)):(?P<line>\d+): error: (?P<msg>.*)$")
            .expect("valid regex")
    })
}

fn label_in_message_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?:rule|target|in|building) '?(?P<label>@{0,2}[\w.~+-]*//[^\s':]*(?::[^\s':]+)?)'?",
        )
        .expect("valid regex")
    })
}

fn no_such_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"no such (?:target|package) '(?P<label>[^']+)'").expect("valid regex")
    })
}

fn label_from_message(message: &str) -> Option<TargetLabel> {
    let captures = no_such_re()
        .captures(message)
        .or_else(|| label_in_message_re().captures(message))?;
    let raw = captures.name("label")?.as_str();
    // `no such package 'foo/bar'` names a package path rather than a label.
    let raw = if raw.starts_with("//") || raw.starts_with('@') {
        raw.to_string()
    } else {
        format!("//{raw}")
    };
    TargetLabel::parse(&raw).ok()
}

/// Parse one line of Bazel output into a problem, if it is an error line.
pub fn parse_problem_line(line: &str) -> Option<BazelProblem> {
    let line = line.trim_end();

    if let Some(captures) = located_error_re().captures(line) {
        let message = captures["msg"].trim().to_string();
        return Some(BazelProblem {
            target: label_from_message(&message),
            file: Some(PathBuf::from(&captures["file"])),
            line: captures["line"].parse().ok(),
            message,
        });
    }

    if let Some(captures) = javac_error_re().captures(line) {
        return Some(BazelProblem {
            target: None,
            file: Some(PathBuf::from(&captures["file"])),
            line: captures["line"].parse().ok(),
            message: captures["msg"].trim().to_string(),
        });
    }

    let captures = plain_error_re().captures(line)?;
    let message = captures["msg"].trim().to_string();
    Some(BazelProblem {
        target: label_from_message(&message),
        file: None,
        line: None,
        message,
    })
}

/// Collect every problem reported in `output`, skipping Bazel's trailing summary lines.
pub fn parse_problems(output: &str) -> Vec<BazelProblem> {
    output
        .lines()
        .filter_map(parse_problem_line)
        .filter(|problem| !is_summary(&problem.message))
        .collect()
}

fn is_summary(message: &str) -> bool {
    message.starts_with("Build did NOT complete successfully")
        || message.starts_with("Build failed. Not running target")
        || message.starts_with("command succeeded, but there were errors")
        || message.starts_with("Evaluation of query")
}
