//! Terminal outcome of a run and how it is classified.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::process::Termination;

/// Why a run did not succeed.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Failure {
    /// Stopped on request; not a failure of the process itself.
    #[error("Process terminated on request")]
    ManualTermination,
    /// Exited abnormally with diagnostics recognised as a usage or parse error.
    #[error("Syntax error (exit {exit_code}): {stderr}")]
    SyntaxError { stderr: String, exit_code: i32 },
    /// Any other abnormal exit.
    #[error("Process failed (exit {exit_code}): {output}")]
    Generic { output: String, exit_code: i32 },
}

impl Failure {
    /// Exit code carried by the failure, if any.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::ManualTermination => None,
            Self::SyntaxError { exit_code, .. } | Self::Generic { exit_code, .. } => {
                Some(*exit_code)
            }
        }
    }
}

/// The single terminal classification of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    /// Exited with status zero, carrying the final stdout content.
    Success(String),
    Failure(Failure),
}

impl Outcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn is_manual_termination(&self) -> bool {
        matches!(self, Self::Failure(Failure::ManualTermination))
    }

    /// Convert into a `Result`, with the success output as the `Ok` value.
    ///
    /// # Errors
    ///
    /// Returns the [`Failure`] for every non-successful outcome.
    pub fn into_result(self) -> Result<String, Failure> {
        match self {
            Self::Success(output) => Ok(output),
            Self::Failure(failure) => Err(failure),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(output) => write!(f, "Success: {output}"),
            Self::Failure(failure) => write!(f, "Failure: {failure}"),
        }
    }
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        Self::Failure(failure)
    }
}

/// Decides whether an abnormal exit is a syntax error.
pub trait Classifier: Send + Sync {
    /// `termination` is never a success when this is called.
    fn is_syntax_error(&self, termination: &Termination, stderr: &str) -> bool;
}

/// Treats any non-zero exit that wrote to stderr as a syntax error.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrClassifier;

impl Classifier for StderrClassifier {
    fn is_syntax_error(&self, termination: &Termination, stderr: &str) -> bool {
        !termination.signaled && termination.code != 0 && !stderr.trim().is_empty()
    }
}

/// Treats a non-zero exit as a syntax error when stderr matches a pattern.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    pattern: Regex,
}

impl PatternClassifier {
    /// Compile a classifier from a regular expression.
    ///
    /// # Errors
    ///
    /// Returns `regex::Error` if the pattern is invalid.
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }
}

impl Classifier for PatternClassifier {
    fn is_syntax_error(&self, termination: &Termination, stderr: &str) -> bool {
        !termination.signaled && termination.code != 0 && self.pattern.is_match(stderr)
    }
}

/// What a run wrote by the time it exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Captured<'a> {
    /// Stdout content not yet emitted as a piece.
    pub stdout_tail: &'a str,
    /// Everything the run wrote to stdout.
    pub stdout: &'a str,
    /// Everything the run wrote to stderr.
    pub stderr: &'a str,
}

/// Classify a natural exit.
///
/// Success carries the stdout tail. Failures are judged on, and carry, the
/// full output regardless of how it was segmented into pieces.
#[must_use]
pub fn classify(
    classifier: &dyn Classifier,
    termination: Termination,
    captured: Captured<'_>,
) -> Outcome {
    if termination.success() {
        return Outcome::Success(captured.stdout_tail.to_string());
    }

    if classifier.is_syntax_error(&termination, captured.stderr) {
        return Failure::SyntaxError {
            stderr: captured.stderr.to_string(),
            exit_code: termination.code,
        }
        .into();
    }

    Failure::Generic {
        output: format!("{}{}", captured.stdout, captured.stderr),
        exit_code: termination.code,
    }
    .into()
}
