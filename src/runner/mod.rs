//! Booting firmware images under emulation and running shell commands on them.
//!
//! [`SessionController`] sequences a whole run on top of [`ProcessSession`]
//! (the emulator process) and [`OutputMatcher`] (pattern waits over its
//! console). Each run produces one [`RunResult`].

use crate::measure::delta::saturate_i64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod controller;
pub mod io;
pub mod matcher;
pub mod process;

pub use controller::{SessionController, SessionState, parse_free_memory};
pub use matcher::{MatchOutcome, OutputMatcher, Pattern};
pub use process::ProcessSession;

/// Classified outcome of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    /// The command ran and the shell came back cleanly.
    Success,
    /// Crash, timeout, early exit, error marker or interaction error.
    Failure,
    /// The command could not be exercised on this image.
    Skipped,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunOutcome::Success => "success",
            RunOutcome::Failure => "failure",
            RunOutcome::Skipped => "skipped",
        })
    }
}

/// What happened right after a command was written to the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EchoStatus {
    /// The shell echoed the command.
    Confirmed,
    /// The shell reported the command as unknown.
    NotFound,
    /// The prompt came back before any echo.
    PromptFirst,
}

/// Result of running one command on an emulated image.
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Wall time of the whole run, boot included.
    pub duration: Duration,

    /// Command output, with an annotation line for anything but a clean run.
    pub output: String,

    /// Tri-state outcome.
    pub outcome: RunOutcome,

    /// Echo confirmation, if the command was sent.
    pub echo: Option<EchoStatus>,

    /// Free heap bytes sampled before the command.
    pub free_memory_before: Option<u64>,

    /// Free heap bytes sampled after the command.
    pub free_memory_after: Option<u64>,
}

impl RunResult {
    /// Create a new run result.
    pub fn new(duration: Duration, output: impl Into<String>, outcome: RunOutcome) -> Self {
        Self {
            duration,
            output: output.into(),
            outcome,
            echo: None,
            free_memory_before: None,
            free_memory_after: None,
        }
    }

    /// Create a skipped result, for images that were never run.
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::new(Duration::ZERO, reason, RunOutcome::Skipped)
    }

    /// Attach the echo confirmation status.
    pub fn with_echo(mut self, echo: Option<EchoStatus>) -> Self {
        self.echo = echo;
        self
    }

    /// Attach free-memory samples.
    pub fn with_memory(mut self, before: Option<u64>, after: Option<u64>) -> Self {
        self.free_memory_before = before;
        self.free_memory_after = after;
        self
    }

    /// Whether the command succeeded.
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }

    /// Change in free memory across the command (negative means less free).
    pub fn memory_delta(&self) -> Option<i64> {
        match (self.free_memory_before, self.free_memory_after) {
            (Some(before), Some(after)) => Some(saturate_i64(
                i128::from(after) - i128::from(before),
            )),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_result_success() {
        let result = RunResult::new(Duration::from_secs(2), "ok", RunOutcome::Success);
        assert!(result.is_success());
        assert_eq!(result.output, "ok");
        assert!(result.echo.is_none());
        assert!(result.memory_delta().is_none());
    }

    #[test]
    fn test_run_result_skipped() {
        let result = RunResult::skipped("no test command");
        assert_eq!(result.outcome, RunOutcome::Skipped);
        assert_eq!(result.duration, Duration::ZERO);
        assert!(!result.is_success());
    }

    #[test]
    fn test_memory_delta() {
        let result = RunResult::new(Duration::ZERO, "", RunOutcome::Success)
            .with_memory(Some(8000), Some(7400));
        assert_eq!(result.memory_delta(), Some(-600));

        let partial = RunResult::new(Duration::ZERO, "", RunOutcome::Success)
            .with_memory(Some(8000), None);
        assert_eq!(partial.memory_delta(), None);

        let extreme = RunResult::new(Duration::ZERO, "", RunOutcome::Success)
            .with_memory(Some(u64::MAX), Some(0));
        assert_eq!(extreme.memory_delta(), Some(i64::MIN));
    }

    #[test]
    fn test_outcome_serialization() {
        assert_eq!(
            serde_json::to_string(&RunOutcome::Failure).unwrap(),
            "\"failure\""
        );
        assert_eq!(
            serde_json::to_string(&EchoStatus::PromptFirst).unwrap(),
            "\"prompt-first\""
        );
    }
}
