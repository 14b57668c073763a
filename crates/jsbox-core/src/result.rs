//! Execution result types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Text returned when a run produced neither stdout nor stderr
pub const NO_OUTPUT: &str = "No output.";

/// Result of a completed script run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code of the interpreter (-1 when killed by a signal)
    pub exit_code: i32,

    /// Standard output, lossily decoded
    pub stdout: String,

    /// Standard error, lossily decoded
    pub stderr: String,

    /// Wall-clock time from spawn to exit
    pub duration: Duration,
}

impl ExecutionResult {
    /// The single text blob a run reports: stdout, else stderr, else a placeholder.
    #[must_use]
    pub fn output(&self) -> &str {
        if !self.stdout.is_empty() {
            &self.stdout
        } else if !self.stderr.is_empty() {
            &self.stderr
        } else {
            NO_OUTPUT
        }
    }

    #[must_use]
    pub fn into_output(self) -> String {
        if !self.stdout.is_empty() {
            self.stdout
        } else if !self.stderr.is_empty() {
            self.stderr
        } else {
            NO_OUTPUT.to_string()
        }
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

impl Default for ExecutionResult {
    fn default() -> Self {
        Self {
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }
}
