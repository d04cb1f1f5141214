//! Case and suite reports.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::completion::CompletionPath;
use crate::error::{HarnessError, HarnessResult};
use crate::platform::MediaFormat;

/// Category of a recorded failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// An operation that had to succeed failed.
    UnexpectedFailure,
    /// An operation marked with EXPECT_ERROR_MARKER succeeded.
    UnexpectedSuccess,
    /// A soft check (EOS seen, output format query) did not hold.
    Assertion,
    /// The harness itself misbehaved, e.g. a second completion.
    HarnessDefect,
    Timeout,
    Setup,
    Teardown,
}

/// One recorded failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.step, self.index) {
            (Some(step), Some(index)) => {
                write!(f, "{:?} at {step} (#{index}): {}", self.kind, self.message)
            }
            _ => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

/// Outcome of one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseReport {
    pub name: String,
    #[serde(default)]
    pub title: String,
    pub passed: bool,
    pub completion: Option<CompletionPath>,
    pub failures: Vec<Failure>,
    /// Outcome checks performed (operation results and assertions).
    pub checks: u32,
    pub steps_executed: usize,
    pub emitted: u64,
    pub consumed: u64,
    pub released: u64,
    pub written: u64,
    pub eos_observed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<MediaFormat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected_completions: Vec<CompletionPath>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink_path: Option<PathBuf>,
}

impl CaseReport {
    pub fn status(&self) -> &'static str {
        if self.passed { "PASS" } else { "FAIL" }
    }
}

/// Outcome of a batch of scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    /// RFC 3339 start time.
    pub started_at: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub cases: Vec<CaseReport>,
}

impl SuiteReport {
    pub fn new(started_at: chrono::DateTime<chrono::Utc>, cases: Vec<CaseReport>) -> Self {
        let passed = cases.iter().filter(|case| case.passed).count();
        Self {
            started_at: started_at.to_rfc3339(),
            total: cases.len(),
            passed,
            failed: cases.len() - passed,
            duration_ms: cases.iter().map(|case| case.duration_ms).sum(),
            cases,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn failed_cases(&self) -> impl Iterator<Item = &CaseReport> {
        self.cases.iter().filter(|case| !case.passed)
    }

    pub fn to_json(&self) -> HarnessResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> HarnessResult<()> {
        let io_err = |source| HarnessError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, self.to_json()?).map_err(io_err)
    }

    /// Human-readable table of cases followed by a summary line.
    pub fn render_pretty(&self) -> String {
        let width = self
            .cases
            .iter()
            .map(|case| case.name.len())
            .max()
            .unwrap_or(4);
        let mut out = String::new();
        for case in &self.cases {
            let _ = writeln!(
                out,
                "{:<width$}  {}  {:>6}ms  consumed={:<4} eos={}",
                case.name,
                case.status(),
                case.duration_ms,
                case.consumed,
                case.eos_observed,
            );
            for failure in &case.failures {
                let _ = writeln!(out, "{:<width$}    - {failure}", "");
            }
        }
        let _ = writeln!(
            out,
            "\n{} cases: {} passed, {} failed ({}ms)",
            self.total, self.passed, self.failed, self.duration_ms
        );
        out
    }
}
