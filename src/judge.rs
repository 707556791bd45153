mod compare;
mod diagnostics;
mod engine;

pub use compare::compare;
pub use diagnostics::{
    Diagnostics, MAX_MESSAGE_BYTES, RETAINED_DIAGNOSTICS, SURFACED_DIAGNOSTICS,
};
pub use engine::Judge;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::sandbox::SandboxError;

/// Overall outcome of a graded submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Passed,
    Partial,
    Failed,
}

impl Verdict {
    /// `Passed` when every test passed (including the empty suite),
    /// `Failed` when none did, `Partial` otherwise
    pub fn from_counts(passed: usize, total: usize) -> Self {
        if passed == total {
            Verdict::Passed
        } else if passed == 0 {
            Verdict::Failed
        } else {
            Verdict::Partial
        }
    }
}

/// Outcome of one test case, in evaluation order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    pub index: usize,
    pub passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of grading one submission
#[derive(Debug, Clone, Serialize)]
pub struct GradeReport {
    pub submission_id: Uuid,
    pub user_id: String,
    pub problem_id: String,
    pub graded_at: DateTime<Utc>,
    pub passed_count: usize,
    pub total_count: usize,
    pub verdict: Verdict,
    pub per_test_outcomes: Vec<TestOutcome>,
    #[serde(rename = "error_details", serialize_with = "serialize_surfaced")]
    pub diagnostics: Diagnostics,
}

fn serialize_surfaced<S: serde::Serializer>(
    diagnostics: &Diagnostics,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    diagnostics.surfaced().serialize(serializer)
}

impl GradeReport {
    /// Diagnostics visible to the submitter, earliest failures first
    pub fn error_details(&self) -> &[String] {
        self.diagnostics.surfaced()
    }
}

/// Failures that prevent a submission from being graded at all
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("Problem '{0}' not found")]
    ProblemNotFound(String),

    #[error("Grading failed: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Grading failed: problem store error: {0:#}")]
    Store(#[source] anyhow::Error),
}

impl GradeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GradeError::ProblemNotFound(_))
    }
}
