use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::problems::{ProblemStore, TestCase};
use crate::sandbox::{ExecutionResult, SandboxRunner};

use super::{Diagnostics, GradeError, GradeReport, TestOutcome, Verdict, compare};

/// Grades submissions by running them against every test of a problem
///
/// Holds no state between calls, so one `Judge` can grade any number of
/// submissions concurrently. Each test case gets its own run from the
/// runner; failures of the submitted code are recorded per test and never
/// stop the remaining tests.
pub struct Judge<R, S> {
    runner: R,
    store: S,
    time_limit: Duration,
}

impl<R: SandboxRunner, S: ProblemStore> Judge<R, S> {
    pub fn new(runner: R, store: S, time_limit: Duration) -> Self {
        Self {
            runner,
            store,
            time_limit,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// Runs `code` against all tests of `problem_id`, public tests first
    pub async fn grade(
        &self,
        code: &str,
        problem_id: &str,
        user_id: &str,
    ) -> Result<GradeReport, GradeError> {
        let problem = self
            .store
            .get_problem(problem_id)
            .map_err(GradeError::Store)?
            .ok_or_else(|| GradeError::ProblemNotFound(problem_id.to_string()))?;

        let submission_id = Uuid::new_v4();
        let total_count = problem.total_tests();
        log::info!(
            "Grading submission {submission_id} by {user_id} on {problem_id} ({total_count} tests)"
        );

        let mut per_test_outcomes = Vec::with_capacity(total_count);
        let mut diagnostics = Diagnostics::new();
        let mut passed_count = 0;

        for (index, case) in problem.all_tests().enumerate() {
            let execution = self
                .runner
                .run(code, &case.input, self.time_limit)
                .await
                .inspect_err(|e| {
                    log::error!("Runner failed on test {} of {submission_id}: {e}", index + 1);
                })?;

            let message = self.check_case(index, case, &execution);
            log::debug!(
                "Submission {submission_id} test {}: {} in {}ms",
                index + 1,
                if message.is_none() { "passed" } else { "failed" },
                execution.wall_time_ms
            );

            match &message {
                None => passed_count += 1,
                Some(message) => {
                    diagnostics.push(message.clone());
                }
            }
            per_test_outcomes.push(TestOutcome {
                index,
                passed: message.is_none(),
                message,
            });
        }

        let verdict = Verdict::from_counts(passed_count, total_count);
        log::info!("Submission {submission_id} scored {passed_count}/{total_count} ({verdict:?})");

        Ok(GradeReport {
            submission_id,
            user_id: user_id.to_string(),
            problem_id: problem_id.to_string(),
            graded_at: Utc::now(),
            passed_count,
            total_count,
            verdict,
            per_test_outcomes,
            diagnostics,
        })
    }

    /// Returns the failure message for one test, or `None` if it passed
    fn check_case(
        &self,
        index: usize,
        case: &TestCase,
        execution: &ExecutionResult,
    ) -> Option<String> {
        let number = index + 1;

        if execution.timed_out {
            log::warn!("Test {number} timed out after {}ms", execution.wall_time_ms);
            return Some(format!(
                "Test {number}: Timeout (exceeded {} seconds)",
                self.time_limit.as_secs_f64()
            ));
        }

        if execution.exit_code != 0 {
            return Some(format!(
                "Test {number}: Runtime error - {}",
                execution.stderr.trim()
            ));
        }

        if compare(&execution.stdout, &case.expected_output) {
            None
        } else {
            Some(format!(
                "Test {number}: Expected '{}', got '{}'",
                case.expected_output.trim(),
                execution.stdout.trim()
            ))
        }
    }
}
