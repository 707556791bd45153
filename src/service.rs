use std::sync::Arc;

use serde::Serialize;

use crate::config::Config;
use crate::judge::{GradeError, GradeReport, Judge};
use crate::leaderboard::{Leaderboard, LeaderboardEntry, SubmissionRecord};
use crate::problems::{DirProblemStore, ProblemStore, TestCase};
use crate::sandbox::{SandboxRunner, SimpleRunner, create_sandbox_runner};

/// Output of running code once against a problem's first public test
#[derive(Debug, Clone, Serialize)]
pub struct SampleRun {
    pub success: bool,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub test_input: String,
}

/// The public face of a problem: hidden tests are only counted
#[derive(Debug, Clone, Serialize)]
pub struct ProblemSummary {
    pub id: String,
    pub public_tests: Vec<TestCase>,
    pub hidden_test_count: usize,
    pub total_tests: usize,
}

/// Grading plus the leaderboard that ranks its results
pub struct GradingService<R, S> {
    judge: Judge<R, S>,
    leaderboard: Arc<Leaderboard>,
}

impl GradingService<SimpleRunner, DirProblemStore> {
    /// Service over the configured problem directory and language
    pub fn from_config(config: &Config, leaderboard: Arc<Leaderboard>) -> anyhow::Result<Self> {
        let runner = create_sandbox_runner(config.language.clone())?;
        let store = DirProblemStore::new(&config.problems_dir);
        log::info!(
            "Serving problems from {} with a {}ms time limit",
            config.problems_dir.display(),
            config.judge.timeout_ms.0
        );
        Ok(Self::new(
            Judge::new(runner, store, config.judge.timeout()),
            leaderboard,
        ))
    }
}

impl<R: SandboxRunner, S: ProblemStore> GradingService<R, S> {
    pub fn new(judge: Judge<R, S>, leaderboard: Arc<Leaderboard>) -> Self {
        Self { judge, leaderboard }
    }

    pub fn leaderboard(&self) -> &Arc<Leaderboard> {
        &self.leaderboard
    }

    pub async fn grade(
        &self,
        code: &str,
        problem_id: &str,
        user_id: &str,
    ) -> Result<GradeReport, GradeError> {
        self.judge.grade(code, problem_id, user_id).await
    }

    /// Merges a report into the leaderboard and returns the user's retained entry
    ///
    /// The returned entry is the best one on record, which is not
    /// necessarily the submission just recorded.
    pub fn record_and_rank(&self, report: &GradeReport) -> LeaderboardEntry {
        let (outcome, entry) = self
            .leaderboard
            .record_and_rank(SubmissionRecord::from_report(report));
        log::info!(
            "Recorded submission {} for {} on {}: {outcome:?}, rank {}",
            report.submission_id,
            report.user_id,
            report.problem_id,
            entry.rank
        );
        entry
    }

    /// Grades and records in one step
    pub async fn submit(
        &self,
        code: &str,
        problem_id: &str,
        user_id: &str,
    ) -> Result<(GradeReport, LeaderboardEntry), GradeError> {
        let report = self.grade(code, problem_id, user_id).await?;
        let entry = self.record_and_rank(&report);
        Ok((report, entry))
    }

    pub fn get_leaderboard(&self, problem_id: Option<&str>) -> Vec<LeaderboardEntry> {
        self.leaderboard.query(problem_id)
    }

    /// Runs `code` once on the first public test input without grading it
    ///
    /// An unknown problem, or one without public tests, runs on empty input.
    pub async fn run_sample(&self, code: &str, problem_id: &str) -> Result<SampleRun, GradeError> {
        let test_input = self
            .judge
            .store()
            .get_problem(problem_id)
            .map_err(GradeError::Store)?
            .and_then(|problem| problem.public_tests.into_iter().next())
            .map(|case| case.input)
            .unwrap_or_default();

        let time_limit = self.judge.time_limit();
        let execution = self
            .judge
            .runner()
            .run(code, &test_input, time_limit)
            .await?;

        let error = if execution.timed_out {
            Some(format!(
                "Execution timeout ({} seconds)",
                time_limit.as_secs_f64()
            ))
        } else if execution.exit_code != 0 {
            let stderr = execution.stderr.trim();
            Some(if stderr.is_empty() {
                "Runtime error occurred".to_string()
            } else {
                stderr.to_string()
            })
        } else {
            None
        };

        Ok(SampleRun {
            success: error.is_none(),
            output: execution.stdout,
            error,
            execution_time_ms: execution.wall_time_ms,
            test_input,
        })
    }

    pub fn list_problems(&self) -> Result<Vec<String>, GradeError> {
        self.judge
            .store()
            .list_problem_ids()
            .map_err(GradeError::Store)
    }

    pub fn problem_summary(&self, problem_id: &str) -> Result<ProblemSummary, GradeError> {
        let problem = self
            .judge
            .store()
            .get_problem(problem_id)
            .map_err(GradeError::Store)?
            .ok_or_else(|| GradeError::ProblemNotFound(problem_id.to_string()))?;

        Ok(ProblemSummary {
            id: problem.id,
            total_tests: problem.public_tests.len() + problem.hidden_tests.len(),
            hidden_test_count: problem.hidden_tests.len(),
            public_tests: problem.public_tests,
        })
    }
}
