use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::judge::{GradeError, GradeReport};
use crate::leaderboard::LeaderboardEntry;
use crate::problems::ProblemStore;
use crate::queue::{JobQueue, QueuedJob};
use crate::sandbox::SandboxRunner;
use crate::service::GradingService;

/// What became of one queued job
#[derive(Debug)]
pub struct JobOutcome {
    pub job: QueuedJob,
    pub worker_id: u8,
    pub result: Result<(GradeReport, LeaderboardEntry), GradeError>,
}

/// Grades jobs from `queue` until `token` is cancelled
///
/// Cancellation is only observed between jobs; a job that has been taken
/// from the queue is always graded and reported.
pub async fn worker<R, S>(
    id: u8,
    service: Arc<GradingService<R, S>>,
    queue: Arc<JobQueue>,
    outcomes: UnboundedSender<JobOutcome>,
    token: CancellationToken,
) -> anyhow::Result<()>
where
    R: SandboxRunner,
    S: ProblemStore,
{
    log::info!("Worker {id} initialized");

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                log::info!("Worker {id} received shutdown signal, stopping");
                break;
            }

            job = queue.pop() => {
                let job_id = job.id;
                log::info!("Worker {id} got job {job_id} from queue");

                let submission = &job.submission;
                let result = service
                    .submit(&submission.code, &submission.problem_id, &submission.user_id)
                    .await;

                match &result {
                    Ok((report, _)) => {
                        log::info!(
                            "Job {job_id} finished on worker {id}: {}/{}",
                            report.passed_count,
                            report.total_count
                        );
                    }
                    Err(e) if e.is_not_found() => log::warn!("Job {job_id} rejected: {e}"),
                    Err(e) => log::error!("Job {job_id} failed on worker {id}: {e}"),
                }

                if outcomes.send(JobOutcome { job, worker_id: id, result }).is_err() {
                    log::warn!("Result of job {job_id} dropped, nobody is listening");
                }
            }
        }
    }

    log::info!("Worker {id} has shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::task::JoinSet;

    use crate::judge::Judge;
    use crate::leaderboard::Leaderboard;
    use crate::problems::{MemoryProblemStore, Problem, TestCase};
    use crate::queue::Submission;
    use crate::sandbox::{ExecutionResult, SandboxError};

    /// Prints the submitted code, so the code itself is the answer
    struct CodeIsOutput;

    impl SandboxRunner for CodeIsOutput {
        async fn run(
            &self,
            code: &str,
            _stdin_input: &str,
            _timeout: Duration,
        ) -> Result<ExecutionResult, SandboxError> {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(ExecutionResult {
                stdout: code.to_string(),
                ..Default::default()
            })
        }
    }

    fn job(id: usize, user: &str, problem: &str, code: &str) -> QueuedJob {
        QueuedJob {
            id,
            submission: Submission {
                user_id: user.to_string(),
                problem_id: problem.to_string(),
                code: code.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_workers_grade_every_job() {
        let store = MemoryProblemStore::new().with_problem(Problem {
            id: "answer".to_string(),
            public_tests: vec![TestCase::new("", "42")],
            hidden_tests: vec![TestCase::new("", "42")],
        });
        let service = Arc::new(GradingService::new(
            Judge::new(CodeIsOutput, store, Duration::from_secs(1)),
            Arc::new(Leaderboard::new()),
        ));
        let queue = Arc::new(JobQueue::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let mut workers = JoinSet::new();
        for id in 1..=3 {
            workers.spawn(worker(id, service.clone(), queue.clone(), tx.clone(), token.clone()));
        }

        let jobs = [
            job(0, "alice", "answer", "41"),
            job(1, "bob", "answer", "42"),
            job(2, "alice", "answer", "42"),
            job(3, "carol", "missing", "42"),
        ];
        for job in jobs {
            queue.push(job).await;
        }

        let mut outcomes = Vec::new();
        while outcomes.len() < 4 {
            let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            outcomes.push(outcome);
        }
        token.cancel();
        while let Some(res) = workers.join_next().await {
            res.unwrap().unwrap();
        }

        assert!(outcomes.iter().all(|o| (1..=3).contains(&o.worker_id)));
        outcomes.sort_by_key(|o| o.job.id);
        assert_eq!(outcomes[0].result.as_ref().unwrap().0.passed_count, 0);
        assert_eq!(outcomes[1].result.as_ref().unwrap().0.passed_count, 2);
        assert!(outcomes[3].result.as_ref().unwrap_err().is_not_found());

        let board = service.get_leaderboard(Some("answer"));
        assert_eq!(board.len(), 2);
        assert!(board.iter().all(|entry| entry.score == 2));
    }

    #[tokio::test]
    async fn test_idle_worker_stops_on_cancel() {
        let service = Arc::new(GradingService::new(
            Judge::new(CodeIsOutput, MemoryProblemStore::new(), Duration::from_secs(1)),
            Arc::new(Leaderboard::new()),
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let handle = tokio::spawn(worker(1, service, Arc::new(JobQueue::new()), tx, token.clone()));
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
