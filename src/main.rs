use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use grader::config::{CliArgs, Command};
use grader::leaderboard::{self, Leaderboard};
use grader::problems::DirProblemStore;
use grader::queue::{JobQueue, QueuedJob, Submission};
use grader::sandbox::SimpleRunner;
use grader::service::GradingService;
use grader::worker::{JobOutcome, worker};

type Service = GradingService<SimpleRunner, DirProblemStore>;

/// Exit status of `submit` when the problem does not exist
const EXIT_NOT_FOUND: u8 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let n_threads = cli.threads;

    if n_threads == 0 {
        bail!("The number of worker threads must not be 0");
    }

    let config = cli.to_config()?;
    let leaderboard_path = config.leaderboard.resolve_path()?;

    if cli.flush_data {
        leaderboard::remove_leaderboard(&leaderboard_path);
    }

    let board = Arc::new(Leaderboard::load(&leaderboard_path)?);
    let service = Arc::new(GradingService::from_config(&config, board.clone())?);

    match cli.command {
        Command::Submit {
            user,
            problem,
            code,
        } => {
            let code = read_code(&code)?;
            match service.submit(&code, &problem, &user).await {
                Ok((grade, entry)) => {
                    board.flush(&leaderboard_path)?;
                    print_json(&json!({ "grade": grade, "leaderboard_entry": entry }))?;
                }
                Err(e) if e.is_not_found() => {
                    eprintln!("{e}");
                    return Ok(ExitCode::from(EXIT_NOT_FOUND));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Run { problem, code } => {
            let code = read_code(&code)?;
            print_json(&service.run_sample(&code, &problem).await?)?;
        }
        Command::Problems => {
            for id in service.list_problems()? {
                println!("{id}");
            }
        }
        Command::Problem { id } => match service.problem_summary(&id) {
            Ok(summary) => print_json(&summary)?,
            Err(e) if e.is_not_found() => {
                eprintln!("{e}");
                return Ok(ExitCode::from(EXIT_NOT_FOUND));
            }
            Err(e) => return Err(e.into()),
        },
        Command::Leaderboard { problem } => {
            print_json(&service.get_leaderboard(problem.as_deref()))?;
        }
        Command::Batch { file } => {
            run_batch(
                service,
                &file,
                n_threads,
                leaderboard_path,
                config.leaderboard.flush_interval(),
            )
            .await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn read_code(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read source file {}", path.display()))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn outcome_to_json(outcome: &JobOutcome) -> serde_json::Value {
    let submission = &outcome.job.submission;
    match &outcome.result {
        Ok((grade, entry)) => json!({
            "job": outcome.job.id,
            "worker": outcome.worker_id,
            "user_id": submission.user_id,
            "problem_id": submission.problem_id,
            "verdict": grade.verdict,
            "summary": format!("{}/{} tests passed", grade.passed_count, grade.total_count),
            "error_details": grade.error_details(),
            "rank": entry.rank,
        }),
        Err(e) => json!({
            "job": outcome.job.id,
            "worker": outcome.worker_id,
            "user_id": submission.user_id,
            "problem_id": submission.problem_id,
            "error": e.to_string(),
        }),
    }
}

async fn run_batch(
    service: Arc<Service>,
    file: &Path,
    n_threads: u8,
    leaderboard_path: PathBuf,
    flush_interval: Duration,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read submissions file {}", file.display()))?;
    let submissions: Vec<Submission> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse submissions file {}", file.display()))?;
    let n_jobs = submissions.len();
    log::info!("Grading {n_jobs} submissions with {n_threads} workers");

    let job_queue = Arc::new(JobQueue::new());
    for (id, submission) in submissions.into_iter().enumerate() {
        job_queue.push(QueuedJob { id, submission }).await;
    }

    let shutdown_token = CancellationToken::new();
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

    // ======= PREPARATION END, EXECUTION START =======

    let flusher = tokio::spawn(leaderboard::run_flusher(
        service.leaderboard().clone(),
        leaderboard_path,
        flush_interval,
        shutdown_token.clone(),
    ));

    let mut workers = JoinSet::new();
    for i in 1..=n_threads {
        workers.spawn(worker(
            i,
            service.clone(),
            job_queue.clone(),
            outcome_tx.clone(),
            shutdown_token.clone(),
        ));
    }
    drop(outcome_tx);

    // ===== EXECUTION END, WAITING FOR SHUTDOWN ======

    let mut finished = 0;
    while finished < n_jobs {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Ctrl-c received, shutting down...");
                break;
            }
            Some(outcome) = outcome_rx.recv() => {
                finished += 1;
                println!("{}", outcome_to_json(&outcome));
            }
            Some(res_worker) = workers.join_next() => {
                log::error!("A worker terminated unexpectedly: {res_worker:?}");
                break;
            }
        }
    }

    // 1. Broadcast shutdown signal to workers
    shutdown_token.cancel();
    log::info!("Shutdown signal sent to workers, waiting for them to finish...");

    // 2. Wait until every worker terminates
    while let Some(res) = workers.join_next().await {
        if let Err(e) = res {
            if e.is_panic() {
                log::error!("Worker handle panicked: {e:?}");
            } else {
                log::error!("Worker handle finished with error: {e:?}");
            }
        }
    }

    // Jobs finished while the workers were stopping
    while let Ok(outcome) = outcome_rx.try_recv() {
        finished += 1;
        println!("{}", outcome_to_json(&outcome));
    }

    // 3. Final flush happens inside the flusher once it sees the token
    flusher.await.context("Leaderboard flusher panicked")??;

    log::info!("Batch complete: {finished}/{n_jobs} submissions graded");
    Ok(())
}
