use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use grader::config::{Config, LanguageConfig};
use grader::judge::{Judge, Verdict};
use grader::leaderboard::Leaderboard;
use grader::problems::DirProblemStore;
use grader::queue::Submission;
use grader::sandbox::{SimpleRunner, create_sandbox_runner};
use grader::service::GradingService;

type ShellService = GradingService<SimpleRunner, DirProblemStore>;

fn shell_language() -> LanguageConfig {
    LanguageConfig {
        name: "sh".to_string(),
        file_name: "main.sh".to_string(),
        command: vec!["sh".to_string(), "%INPUT%".to_string(), "%STDIN%".to_string()],
        epilogue: "exec < \"$1\"\nsolve\n".to_string(),
    }
}

fn write_problem(dir: &Path, id: &str, json: &str) {
    fs::write(dir.join(format!("{id}.json")), json).unwrap();
}

/// Service over a fresh problem directory holding `sum` and `single`
fn setup(time_limit: Duration) -> (TempDir, ShellService) {
    let dir = tempfile::tempdir().unwrap();
    write_problem(
        dir.path(),
        "sum",
        r#"{
            "public_tests": [{"input": "1 2\n", "expected_output": "3\n"}],
            "hidden_tests": [
                {"input": "10 20\n", "expected_output": "30\n"},
                {"input": "5 5\n", "expected_output": "10\n"}
            ]
        }"#,
    );
    write_problem(
        dir.path(),
        "single",
        r#"{"public_tests": [{"input": "", "expected_output": "done"}]}"#,
    );

    let runner = create_sandbox_runner(shell_language()).unwrap();
    let store = DirProblemStore::new(dir.path());
    let service = GradingService::new(
        Judge::new(runner, store, time_limit),
        Arc::new(Leaderboard::new()),
    );
    (dir, service)
}

const SUM: &str = "solve() { read a b; echo $((a + b)); }";

#[tokio::test]
async fn test_correct_submission_passes() {
    let (_dir, service) = setup(Duration::from_secs(5));

    let report = service.grade(SUM, "sum", "alice").await.unwrap();

    assert_eq!(report.total_count, 3);
    assert_eq!(report.passed_count, 3);
    assert_eq!(report.verdict, Verdict::Passed);
    assert!(report.error_details().is_empty());
}

#[tokio::test]
async fn test_partially_correct_submission() {
    let (_dir, service) = setup(Duration::from_secs(5));
    let code = r#"solve() { read a b; if [ "$a" = 1 ]; then echo 3; else echo 0; fi; }"#;

    let report = service.grade(code, "sum", "bob").await.unwrap();

    assert_eq!(report.passed_count, 1);
    assert_eq!(report.verdict, Verdict::Partial);
    assert_eq!(
        report.error_details(),
        ["Test 2: Expected '30', got '0'", "Test 3: Expected '10', got '0'"]
    );
}

#[tokio::test]
async fn test_crashing_submission_fails_every_test() {
    let (_dir, service) = setup(Duration::from_secs(5));
    let code = "solve() { echo boom >&2; exit 1; }";

    let report = service.grade(code, "sum", "carol").await.unwrap();

    assert_eq!(report.passed_count, 0);
    assert_eq!(report.verdict, Verdict::Failed);
    assert_eq!(report.error_details()[0], "Test 1: Runtime error - boom");
    assert_eq!(report.per_test_outcomes.len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_infinite_loop_times_out_without_blocking_others() {
    let (_dir, service) = setup(Duration::from_secs(1));
    let service = Arc::new(service);

    let start = Instant::now();
    let slow = {
        let service = service.clone();
        tokio::spawn(async move {
            let report = service
                .grade("solve() { while :; do :; done; }", "single", "looper")
                .await;
            (report, start.elapsed())
        })
    };
    let fast = {
        let service = service.clone();
        tokio::spawn(async move {
            let report = service.grade("solve() { echo done; }", "single", "quick").await;
            (report, start.elapsed())
        })
    };

    let (slow_report, slow_elapsed) = slow.await.unwrap();
    let (fast_report, fast_elapsed) = fast.await.unwrap();

    let slow_report = slow_report.unwrap();
    assert_eq!(slow_report.verdict, Verdict::Failed);
    assert_eq!(
        slow_report.error_details(),
        ["Test 1: Timeout (exceeded 1 seconds)"]
    );
    assert!(slow_elapsed < Duration::from_secs(4), "took {slow_elapsed:?}");

    assert_eq!(fast_report.unwrap().verdict, Verdict::Passed);
    assert!(fast_elapsed < slow_elapsed);
}

#[tokio::test]
async fn test_unknown_problem_is_not_found() {
    let (_dir, service) = setup(Duration::from_secs(5));

    let err = service.grade(SUM, "missing", "dave").await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "Problem 'missing' not found");

    let err = service.grade(SUM, "../sum", "dave").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_leaderboard_survives_restart() {
    let (dir, service) = setup(Duration::from_secs(5));
    let path = dir.path().join("state").join("leaderboard.json");

    let (_, entry) = service.submit(SUM, "sum", "alice").await.unwrap();
    assert_eq!(entry.rank, 1);
    service
        .submit("solve() { echo 3; }", "sum", "bob")
        .await
        .unwrap();
    service.leaderboard().flush(&path).unwrap();

    let reloaded = Leaderboard::load(&path).unwrap();
    assert_eq!(reloaded.query(Some("sum")), service.get_leaderboard(Some("sum")));
    let users: Vec<String> = reloaded
        .query(Some("sum"))
        .into_iter()
        .map(|entry| entry.user_id)
        .collect();
    assert_eq!(users, vec!["alice", "bob"]);
}

#[tokio::test]
async fn test_run_sample_against_real_process() {
    let (_dir, service) = setup(Duration::from_secs(5));

    let sample = service.run_sample(SUM, "sum").await.unwrap();
    assert!(sample.success);
    assert_eq!(sample.output, "3\n");
    assert_eq!(sample.test_input, "1 2\n");

    let sample = service
        .run_sample("solve() { exit 4; }", "sum")
        .await
        .unwrap();
    assert!(!sample.success);
    assert_eq!(sample.error.as_deref(), Some("Runtime error occurred"));
}

fn python3_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}

#[tokio::test]
async fn test_bundled_python_submissions() {
    if !python3_available() {
        eprintln!("python3 not found, skipping");
        return;
    }

    let config = Config::from_file("data/example.json").unwrap();
    let service = GradingService::from_config(&config, Arc::new(Leaderboard::new())).unwrap();
    let submissions: Vec<Submission> =
        serde_json::from_str(&fs::read_to_string("data/submissions.json").unwrap()).unwrap();

    let mut verdicts = Vec::new();
    for submission in &submissions {
        let (report, _) = service
            .submit(&submission.code, &submission.problem_id, &submission.user_id)
            .await
            .unwrap();
        verdicts.push((submission.user_id.as_str(), report.passed_count, report.verdict));
    }

    assert_eq!(
        verdicts,
        vec![
            ("alice", 4, Verdict::Passed),
            ("bob", 1, Verdict::Partial),
            ("carol", 3, Verdict::Passed),
        ]
    );
}
