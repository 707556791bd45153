use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;

use crate::leaderboard::default_leaderboard_path;

#[derive(Parser)]
#[command(name = "grader", version = "0.1", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: Option<String>,

    /// Whether to flush the persisted leaderboard before starting
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,

    /// Number of concurrent grading workers used by `batch`
    #[arg(long = "threads", short = 't', default_value_t = 4)]
    pub threads: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Grade one submission and merge it into the leaderboard
    Submit {
        #[arg(long)]
        user: String,
        #[arg(long)]
        problem: String,
        /// File containing the submitted source code
        #[arg(long)]
        code: PathBuf,
    },
    /// Run code against the first public test without grading
    Run {
        #[arg(long)]
        problem: String,
        #[arg(long)]
        code: PathBuf,
    },
    /// List the available problems
    Problems,
    /// Show the public part of one problem
    Problem { id: String },
    /// Print the ranked leaderboard
    Leaderboard {
        #[arg(long)]
        problem: Option<String>,
    },
    /// Grade a JSON array of submissions concurrently
    Batch { file: PathBuf },
}

impl CliArgs {
    /// Load the configuration from the specified file, or the defaults if none was given
    pub fn to_config(&self) -> Result<Config> {
        match &self.config_path {
            Some(path) => Config::from_file(path),
            None => Ok(Config::default()),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct Config {
    pub problems_dir: PathBuf,
    pub language: LanguageConfig,
    pub judge: JudgeConfig,
    pub leaderboard: LeaderboardConfig,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open config file {path}"))?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader)
            .with_context(|| format!("Failed to parse config file {path}"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            problems_dir: PathBuf::from("test_cases"),
            language: LanguageConfig::default(),
            judge: JudgeConfig::default(),
            leaderboard: LeaderboardConfig::default(),
        }
    }
}

/// How a submission is materialized and launched.
///
/// `command` is an argv template: `%INPUT%` expands to the source file and
/// `%STDIN%` to the file holding the test input. `epilogue` is appended
/// after the submitted code and must feed that file to `solve` as stdin.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct LanguageConfig {
    pub name: String,
    pub file_name: String,
    pub command: Vec<String>,
    pub epilogue: String,
}

const PYTHON_EPILOGUE: &str = r#"
if __name__ == "__main__":
    import io as _grader_io
    import sys as _grader_sys

    with open(_grader_sys.argv[1], encoding="utf-8") as _grader_stdin:
        _grader_sys.stdin = _grader_io.StringIO(_grader_stdin.read())

    solve()
"#;

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            name: "python".to_string(),
            file_name: "main.py".to_string(),
            command: vec![
                "python3".to_string(),
                "%INPUT%".to_string(),
                "%STDIN%".to_string(),
            ],
            epilogue: PYTHON_EPILOGUE.to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct JudgeConfig {
    pub timeout_ms: MilliSecond,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            timeout_ms: MilliSecond(5000),
        }
    }
}

impl JudgeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from(self.timeout_ms)
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
pub struct LeaderboardConfig {
    pub path: Option<PathBuf>,
    pub flush_interval_secs: u64,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_interval_secs: 30,
        }
    }
}

impl LeaderboardConfig {
    /// Configured path, or the per-user data directory when none is set
    pub fn resolve_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => default_leaderboard_path(),
        }
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MilliSecond(pub u64);

impl From<MilliSecond> for Duration {
    fn from(value: MilliSecond) -> Self {
        Duration::from_millis(value.0)
    }
}
