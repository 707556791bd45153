mod runner;
mod simple_runner;
mod unit;

// Re-export the trait and common types
pub use runner::SandboxRunner;
pub use simple_runner::SimpleRunner;

use serde::Serialize;
use thiserror::Error;

use crate::config::LanguageConfig;

/// Inputs larger than these are refused before anything is spawned
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;
pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Exit code reported when the child was killed on timeout
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Result of running one (code, input) pair
///
/// Produced fresh for every test case and never reused.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub wall_time_ms: u64,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// Failures of the runner itself, as opposed to failures of the submitted code
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("{what} exceeds maximum size of {limit} bytes")]
    InputTooLarge { what: &'static str, limit: usize },

    #[error("language '{0}' has an empty launch command")]
    EmptyCommand(String),

    #[error("failed to materialize execution unit: {0}")]
    Materialize(#[source] std::io::Error),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait for child process: {0}")]
    Wait(#[source] std::io::Error),
}

/// Creates the process runner for a language
///
/// The runner gives each test case its own child process and temporary
/// directory plus a wall-clock timeout. It does NOT limit memory, CPU,
/// disk or network access and does not sandbox the filesystem: submitted
/// code runs with the privileges of the grading process.
pub fn create_sandbox_runner(language: LanguageConfig) -> Result<SimpleRunner, SandboxError> {
    if language.command.is_empty() {
        return Err(SandboxError::EmptyCommand(language.name));
    }

    log::info!("Creating SimpleRunner for language {}", language.name);
    log::warn!("SimpleRunner provides NO resource or filesystem isolation");

    Ok(SimpleRunner::new(language))
}
