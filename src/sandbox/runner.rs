use std::future::Future;
use std::time::Duration;

use super::{ExecutionResult, SandboxError};

/// Trait for different execution backends
///
/// A runner executes one submission against one input in an environment it
/// creates and tears down itself. It never judges the output; a non-zero
/// exit or a timeout is reported through the `ExecutionResult`, and `Err`
/// is reserved for failures of the runner itself.
pub trait SandboxRunner: Send + Sync {
    /// Runs `code` with `stdin_input` as standard input, killing it after `timeout`
    fn run(
        &self,
        code: &str,
        stdin_input: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<ExecutionResult, SandboxError>> + Send;
}
