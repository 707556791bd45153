use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::config::LanguageConfig;

use super::unit::ExecutionUnit;
use super::{
    ExecutionResult, MAX_SOURCE_CODE_BYTES, MAX_TEST_INPUT_BYTES, SandboxError, SandboxRunner,
    TIMEOUT_EXIT_CODE,
};

/// How long output readers may keep draining pipes after the child is gone
const READER_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK_BYTES: usize = 8192;

/// Bytes read from one pipe so far, shared with its reader task
type OutputBuffer = Arc<Mutex<Vec<u8>>>;

/// A runner that executes code in a plain child process
///
/// Each run gets a fresh temporary directory and a fresh process group.
/// The only limit enforced is wall-clock time: on expiry the whole process
/// group is killed. There is no memory, CPU, file system or network
/// isolation, so this is a weak isolation boundary only.
#[derive(Debug)]
pub struct SimpleRunner {
    language: LanguageConfig,
}

impl SandboxRunner for SimpleRunner {
    async fn run(
        &self,
        code: &str,
        stdin_input: &str,
        time_limit: Duration,
    ) -> Result<ExecutionResult, SandboxError> {
        if code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(SandboxError::InputTooLarge {
                what: "source code",
                limit: MAX_SOURCE_CODE_BYTES,
            });
        }
        if stdin_input.len() > MAX_TEST_INPUT_BYTES {
            return Err(SandboxError::InputTooLarge {
                what: "test input",
                limit: MAX_TEST_INPUT_BYTES,
            });
        }

        // Dropped on every return below, which removes the directory
        let unit = ExecutionUnit::materialize(&self.language, code, stdin_input)
            .map_err(SandboxError::Materialize)?;

        let command = unit.command(&self.language);
        let (program, args) = command
            .split_first()
            .ok_or_else(|| SandboxError::EmptyCommand(self.language.name.clone()))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(unit.work_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let start_time = Instant::now();
        let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: program.clone(),
            source,
        })?;
        let pid = child.id();
        log::debug!("Spawned {program} as pid {pid:?} in {}", unit.work_dir().display());

        let stdout = OutputBuffer::default();
        let stderr = OutputBuffer::default();
        let stdout_reader = tokio::spawn(read_stream(child.stdout.take(), stdout.clone()));
        let stderr_reader = tokio::spawn(read_stream(child.stderr.take(), stderr.clone()));

        let waited = timeout(time_limit, child.wait()).await;
        let (exit_code, timed_out) = match waited {
            Ok(Ok(status)) => (exit_code_of(status), false),
            Ok(Err(e)) => {
                kill_process_group(pid);
                return Err(SandboxError::Wait(e));
            }
            Err(_) => {
                log::warn!("pid {pid:?} exceeded {time_limit:?}, killing its process group");
                kill_process_group(pid);
                child.wait().await.map_err(SandboxError::Wait)?;
                (TIMEOUT_EXIT_CODE, true)
            }
        };
        let elapsed_time = start_time.elapsed();

        // Stray descendants would otherwise keep the pipes open
        kill_process_group(pid);

        let (stdout, stderr) = tokio::join!(
            drain(stdout_reader, &stdout),
            drain(stderr_reader, &stderr)
        );

        Ok(ExecutionResult {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out,
            wall_time_ms: elapsed_time.as_millis() as u64,
        })
    }
}

impl SimpleRunner {
    pub fn new(language: LanguageConfig) -> Self {
        Self { language }
    }
}

/// Reads a pipe to its end in chunks, so a reader stopped early still
/// leaves behind everything it got
async fn read_stream<R: AsyncRead + Unpin>(stream: Option<R>, buffer: OutputBuffer) {
    let Some(mut stream) = stream else { return };
    let mut chunk = [0u8; READ_CHUNK_BYTES];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.lock().extend_from_slice(&chunk[..n]),
            Err(e) => {
                let read = buffer.lock().len();
                log::debug!("Output pipe closed with error after {read} bytes: {e}");
                break;
            }
        }
    }
}

/// Waits a grace period for the reader, then takes whatever it collected
///
/// A descendant that left the process group can hold the pipe open
/// indefinitely; its reader is aborted but the bytes already read are kept.
async fn drain(mut reader: JoinHandle<()>, buffer: &OutputBuffer) -> Vec<u8> {
    match timeout(READER_GRACE, &mut reader).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::error!("Output reader task failed: {e}"),
        Err(_) => {
            log::warn!(
                "Output reader did not finish within {READER_GRACE:?}, keeping partial output"
            );
            reader.abort();
        }
    }
    std::mem::take(&mut *buffer.lock())
}

fn exit_code_of(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => TIMEOUT_EXIT_CODE,
    }
}

fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid else { return };
    // The child was spawned with process_group(0), so its pgid equals its pid
    let ret = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            log::warn!("Failed to kill process group {pid}: {err}");
        }
    }
}
