//! Local subprocess execution of the test tool.
//!
//! [`capture`] is the shared spawn + drain + wait logic; [`run_exec_spec`]
//! adds build-log reporting and outcome classification on top of it.

use std::future::Future;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use imagecheck_core::{ExecSpec, Redactor};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::ExecError;
use crate::ui::Ui;

/// Maximum stdout or stderr size captured per stream (10 MiB).
///
/// Output past this limit is still drained so the child never blocks on a
/// full pipe, but it is not kept.
const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// pytest: some tests failed.
const EXIT_TESTS_FAILED: i32 = 1;
/// pytest: no tests were collected.
const EXIT_NO_TESTS_COLLECTED: i32 = 5;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Limits applied to one execution.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Wall-clock limit; the child is killed when it expires.
    pub timeout: Option<Duration>,
    /// Cancelling kills the child and returns [`ExecError::Cancelled`].
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    /// The tool ran and reported failing (or no) tests.
    Failed { exit_code: i32 },
    /// The tool ran but exited abnormally (usage error, crash, signal).
    ToolError { exit_code: i32 },
}

impl Outcome {
    /// Classify a pytest exit status. `-1` stands for termination by signal.
    pub fn from_exit_code(exit_code: i32) -> Self {
        match exit_code {
            0 => Self::Passed,
            EXIT_TESTS_FAILED | EXIT_NO_TESTS_COLLECTED => Self::Failed { exit_code },
            _ => Self::ToolError { exit_code },
        }
    }

    pub fn is_passed(self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// Final result of a test tool execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub outcome: Outcome,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    /// Turn a non-passing outcome into [`ExecError::ToolNonZeroExit`].
    pub fn into_result(self) -> Result<Self, ExecError> {
        match self.outcome {
            Outcome::Passed => Ok(self),
            Outcome::Failed { exit_code } | Outcome::ToolError { exit_code } => {
                Err(ExecError::ToolNonZeroExit { exit_code })
            }
        }
    }
}

/// Raw output of a finished child process.
#[derive(Debug, Clone)]
pub struct Captured {
    /// Exit status (`-1` if killed by signal).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Spawn `spec`, drain both streams concurrently and wait for exit.
///
/// The host environment is inherited with `spec.env` laid over it. Each
/// output line is logged at debug level with secrets masked.
pub async fn capture(spec: &ExecSpec, options: &RunOptions) -> Result<Captured, ExecError> {
    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let start = Instant::now();

    let mut child = cmd.spawn().map_err(|source| ExecError::ToolStart {
        program: spec.program.display().to_string(),
        source,
    })?;

    // Read both streams in spawned tasks so `child.wait()` can borrow the
    // child while the pipes are being emptied.
    let mut stdout_task = tokio::spawn(read_stream(
        child.stdout.take(),
        "stdout",
        spec.redactor().clone(),
    ));
    let mut stderr_task = tokio::spawn(read_stream(
        child.stderr.take(),
        "stderr",
        spec.redactor().clone(),
    ));

    // The limits cover draining too: a background process that inherited
    // the pipes keeps them open after the child exits.
    let finished = async {
        let status = child.wait().await?;
        let stdout = (&mut stdout_task).await.unwrap_or_default();
        let stderr = (&mut stderr_task).await.unwrap_or_default();
        Ok::<(ExitStatus, String, String), ExecError>((status, stdout, stderr))
    };

    let result = tokio::select! {
        result = with_timeout(finished, options.timeout) => result,
        () = options.cancel.cancelled() => {
            tracing::warn!(program = %spec.program.display(), "Execution cancelled; killing child process");
            Err(ExecError::Cancelled)
        }
    };

    // On error `child` is dropped on return, which kills the process
    // because of `kill_on_drop(true)`.
    let (status, stdout, stderr) = match result {
        Ok(done) => done,
        Err(e) => {
            stdout_task.abort();
            stderr_task.abort();
            return Err(e);
        }
    };

    Ok(Captured {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        duration: start.elapsed(),
    })
}

/// Run the test tool described by `spec`, reporting to `ui`.
///
/// Content on stderr is reported but does not by itself fail the run; the
/// exit status alone decides the [`Outcome`].
pub async fn run_exec_spec(
    spec: &ExecSpec,
    options: &RunOptions,
    ui: &dyn Ui,
) -> Result<ExecutionResult, ExecError> {
    ui.say("Beginning Testinfra validation of machine image");

    let captured = capture(spec, options).await.inspect_err(|e| {
        ui.error(&format!("Testinfra execution could not be completed: {e}"));
    })?;

    let redactor = spec.redactor();
    report_output(ui, redactor, &captured.stdout, &captured.stderr);

    let outcome = Outcome::from_exit_code(captured.exit_code);
    tracing::info!(
        exit_code = captured.exit_code,
        ?outcome,
        duration_ms = captured.duration.as_millis() as u64,
        "Testinfra execution finished",
    );

    match outcome {
        Outcome::Passed => ui.say("Testinfra machine image testing is complete"),
        Outcome::Failed { exit_code } | Outcome::ToolError { exit_code } => {
            ui.error(&format!("Testinfra returned exit status: {exit_code}"));
        }
    }

    Ok(ExecutionResult {
        outcome,
        stdout: captured.stdout,
        stderr: captured.stderr,
    })
}

/// Relay captured tool output to the build log.
pub(crate) fn report_output(ui: &dyn Ui, redactor: &Redactor, stdout: &str, stderr: &str) {
    if stdout.is_empty() {
        ui.say("Testinfra produced no stdout; it is likely something unintended occurred during execution");
    } else {
        ui.say("Testinfra results include the following:");
        ui.say(&redactor.redact(stdout));
    }

    if !stderr.is_empty() {
        ui.error("Testinfra wrote the following to stderr during execution:");
        ui.error(&redactor.redact(stderr));
    }
}

async fn with_timeout<T>(
    work: impl Future<Output = Result<T, ExecError>>,
    timeout: Option<Duration>,
) -> Result<T, ExecError> {
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::warn!(timeout_secs = limit.as_secs(), "Execution timed out; killing child process");
                Err(ExecError::Timeout(limit))
            }
        },
        None => work.await,
    }
}

/// Drain a stream line by line, keeping at most [`MAX_OUTPUT_BYTES`].
async fn read_stream<R: AsyncRead + Unpin>(
    handle: Option<R>,
    stream: &'static str,
    redactor: Redactor,
) -> String {
    let Some(handle) = handle else {
        return String::new();
    };

    let mut reader = BufReader::new(handle);
    let mut kept = Vec::new();
    let mut line = Vec::new();
    let mut truncated = false;

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                tracing::debug!(stream, line = %redactor.redact(text.trim_end()), "Testinfra output");

                if kept.len() + line.len() <= MAX_OUTPUT_BYTES {
                    kept.extend_from_slice(&line);
                } else if !truncated {
                    truncated = true;
                    tracing::warn!(stream, "Output exceeded {MAX_OUTPUT_BYTES} bytes and was truncated");
                }
            }
            Err(e) => {
                tracing::warn!(stream, error = %e, "Failed to read child output");
                break;
            }
        }
    }

    String::from_utf8_lossy(&kept).into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Write;

    use assert_matches::assert_matches;

    use super::*;
    use crate::ui::BufferUi;

    /// Write a shell script standing in for the test tool.
    fn write_temp_script(body: &str) -> tempfile::TempPath {
        let mut f = tempfile::Builder::new()
            .suffix(".sh")
            .tempfile()
            .expect("create temp file");
        write!(f, "{body}").expect("write body");
        f.flush().expect("flush");
        f.into_temp_path()
    }

    fn spec_for(script: &tempfile::TempPath, args: &[&str]) -> ExecSpec {
        let mut argv = vec![script.display().to_string()];
        argv.extend(args.iter().map(|a| a.to_string()));
        ExecSpec::new("sh", argv)
    }

    #[test]
    fn outcome_classification() {
        assert_eq!(Outcome::from_exit_code(0), Outcome::Passed);
        assert_eq!(Outcome::from_exit_code(1), Outcome::Failed { exit_code: 1 });
        assert_eq!(Outcome::from_exit_code(5), Outcome::Failed { exit_code: 5 });
        assert_eq!(Outcome::from_exit_code(2), Outcome::ToolError { exit_code: 2 });
        assert_eq!(Outcome::from_exit_code(-1), Outcome::ToolError { exit_code: -1 });
    }

    #[test]
    fn into_result_maps_failures() {
        let failed = ExecutionResult {
            outcome: Outcome::Failed { exit_code: 1 },
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_matches!(
            failed.into_result(),
            Err(ExecError::ToolNonZeroExit { exit_code: 1 })
        );
    }

    #[tokio::test]
    async fn passes_args_and_reports_stdout() {
        let script = write_temp_script("echo \"args: $*\"\n");
        let ui = BufferUi::new();
        let result = run_exec_spec(&spec_for(&script, &["-v", "test_a.py"]), &RunOptions::default(), &ui)
            .await
            .expect("execute");

        assert_eq!(result.outcome, Outcome::Passed);
        assert_eq!(result.stdout, "args: -v test_a.py\n");
        assert!(ui.transcript().contains("Testinfra results include the following:"));
        assert!(ui.errors().is_empty());
    }

    #[tokio::test]
    async fn stderr_alone_is_informational() {
        let script = write_temp_script("echo warn >&2\nexit 0\n");
        let ui = BufferUi::new();
        let result = run_exec_spec(&spec_for(&script, &[]), &RunOptions::default(), &ui)
            .await
            .expect("execute");

        assert_eq!(result.outcome, Outcome::Passed);
        assert_eq!(result.stderr, "warn\n");
        assert!(ui.errors().iter().any(|e| e.contains("warn")));
    }

    #[tokio::test]
    async fn test_failures_are_an_outcome() {
        let script = write_temp_script("echo '1 failed'\nexit 1\n");
        let ui = BufferUi::new();
        let result = run_exec_spec(&spec_for(&script, &[]), &RunOptions::default(), &ui)
            .await
            .expect("execute");

        assert_eq!(result.outcome, Outcome::Failed { exit_code: 1 });
        assert!(ui
            .errors()
            .contains(&"Testinfra returned exit status: 1".to_string()));
    }

    #[tokio::test]
    async fn abnormal_exit_is_tool_error() {
        let script = write_temp_script("exit 4\n");
        let result = run_exec_spec(&spec_for(&script, &[]), &RunOptions::default(), &BufferUi::new())
            .await
            .expect("execute");
        assert_eq!(result.outcome, Outcome::ToolError { exit_code: 4 });
    }

    #[tokio::test]
    async fn missing_program_fails_to_start() {
        let spec = ExecSpec::new("/nonexistent/bin/py.test", Vec::new());
        assert_matches!(
            capture(&spec, &RunOptions::default()).await,
            Err(ExecError::ToolStart { .. })
        );
    }

    #[tokio::test]
    async fn env_and_working_dir_are_applied() {
        let script = write_temp_script("echo \"$IMAGECHECK_TEST_VAR\"\npwd\n");
        let dir = tempfile::tempdir().expect("tempdir");
        let mut spec = spec_for(&script, &[]);
        spec.env = BTreeMap::from([("IMAGECHECK_TEST_VAR".to_string(), "hello".to_string())]);
        spec.working_dir = Some(dir.path().to_path_buf());

        let captured = capture(&spec, &RunOptions::default()).await.expect("execute");
        let mut lines = captured.stdout.lines();
        assert_eq!(lines.next(), Some("hello"));
        let cwd = std::fs::canonicalize(lines.next().expect("pwd line")).expect("canonicalize");
        assert_eq!(cwd, std::fs::canonicalize(dir.path()).expect("canonicalize"));
    }

    #[tokio::test]
    async fn large_output_on_both_streams_does_not_deadlock() {
        // Well past a typical 64 KiB pipe buffer on each stream.
        let script = write_temp_script(
            "i=0\nwhile [ $i -lt 5000 ]; do\n  echo \"out line $i padding padding padding\"\n  echo \"err line $i padding padding padding\" >&2\n  i=$((i+1))\ndone\n",
        );
        let captured = capture(&spec_for(&script, &[]), &RunOptions::with_timeout(Duration::from_secs(30)))
            .await
            .expect("execute");
        assert_eq!(captured.exit_code, 0);
        assert_eq!(captured.stdout.lines().count(), 5000);
        assert_eq!(captured.stderr.lines().count(), 5000);
    }

    #[tokio::test]
    async fn timeout_kills_the_child() {
        let script = write_temp_script("sleep 30\n");
        let result = capture(
            &spec_for(&script, &[]),
            &RunOptions::with_timeout(Duration::from_millis(200)),
        )
        .await;
        assert_matches!(result, Err(ExecError::Timeout(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_execution() {
        let script = write_temp_script("sleep 30\n");
        let options = RunOptions::default();
        let cancel = options.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        });

        let start = Instant::now();
        let result = capture(&spec_for(&script, &[]), &options).await;
        assert_matches!(result, Err(ExecError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn timeout_covers_background_process_holding_the_pipes() {
        let script = write_temp_script("sleep 5 &\necho started\nexit 0\n");
        let start = Instant::now();
        let result = capture(
            &spec_for(&script, &[]),
            &RunOptions::with_timeout(Duration::from_millis(500)),
        )
        .await;
        assert_matches!(result, Err(ExecError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn cancellation_covers_background_process_holding_the_pipes() {
        let script = write_temp_script("sleep 5 &\necho started\nexit 0\n");
        let options = RunOptions::default();
        let cancel = options.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            cancel.cancel();
        });

        let start = Instant::now();
        let result = capture(&spec_for(&script, &[]), &options).await;
        assert_matches!(result, Err(ExecError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
