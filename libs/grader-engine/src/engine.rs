/// Execution Engine - Out-of-Process Harness Runner
///
/// **Core Responsibility:**
/// Execute a harness once per test case as an independent OS process and
/// capture its raw output.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (process spawn, scratch files, timeout)
/// - Engine does NOT compare outputs against expectations
/// - Engine returns one ExecutionResult per case for the Evaluator
///
/// **Process Rules:**
/// 1. Each case gets a fresh scratch directory holding `harness.py` and
///    `case.json`; the directory is removed on every exit path
/// 2. The child runs in its own process group with no stdin
/// 3. stdout/stderr are drained concurrently while waiting
/// 4. On timeout or cancellation the whole process group is killed and the
///    child is reaped before returning; after a normal exit the group is
///    still killed so leftover background processes cannot hold the pipes
/// 5. stdout must hold exactly one harness document, anything else is
///    classified as malformed output

use crate::evaluator::CaseOutput;
use crate::harness::{case_payload, parse_document, Harness, HarnessDocument};
use anyhow::{bail, Context, Result};
use futures_util::stream::{self, StreamExt};
use grader_common::config::LocalConfig;
use grader_common::types::{ExecutionResult, TestCase};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Safety limits to keep pathological submissions away from the filesystem
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
const MAX_CAPTURE_BYTES: u64 = 1024 * 1024; // per stream

/// How long to wait for a killed child and its pipes to wind down
const REAP_GRACE: Duration = Duration::from_secs(2);

/// Raw result of one child process, before classification
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub pid: Option<u32>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub cancelled: bool,
    pub execution_time_ms: u64,
}

/// Map raw process output to an execution result.
///
/// A timeout or cancellation wins over whatever partial output was captured.
pub fn classify(output: ProcessOutput) -> ExecutionResult {
    if output.cancelled {
        return ExecutionResult::Cancelled;
    }
    if output.timed_out {
        return ExecutionResult::Timeout;
    }
    match parse_document::<HarnessDocument>(&output.stdout) {
        Some(document) => document.into(),
        None => ExecutionResult::MalformedOutput {
            stdout: output.stdout,
            stderr: output.stderr,
        },
    }
}

/// Runs harness scripts as child processes with a wall-clock bound
#[derive(Debug, Clone)]
pub struct LocalRunner {
    interpreter: String,
    timeout: Duration,
    max_parallel_cases: usize,
    scratch_dir: Option<PathBuf>,
}

impl LocalRunner {
    pub fn new(config: &LocalConfig) -> Self {
        Self {
            interpreter: config.interpreter.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
            max_parallel_cases: config.max_parallel_cases,
            scratch_dir: config.scratch_dir.clone(),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of cases run at once; 0 in the config means one per core
    pub fn parallelism(&self) -> usize {
        if self.max_parallel_cases > 0 {
            return self.max_parallel_cases;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    /// Execute every case, at most `parallelism()` at a time.
    ///
    /// Results come back in the order of `cases` no matter which process
    /// finishes first. A failing case never stops its siblings.
    pub async fn run_cases(
        &self,
        harness: &Harness,
        cases: &[TestCase],
        cancel: &CancellationToken,
    ) -> Vec<CaseOutput> {
        let workers = self.parallelism().clamp(1, cases.len().max(1));

        debug!(
            cases = cases.len(),
            workers = workers,
            timeout_ms = self.timeout.as_millis() as u64,
            "Executing test cases locally"
        );

        // Concrete futures rather than a borrowing `map` closure, or the
        // stream is not `Send` for every lifetime
        let runs: Vec<_> = cases
            .iter()
            .enumerate()
            .map(|(index, case)| self.run_case(index, harness, case, cancel))
            .collect();

        stream::iter(runs)
            .buffered(workers)
            .collect()
            .await
    }

    /// Execute a single case and classify the result
    #[tracing::instrument(skip(self, harness, case, cancel), fields(entry_point = %harness.entry_point))]
    pub async fn run_case(
        &self,
        index: usize,
        harness: &Harness,
        case: &TestCase,
        cancel: &CancellationToken,
    ) -> CaseOutput {
        if cancel.is_cancelled() {
            return CaseOutput {
                result: ExecutionResult::Cancelled,
                execution_time_ms: 0,
            };
        }

        match self.execute(&harness.source, &case_payload(case), cancel).await {
            Ok(output) => {
                let execution_time_ms = output.execution_time_ms;
                if output.timed_out {
                    warn!(
                        execution_time_ms = execution_time_ms,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Test execution timed out"
                    );
                } else if output.exit_code != Some(0) && !output.cancelled {
                    debug!(exit_code = ?output.exit_code, "Harness exited with non-zero status");
                }
                CaseOutput {
                    result: classify(output),
                    execution_time_ms,
                }
            }
            Err(e) => {
                error!(error = %e, "Failed to execute harness");
                CaseOutput {
                    result: ExecutionResult::RuntimeFailure {
                        message: format!("Execution error: {:#}", e),
                        trace: None,
                    },
                    execution_time_ms: 0,
                }
            }
        }
    }

    /// Run `source` with `payload` as its side-channel case file.
    ///
    /// Errors are infrastructure failures (scratch dir, spawn, wait); anything
    /// the child itself does is reported through [`ProcessOutput`].
    pub async fn execute(
        &self,
        source: &str,
        payload: &str,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        if source.len() > MAX_SOURCE_CODE_BYTES {
            bail!("Source code exceeds maximum size of {} bytes", MAX_SOURCE_CODE_BYTES);
        }

        // Dropped on every return path, which deletes the directory
        let scratch = self.scratch()?;
        let script = scratch.path().join("harness.py");
        let case_file = scratch.path().join("case.json");

        tokio::fs::write(&script, source)
            .await
            .context("Failed to write harness script")?;
        tokio::fs::write(&case_file, payload)
            .await
            .context("Failed to write test case file")?;

        let mut command = Command::new(&self.interpreter);
        command
            .arg(&script)
            .arg(&case_file)
            .current_dir(scratch.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let start_time = Instant::now();
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn interpreter '{}'", self.interpreter))?;
        let pid = child.id();

        let stdout_task = tokio::spawn(capture(child.stdout.take()));
        let stderr_task = tokio::spawn(capture(child.stderr.take()));

        let mut timed_out = false;
        let mut cancelled = false;

        let status = tokio::select! {
            status = child.wait() => Some(status.context("Failed to wait for harness process")?),
            _ = tokio::time::sleep(self.timeout) => {
                timed_out = true;
                None
            }
            _ = cancel.cancelled() => {
                cancelled = true;
                None
            }
        };

        match status {
            None => terminate(&mut child, pid).await,
            // Background processes left by the candidate would hold the pipes open
            Some(_) => kill_group(pid),
        }

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        let stdout = collect(stdout_task).await;
        let stderr = collect(stderr_task).await;

        Ok(ProcessOutput {
            pid,
            stdout,
            stderr,
            exit_code: status.and_then(|s| s.code()),
            timed_out,
            cancelled,
            execution_time_ms,
        })
    }

    fn scratch(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("grader-");
        let dir = match &self.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        dir.context("Failed to create scratch directory")
    }
}

/// SIGKILL everything still running in the child's process group
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = pid {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                debug!(pid = pid, error = %e, "Process group already gone");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;
}

/// Kill the child's process group, then the child itself, and reap it
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);

    if let Err(e) = child.start_kill() {
        debug!(pid = ?pid, error = %e, "Child already exited before kill");
    }

    match tokio::time::timeout(REAP_GRACE, child.wait()).await {
        Ok(Ok(status)) => debug!(pid = ?pid, status = %status, "Killed harness process reaped"),
        Ok(Err(e)) => warn!(pid = ?pid, error = %e, "Failed to reap killed harness process"),
        Err(_) => warn!(pid = ?pid, "Harness process did not exit after kill"),
    }
}

/// Read a pipe to the end, keeping at most `MAX_CAPTURE_BYTES`
async fn capture<R>(reader: Option<R>) -> Vec<u8>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buffer = Vec::new();
    let Some(reader) = reader else {
        return buffer;
    };

    let mut limited = reader.take(MAX_CAPTURE_BYTES);
    if limited.read_to_end(&mut buffer).await.is_err() {
        return buffer;
    }

    // Keep draining so the child never blocks on a full pipe
    let mut rest = limited.into_inner();
    let _ = tokio::io::copy(&mut rest, &mut tokio::io::sink()).await;
    buffer
}

async fn collect(mut task: JoinHandle<Vec<u8>>) -> String {
    match tokio::time::timeout(REAP_GRACE, &mut task).await {
        Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        Ok(Err(e)) => {
            warn!(error = %e, "Output reader task failed");
            String::new()
        }
        Err(_) => {
            warn!("Output pipe still open after process exit");
            task.abort();
            String::new()
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh_runner(timeout_ms: u64, scratch: Option<PathBuf>) -> LocalRunner {
        LocalRunner::new(&LocalConfig {
            interpreter: "sh".to_string(),
            timeout_ms,
            max_parallel_cases: 0,
            scratch_dir: scratch,
            deadline_ms: None,
        })
    }

    fn script(source: &str) -> Harness {
        Harness {
            source: source.to_string(),
            entry_point: "solution".to_string(),
        }
    }

    fn output(stdout: &str, stderr: &str) -> ProcessOutput {
        ProcessOutput {
            pid: None,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: Some(0),
            timed_out: false,
            cancelled: false,
            execution_time_ms: 1,
        }
    }

    #[test]
    fn test_classify_success() {
        let result = classify(output("{\"status\": \"success\", \"output\": 4}\n", ""));
        assert_eq!(result, ExecutionResult::Success { output: json!(4) });
    }

    #[test]
    fn test_classify_crash_is_malformed() {
        let mut raw = output("", "SyntaxError: invalid syntax");
        raw.exit_code = Some(1);
        assert_eq!(
            classify(raw),
            ExecutionResult::MalformedOutput {
                stdout: String::new(),
                stderr: "SyntaxError: invalid syntax".to_string(),
            }
        );
    }

    #[test]
    fn test_classify_timeout_beats_partial_output() {
        let mut raw = output("{\"status\": \"success\", \"output\": 4}", "");
        raw.timed_out = true;
        assert_eq!(classify(raw), ExecutionResult::Timeout);
    }

    #[tokio::test]
    async fn test_success_document() {
        let runner = sh_runner(5000, None);
        let harness = script("echo '{\"status\": \"success\", \"output\": [1, 2]}'\n");
        let case = TestCase::new(json!(1), None);

        let out = runner.run_case(0, &harness, &case, &CancellationToken::new()).await;
        assert_eq!(out.result, ExecutionResult::Success { output: json!([1, 2]) });
    }

    #[tokio::test]
    async fn test_case_is_passed_through_side_channel_file() {
        let runner = sh_runner(5000, None);
        let harness = script("printf '{\"status\": \"success\", \"output\": %s}' \"$(cat \"$1\")\"\n");
        let case = TestCase::new(json!({"a": [1, "two"]}), Some(json!(0)));

        let out = runner.run_case(0, &harness, &case, &CancellationToken::new()).await;
        assert_eq!(
            out.result,
            ExecutionResult::Success {
                output: json!({"input": {"a": [1, "two"]}})
            }
        );
    }

    #[tokio::test]
    async fn test_error_document() {
        let runner = sh_runner(5000, None);
        let harness = script(
            "echo '{\"status\": \"error\", \"error\": \"boom\", \"trace\": \"Traceback\"}'\n",
        );
        let case = TestCase::new(json!(1), None);

        let out = runner.run_case(0, &harness, &case, &CancellationToken::new()).await;
        assert_eq!(
            out.result,
            ExecutionResult::RuntimeFailure {
                message: "boom".to_string(),
                trace: Some("Traceback".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_multiple_documents_are_malformed() {
        let runner = sh_runner(5000, None);
        let harness = script(
            "echo '{\"status\": \"success\", \"output\": 1}'\necho '{\"status\": \"success\", \"output\": 2}'\n",
        );
        let case = TestCase::new(json!(1), None);

        let out = runner.run_case(0, &harness, &case, &CancellationToken::new()).await;
        assert!(matches!(out.result, ExecutionResult::MalformedOutput { .. }));
    }

    #[tokio::test]
    async fn test_crash_keeps_raw_streams() {
        let runner = sh_runner(5000, None);
        let harness = script("echo partial\necho 'fatal: exploded' >&2\nexit 3\n");
        let case = TestCase::new(json!(1), None);

        let out = runner.run_case(0, &harness, &case, &CancellationToken::new()).await;
        match out.result {
            ExecutionResult::MalformedOutput { stdout, stderr } => {
                assert_eq!(stdout.trim(), "partial");
                assert!(stderr.contains("fatal: exploded"));
            }
            other => panic!("expected malformed output, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reaps_child() {
        let runner = sh_runner(300, None);
        let started = Instant::now();

        let out = runner
            .execute("sleep 30\n", "{}", &CancellationToken::new())
            .await
            .unwrap();

        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(classify(out.clone()), ExecutionResult::Timeout);

        let pid = out.pid.expect("child should have a pid");
        let alive = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None);
        assert!(alive.is_err(), "timed out process {} is still running", pid);
    }

    #[tokio::test]
    async fn test_background_process_does_not_hold_output() {
        let runner = sh_runner(5000, None);
        let started = Instant::now();

        let out = runner
            .execute(
                "sleep 30 &\necho '{\"status\": \"success\", \"output\": 1}'\n",
                "{}",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(!out.timed_out);
        assert!(started.elapsed() < REAP_GRACE);
        assert_eq!(classify(out), ExecutionResult::Success { output: json!(1) });
    }

    #[tokio::test]
    async fn test_cancellation_stops_child() {
        let runner = sh_runner(30_000, None);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let out = runner.execute("sleep 30\n", "{}", &cancel).await.unwrap();

        assert!(out.cancelled);
        assert!(!out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(classify(out), ExecutionResult::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_spawn() {
        let scratch = tempfile::tempdir().unwrap();
        let runner = sh_runner(5000, Some(scratch.path().to_path_buf()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let out = runner
            .run_case(0, &script("exit 0\n"), &TestCase::new(json!(1), None), &cancel)
            .await;
        assert_eq!(out.result, ExecutionResult::Cancelled);
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_scratch_dir_removed_on_every_path() {
        let scratch = tempfile::tempdir().unwrap();
        let runner = sh_runner(200, Some(scratch.path().to_path_buf()));
        let cancel = CancellationToken::new();

        runner.execute("echo ok\n", "{}", &cancel).await.unwrap();
        runner.execute("sleep 30\n", "{}", &cancel).await.unwrap();
        runner.execute("exit 7\n", "{}", &cancel).await.unwrap();

        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_runtime_failure() {
        let runner = LocalRunner::new(&LocalConfig {
            interpreter: "/nonexistent/python3".to_string(),
            ..LocalConfig::default()
        });
        let out = runner
            .run_case(0, &script("pass\n"), &TestCase::new(json!(1), None), &CancellationToken::new())
            .await;
        match out.result {
            ExecutionResult::RuntimeFailure { message, .. } => {
                assert!(message.contains("Failed to spawn interpreter"));
            }
            other => panic!("expected runtime failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_parallel_cases_keep_input_order() {
        let runner = LocalRunner::new(&LocalConfig {
            interpreter: "sh".to_string(),
            max_parallel_cases: 3,
            ..LocalConfig::default()
        });
        // Larger inputs sleep longer, so completion order is reversed
        let harness = script(
            "n=$(tr -cd '0-9' < \"$1\")\nsleep \"0.$n\"\nprintf '{\"status\": \"success\", \"output\": %s}\\n' \"$n\"\n",
        );
        let cases: Vec<TestCase> = [3, 2, 1]
            .iter()
            .map(|n| TestCase::new(json!(n), None))
            .collect();

        let outputs = runner.run_cases(&harness, &cases, &CancellationToken::new()).await;

        let values: Vec<_> = outputs.into_iter().map(|o| o.result).collect();
        assert_eq!(
            values,
            vec![
                ExecutionResult::Success { output: json!(3) },
                ExecutionResult::Success { output: json!(2) },
                ExecutionResult::Success { output: json!(1) },
            ]
        );
    }

    #[test]
    fn test_parallelism_defaults_to_cores() {
        let runner = sh_runner(1000, None);
        assert!(runner.parallelism() >= 1);
    }
}
