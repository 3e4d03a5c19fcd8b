/// Grader - High-Level Orchestration
///
/// **Responsibility:**
/// Coordinate harness construction, execution and evaluation for one
/// submission.
///
/// **Architecture:**
/// 1. Validate the submission and build a harness (harness.rs)
/// 2. Run it locally per case (engine.rs) or remotely as a batch (judge.rs)
/// 3. Score outputs with the evaluator (evaluator.rs)
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (engine's and judge's job)
/// - How comparison works (evaluator's job)
///
/// Per-case failures are folded into the report. Only invalid requests,
/// missing entry points, judge protocol failures and internal errors surface
/// as [`GradeError`].

use crate::engine::LocalRunner;
use crate::evaluator::{self, CaseOutput};
use crate::harness::{ArgumentStyle, HarnessBuilder, REMOTE_ENTRY_POINT};
use crate::judge::{JudgeError, RemoteJudgeClient};
use grader_common::config::GraderConfig;
use grader_common::types::{ExecutionResult, GradeError, GradeReport, Submission};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One child process per case on this host
    Local,
    /// One batch submission to the remote judge
    Remote,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Remote => write!(f, "remote"),
        }
    }
}

/// Cancels the grading token when the overall deadline passes
struct DeadlineGuard {
    timer: Option<JoinHandle<()>>,
}

impl DeadlineGuard {
    fn arm(deadline: Option<Duration>, token: &CancellationToken) -> Self {
        let timer = deadline.map(|limit| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!(deadline_ms = limit.as_millis() as u64, "Grading deadline reached");
                token.cancel();
            })
        });
        Self { timer }
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Grades submissions with a local runner and an optional remote judge
#[derive(Debug, Clone)]
pub struct Grader {
    runner: LocalRunner,
    judge: Option<RemoteJudgeClient>,
    deadline: Option<Duration>,
}

impl Grader {
    pub fn new(config: &GraderConfig) -> Result<Self, GradeError> {
        let judge = match &config.judge {
            Some(judge_config) => Some(
                RemoteJudgeClient::new(judge_config.clone())
                    .map_err(|e| GradeError::Internal(format!("failed to build judge client: {}", e)))?,
            ),
            None => None,
        };

        Ok(Self {
            runner: LocalRunner::new(&config.local),
            judge,
            deadline: config.local.deadline_ms.map(Duration::from_millis),
        })
    }

    pub fn has_judge(&self) -> bool {
        self.judge.is_some()
    }

    pub fn runner(&self) -> &LocalRunner {
        &self.runner
    }

    /// Grade one submission
    ///
    /// Cancelling `cancel` (or reaching the configured deadline) stops any
    /// running case; unfinished cases are reported as cancelled.
    #[tracing::instrument(skip(self, submission, mode, cancel), fields(submission_id = %submission.id, mode = %mode))]
    pub async fn grade(
        &self,
        submission: &Submission,
        mode: ExecutionMode,
        cancel: &CancellationToken,
    ) -> Result<GradeReport, GradeError> {
        validate(submission)?;

        if mode == ExecutionMode::Remote && self.judge.is_none() {
            return Err(GradeError::JudgeNotConfigured);
        }

        info!(test_count = submission.test_cases.len(), "Starting grading");
        let started = Instant::now();

        let token = cancel.child_token();
        let _deadline = DeadlineGuard::arm(self.deadline, &token);

        let outputs = match mode {
            ExecutionMode::Local => self.grade_local(submission, &token).await?,
            ExecutionMode::Remote => self.grade_remote(submission, &token).await?,
        };

        // Cross-layer guard: log failed executions before evaluation
        for (index, output) in outputs.iter().enumerate() {
            match &output.result {
                ExecutionResult::Success { .. } => {}
                ExecutionResult::Timeout => warn!(
                    case = index,
                    execution_ms = output.execution_time_ms,
                    "Execution timed out; case cannot pass"
                ),
                other => warn!(
                    case = index,
                    execution_ms = output.execution_time_ms,
                    result = ?other,
                    "Execution failed; case cannot pass"
                ),
            }
        }

        let report = evaluator::evaluate(submission, outputs);

        info!(
            passed = report.passed,
            total = report.total,
            verdict = %report.verdict,
            execution_ms = started.elapsed().as_millis() as u64,
            "Grading complete"
        );

        Ok(report)
    }

    async fn grade_local(
        &self,
        submission: &Submission,
        cancel: &CancellationToken,
    ) -> Result<Vec<CaseOutput>, GradeError> {
        let harness = HarnessBuilder::new(&submission.code)
            .entry_point(submission.entry_point.as_deref())
            .build_local()?;

        Ok(self
            .runner
            .run_cases(&harness, &submission.test_cases, cancel)
            .await)
    }

    async fn grade_remote(
        &self,
        submission: &Submission,
        cancel: &CancellationToken,
    ) -> Result<Vec<CaseOutput>, GradeError> {
        let judge = self.judge.as_ref().ok_or(GradeError::JudgeNotConfigured)?;
        let case_count = submission.test_cases.len();

        let entry_point = submission.entry_point.as_deref().unwrap_or(REMOTE_ENTRY_POINT);
        let harness = HarnessBuilder::new(&submission.code)
            .entry_point(Some(entry_point))
            .argument_style(ArgumentStyle::Spread)
            .build_batch(&submission.test_cases)?;

        let started = Instant::now();
        let fill = |result: ExecutionResult| vec![CaseOutput::new(result); case_count];

        match judge.execute(&harness.source, cancel).await {
            Ok(outcome) => {
                let mut outputs = evaluator::outputs_from_judge(&outcome, case_count);
                // The judge reports one time for the whole batch
                let elapsed = started.elapsed().as_millis() as u64;
                for output in &mut outputs {
                    output.execution_time_ms = elapsed;
                }
                Ok(outputs)
            }
            Err(JudgeError::PollLimitExceeded { attempts }) => {
                warn!(attempts = attempts, "Judge never finished; cases marked as timed out");
                Ok(fill(ExecutionResult::Timeout))
            }
            Err(JudgeError::Cancelled) => Ok(fill(ExecutionResult::Cancelled)),
            Err(e) => Err(GradeError::RemoteProtocol(e.to_string())),
        }
    }
}

/// Reject structurally invalid submissions before anything runs
pub fn validate(submission: &Submission) -> Result<(), GradeError> {
    if submission.code.trim().is_empty() || submission.test_cases.is_empty() {
        return Err(GradeError::InvalidRequest(
            "Missing code or test inputs".to_string(),
        ));
    }
    Ok(())
}
