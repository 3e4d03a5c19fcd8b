use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// A single test case: an arbitrary JSON input and an optional expected output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<Value>,
}

impl TestCase {
    pub fn new(input: Value, expected: Option<Value>) -> Self {
        Self {
            input,
            expected: expected.filter(|v| !v.is_null()),
        }
    }
}

/// Candidate code plus the ordered test cases it is graded against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    pub test_cases: Vec<TestCase>,
}

impl Submission {
    /// Build a submission from parallel input / expected sequences.
    ///
    /// Inputs and expected outputs are matched strictly by index. The expected
    /// list may be shorter than the inputs; a missing or `null` expected value
    /// leaves that case unchecked.
    pub fn from_parallel(
        code: impl Into<String>,
        test_inputs: Vec<Value>,
        expected_outputs: Vec<Value>,
    ) -> Result<Self, GradeError> {
        let code = code.into();
        if code.trim().is_empty() || test_inputs.is_empty() {
            return Err(GradeError::InvalidRequest(
                "Missing code or test inputs".to_string(),
            ));
        }

        let mut expected = expected_outputs.into_iter();
        let test_cases = test_inputs
            .into_iter()
            .map(|input| TestCase::new(input, expected.next()))
            .collect();

        Ok(Self {
            id: Uuid::new_v4(),
            code,
            entry_point: None,
            test_cases,
        })
    }

    /// Pin the entry point instead of inferring it from the code
    pub fn with_entry_point(mut self, name: Option<String>) -> Self {
        self.entry_point = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        self
    }
}

/// Outcome of executing one test case (local) or one slice of a batch (remote)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    Success {
        output: Value,
    },
    RuntimeFailure {
        message: String,
        trace: Option<String>,
    },
    Timeout,
    MalformedOutput {
        stdout: String,
        stderr: String,
    },
    /// The remote judge reached a terminal status other than accepted
    JudgeFailure {
        description: String,
        stderr: String,
        compile_output: String,
    },
    Cancelled,
}

/// Per-case grading status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Passed,
    /// Executed successfully but no expected output was supplied
    Unchecked,
    WrongAnswer,
    RuntimeError,
    TimeLimitExceeded,
    MalformedOutput,
    JudgeError,
    Cancelled,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Passed => "passed",
            CaseStatus::Unchecked => "unchecked",
            CaseStatus::WrongAnswer => "wrong_answer",
            CaseStatus::RuntimeError => "runtime_error",
            CaseStatus::TimeLimitExceeded => "time_limit_exceeded",
            CaseStatus::MalformedOutput => "malformed_output",
            CaseStatus::JudgeError => "judge_error",
            CaseStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the candidate code ran to completion for this case
    pub fn executed(&self) -> bool {
        matches!(
            self,
            CaseStatus::Passed | CaseStatus::Unchecked | CaseStatus::WrongAnswer
        )
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Submission-level verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Accepted,
    #[serde(rename = "Wrong Answer")]
    WrongAnswer,
    #[serde(rename = "Runtime Error")]
    RuntimeError,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Accepted => write!(f, "Accepted"),
            Verdict::WrongAnswer => write!(f, "Wrong Answer"),
            Verdict::RuntimeError => write!(f, "Runtime Error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseReport {
    pub index: usize,
    pub input: Value,
    pub actual: Option<Value>,
    pub expected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compile_output: Option<String>,
    pub status: CaseStatus,
    pub correct: bool,
    pub execution_time_ms: u64,
}

/// The graded result of one submission, returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeReport {
    pub submission_id: Uuid,
    pub graded_at: DateTime<Utc>,
    pub results: Vec<CaseReport>,
    pub passed: usize,
    pub total: usize,
    pub verdict: Verdict,
    pub all_passed: bool,
}

/// Request-level failures. Per-case failures never surface here; they are
/// folded into the [`GradeReport`].
#[derive(Debug, Error)]
pub enum GradeError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("{}", no_function_message(.expected))]
    NoFunctionFound { expected: Option<String> },

    #[error("remote judge protocol error: {0}")]
    RemoteProtocol(String),

    #[error("remote judge is not configured")]
    JudgeNotConfigured,

    #[error("internal error: {0}")]
    Internal(String),
}

fn no_function_message(expected: &Option<String>) -> String {
    match expected {
        Some(name) => format!("No top-level function named '{}' found in the code", name),
        None => "No function definition found in the code".to_string(),
    }
}

impl GradeError {
    /// True for errors caused by the request itself rather than the engine
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            GradeError::InvalidRequest(_) | GradeError::NoFunctionFound { .. }
        )
    }
}
