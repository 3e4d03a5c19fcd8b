/// Test Evaluator - Structural Comparison and Scoring
///
/// **Core Responsibility:**
/// Compare execution results against expected outputs and build the report.
///
/// **Critical Properties:**
/// - Knows nothing about processes or the remote judge transport
/// - Pure function: (submission, execution results) → report
/// - Always yields exactly one record per test case, in input order
///
/// **Comparison Rules:**
/// - Values are compared structurally as JSON
/// - Integers and floats with the same numeric value are equal (4 == 4.0)
/// - No coercion across kinds: `true` never equals `1`, `"1"` never equals `1`
/// - Object key order is irrelevant, array order is not
/// - A missing expected output marks the case as unchecked and correct
///
/// **Verdict Rules:**
/// - Accepted when every case is correct
/// - Runtime Error when any case did not run to completion
/// - Wrong Answer otherwise

use crate::harness::{parse_document, HarnessDocument};
use crate::judge::{JudgeOutcome, JudgeStatus};
use chrono::Utc;
use grader_common::types::{
    CaseReport, CaseStatus, ExecutionResult, GradeReport, Submission, TestCase, Verdict,
};
use serde_json::Value;
use tracing::debug;

/// Execution result for a single test case
/// Produced by the engine or split from a judge batch, consumed by the Evaluator
#[derive(Debug, Clone, PartialEq)]
pub struct CaseOutput {
    pub result: ExecutionResult,
    pub execution_time_ms: u64,
}

impl CaseOutput {
    pub fn new(result: ExecutionResult) -> Self {
        Self {
            result,
            execution_time_ms: 0,
        }
    }
}

/// Structural equality with numeric comparison across int/float
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => numbers_equal(a, b),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).map_or(false, |y| values_equal(x, y)))
        }
        _ => actual == expected,
    }
}

fn numbers_equal(a: &serde_json::Number, b: &serde_json::Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// Evaluate a single test case
///
/// Status priority follows the execution result first; output comparison
/// only happens when the candidate returned a value.
pub fn evaluate_case(index: usize, case: &TestCase, output: &CaseOutput) -> CaseReport {
    let mut report = CaseReport {
        index,
        input: case.input.clone(),
        actual: None,
        expected: case.expected.clone(),
        error: None,
        trace: None,
        stdout: None,
        stderr: None,
        compile_output: None,
        status: CaseStatus::Passed,
        correct: false,
        execution_time_ms: output.execution_time_ms,
    };

    match &output.result {
        ExecutionResult::Success { output: actual } => {
            report.actual = Some(actual.clone());
            match &case.expected {
                None => {
                    report.status = CaseStatus::Unchecked;
                    report.correct = true;
                }
                Some(expected) if values_equal(actual, expected) => {
                    report.status = CaseStatus::Passed;
                    report.correct = true;
                }
                Some(_) => report.status = CaseStatus::WrongAnswer,
            }
        }
        ExecutionResult::RuntimeFailure { message, trace } => {
            report.status = CaseStatus::RuntimeError;
            report.error = Some(message.clone());
            report.trace = trace.clone();
        }
        ExecutionResult::Timeout => {
            report.status = CaseStatus::TimeLimitExceeded;
            report.error = Some("Code execution timed out".to_string());
        }
        ExecutionResult::MalformedOutput { stdout, stderr } => {
            report.status = CaseStatus::MalformedOutput;
            report.error = Some("Invalid output format".to_string());
            report.stdout = Some(stdout.clone());
            report.stderr = non_empty(stderr);
        }
        ExecutionResult::JudgeFailure {
            description,
            stderr,
            compile_output,
        } => {
            report.status = CaseStatus::JudgeError;
            report.error = Some(description.clone());
            report.stderr = non_empty(stderr);
            report.compile_output = non_empty(compile_output);
        }
        ExecutionResult::Cancelled => {
            report.status = CaseStatus::Cancelled;
            report.error = Some("Grading was cancelled before this case completed".to_string());
        }
    }

    report
}

fn non_empty(text: &str) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Derive the submission verdict from per-case records
pub fn verdict_for(results: &[CaseReport]) -> Verdict {
    if results.iter().all(|r| r.correct) {
        Verdict::Accepted
    } else if results.iter().any(|r| !r.status.executed()) {
        Verdict::RuntimeError
    } else {
        Verdict::WrongAnswer
    }
}

/// Aggregate outputs into the final report
///
/// Outputs are matched to cases by position. A case with no output (short
/// batch) is recorded as malformed so the report always covers every case.
pub fn aggregate_results(outputs: &[CaseOutput], submission: &Submission) -> GradeReport {
    let missing = CaseOutput::new(ExecutionResult::MalformedOutput {
        stdout: String::new(),
        stderr: String::new(),
    });

    let results: Vec<CaseReport> = submission
        .test_cases
        .iter()
        .enumerate()
        .map(|(index, case)| evaluate_case(index, case, outputs.get(index).unwrap_or(&missing)))
        .collect();

    for report in &results {
        debug!(
            index = report.index,
            status = %report.status,
            correct = report.correct,
            execution_time_ms = report.execution_time_ms,
            "Evaluated test case"
        );
    }

    let passed = results.iter().filter(|r| r.correct).count();
    let total = results.len();
    let verdict = verdict_for(&results);

    debug!(
        submission_id = %submission.id,
        passed = passed,
        total = total,
        verdict = %verdict,
        "Evaluation complete"
    );

    GradeReport {
        submission_id: submission.id,
        graded_at: Utc::now(),
        all_passed: passed == total,
        results,
        passed,
        total,
        verdict,
    }
}

/// Evaluate all test cases and produce the final report
pub fn evaluate(submission: &Submission, outputs: Vec<CaseOutput>) -> GradeReport {
    aggregate_results(&outputs, submission)
}

/// Split one terminal judge outcome into per-case outputs
///
/// - Accepted with a JSON array on stdout: one output per record
/// - Accepted with anything else: every case is malformed
/// - Time limit exceeded: every case timed out
/// - Any other terminal status: every case carries the judge failure
pub fn outputs_from_judge(outcome: &JudgeOutcome, case_count: usize) -> Vec<CaseOutput> {
    let fill = |result: ExecutionResult| vec![CaseOutput::new(result); case_count];

    match outcome.status {
        JudgeStatus::Accepted => {
            match parse_document::<Vec<HarnessDocument>>(&outcome.stdout) {
                // Short batches are padded by aggregate_results
                Some(documents) => documents
                    .into_iter()
                    .take(case_count)
                    .map(|doc| CaseOutput::new(doc.into()))
                    .collect(),
                None => fill(ExecutionResult::MalformedOutput {
                    stdout: outcome.stdout.clone(),
                    stderr: outcome.stderr.clone(),
                }),
            }
        }
        JudgeStatus::TimeLimitExceeded => fill(ExecutionResult::Timeout),
        _ => fill(ExecutionResult::JudgeFailure {
            description: outcome.description.clone(),
            stderr: outcome.stderr.clone(),
            compile_output: outcome.compile_output.clone(),
        }),
    }
}
