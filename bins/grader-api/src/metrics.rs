// Prometheus metrics for the grading gateway

use grader_common::types::{GradeError, GradeReport};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, HistogramVec, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    pub static ref SUBMISSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "grader_submissions_total",
        "Graded submissions by execution mode and verdict",
        &["mode", "verdict"]
    )
    .expect("Failed to register grader_submissions_total");

    pub static ref CASE_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "grader_case_outcomes_total",
        "Per-case outcomes by status",
        &["status"]
    )
    .expect("Failed to register grader_case_outcomes_total");

    pub static ref REQUEST_ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "grader_request_errors_total",
        "Requests rejected before a report was produced",
        &["mode", "kind"]
    )
    .expect("Failed to register grader_request_errors_total");

    pub static ref GRADING_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "grader_grading_duration_seconds",
        "Wall-clock time to grade one submission",
        &["mode"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("Failed to register grader_grading_duration_seconds");
}

pub fn record_report(mode: &str, report: &GradeReport) {
    let verdict = report.verdict.to_string();
    SUBMISSIONS_TOTAL
        .with_label_values(&[mode, verdict.as_str()])
        .inc();
    for case in &report.results {
        CASE_OUTCOMES_TOTAL
            .with_label_values(&[case.status.as_str()])
            .inc();
    }
}

pub fn record_error(mode: &str, error: &GradeError) {
    let kind = match error {
        GradeError::InvalidRequest(_) => "invalid_request",
        GradeError::NoFunctionFound { .. } => "no_function_found",
        GradeError::RemoteProtocol(_) => "remote_protocol",
        GradeError::JudgeNotConfigured => "judge_not_configured",
        GradeError::Internal(_) => "internal",
    };
    REQUEST_ERRORS_TOTAL.with_label_values(&[mode, kind]).inc();
}

/// Render every registered metric in the text exposition format
pub fn render() -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
