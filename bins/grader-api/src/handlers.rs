// HTTP route handlers for the grading gateway

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use grader_common::types::{GradeError, Submission};
use grader_engine::ExecutionMode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct GradeRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, alias = "testInputs")]
    pub test_inputs: Option<Vec<Value>>,
    #[serde(default, alias = "expectedOutputs")]
    pub expected_outputs: Option<Vec<Value>>,
    #[serde(default, alias = "entryPoint")]
    pub entry_point: Option<String>,
}

/// POST /execute - Grade on this host, one process per test case
pub async fn execute(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GradeRequest>, JsonRejection>,
) -> Response {
    grade(&state, ExecutionMode::Local, payload).await
}

/// POST /run-code - Grade on the remote judge as one batch
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<GradeRequest>, JsonRejection>,
) -> Response {
    grade(&state, ExecutionMode::Remote, payload).await
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn prometheus_metrics() -> Response {
    match metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn grade(
    state: &AppState,
    mode: ExecutionMode,
    payload: Result<Json<GradeRequest>, JsonRejection>,
) -> Response {
    let mode_label = mode.to_string();

    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let detail = rejection.body_text();
            warn!(mode = %mode, error = %detail, "Rejected request body");
            let err = GradeError::InvalidRequest(format!("Invalid request body: {}", detail));
            metrics::record_error(&mode_label, &err);
            return error_response(err);
        }
    };

    let submission = match Submission::from_parallel(
        request.code.unwrap_or_default(),
        request.test_inputs.unwrap_or_default(),
        request.expected_outputs.unwrap_or_default(),
    ) {
        Ok(submission) => submission.with_entry_point(request.entry_point),
        Err(e) => {
            metrics::record_error(&mode_label, &e);
            return error_response(e);
        }
    };

    // Dropping the handler future (client went away) cancels the run
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let timer = metrics::GRADING_DURATION_SECONDS
        .with_label_values(&[mode_label.as_str()])
        .start_timer();
    let result = state.grader.grade(&submission, mode, &cancel).await;
    timer.observe_duration();

    match result {
        Ok(report) => {
            info!(
                submission_id = %report.submission_id,
                mode = %mode,
                passed = report.passed,
                total = report.total,
                verdict = %report.verdict,
                "Submission graded"
            );
            metrics::record_report(&mode_label, &report);
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(e) => {
            metrics::record_error(&mode_label, &e);
            error_response(e)
        }
    }
}

fn error_response(err: GradeError) -> Response {
    let status = match &err {
        GradeError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        GradeError::NoFunctionFound { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GradeError::RemoteProtocol(_) => StatusCode::BAD_GATEWAY,
        GradeError::JudgeNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        GradeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let body = match &err {
        GradeError::Internal(_) => {
            error!(error = %err, "Internal grading failure");
            json!({ "error": err.to_string(), "trace": format!("{:?}", err) })
        }
        _ => json!({ "error": err.to_string() }),
    };

    (status, Json(body)).into_response()
}
