// In-process Judge0 stand-in for client and grader tests

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use grader_common::config::JudgeConfig;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct FakeJudgeState {
    /// Status ids returned by successive polls; the last one repeats
    pub statuses: Mutex<VecDeque<u32>>,
    pub stdout: Mutex<Option<String>>,
    pub stderr: Mutex<Option<String>>,
    pub compile_output: Mutex<Option<String>>,
    /// When set, submissions without this `X-RapidAPI-Key` are rejected
    pub required_key: Mutex<Option<String>>,
    pub polls: AtomicUsize,
    pub submissions: Mutex<Vec<Value>>,
    pub submit_queries: Mutex<Vec<HashMap<String, String>>>,
    pub poll_queries: Mutex<Vec<HashMap<String, String>>>,
    pub headers: Mutex<Vec<HeaderMap>>,
}

pub struct FakeJudge {
    pub url: String,
    pub state: Arc<FakeJudgeState>,
}

impl FakeJudge {
    pub async fn start(statuses: &[u32]) -> Self {
        let state = Arc::new(FakeJudgeState::default());
        state.statuses.lock().unwrap().extend(statuses.iter().copied());

        let app = Router::new()
            .route("/submissions", post(submit))
            .route("/submissions/:token", get(poll))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn with_stdout(self, stdout: &str) -> Self {
        *self.state.stdout.lock().unwrap() = Some(stdout.to_string());
        self
    }

    pub fn with_compile_output(self, text: &str) -> Self {
        *self.state.compile_output.lock().unwrap() = Some(text.to_string());
        self
    }

    pub fn with_required_key(self, key: &str) -> Self {
        *self.state.required_key.lock().unwrap() = Some(key.to_string());
        self
    }

    pub fn config(&self) -> JudgeConfig {
        JudgeConfig {
            base_url: self.url.clone(),
            api_key: Some("test-key".to_string()),
            api_host: Some("judge.test".to_string()),
            poll_interval_ms: 10,
            max_polls: 5,
            request_timeout_ms: 2000,
            ..JudgeConfig::default()
        }
    }

    pub fn polls(&self) -> usize {
        self.state.polls.load(Ordering::SeqCst)
    }

    /// Decoded source of the most recent submission
    pub fn submitted_source(&self) -> String {
        let submissions = self.state.submissions.lock().unwrap();
        let encoded = submissions
            .last()
            .and_then(|body| body["source_code"].as_str())
            .unwrap_or_default();
        String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap()
    }
}

/// Encode the way Judge0 does, with a line break every 60 characters
pub fn wrapped_base64(text: &str) -> String {
    let encoded = STANDARD.encode(text);
    encoded
        .as_bytes()
        .chunks(60)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

fn description(id: u32) -> &'static str {
    match id {
        1 => "In Queue",
        2 => "Processing",
        3 => "Accepted",
        5 => "Time Limit Exceeded",
        6 => "Compilation Error",
        11 => "Runtime Error (NZEC)",
        13 => "Internal Error",
        _ => "Unknown",
    }
}

async fn submit(
    State(state): State<Arc<FakeJudgeState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let required = state.required_key.lock().unwrap().clone();
    if let Some(required) = required {
        let supplied = headers
            .get("X-RapidAPI-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if supplied != required {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({"message": "Invalid API key"})),
            );
        }
    }

    state.submit_queries.lock().unwrap().push(query);
    state.headers.lock().unwrap().push(headers);
    state.submissions.lock().unwrap().push(body);

    (StatusCode::CREATED, Json(json!({"token": "tok-1"})))
}

async fn poll(
    State(state): State<Arc<FakeJudgeState>>,
    Path(token): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    state.polls.fetch_add(1, Ordering::SeqCst);
    state.poll_queries.lock().unwrap().push(query);

    if token != "tok-1" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "submission not found"})),
        );
    }

    let id = {
        let mut statuses = state.statuses.lock().unwrap();
        if statuses.len() > 1 {
            statuses.pop_front().unwrap_or(3)
        } else {
            statuses.front().copied().unwrap_or(3)
        }
    };

    let terminal = id > 2;
    let field = |slot: &Mutex<Option<String>>| -> Value {
        match slot.lock().unwrap().as_deref() {
            Some(text) if terminal => Value::String(wrapped_base64(text)),
            _ => Value::Null,
        }
    };

    (
        StatusCode::OK,
        Json(json!({
            "status": {"id": id, "description": description(id)},
            "stdout": field(&state.stdout),
            "stderr": field(&state.stderr),
            "compile_output": field(&state.compile_output),
        })),
    )
}
