/// Remote Judge Client - Judge0 Submit/Poll Protocol
///
/// **Core Responsibility:**
/// Run a batch harness on a Judge0 compatible backend and return its terminal
/// outcome with decoded output streams.
///
/// **Protocol:**
/// 1. Submit: `POST /submissions?base64_encoded=true&wait=false&fields=token`
///    with `{language_id, source_code, stdin}` (both texts base64) → `{token}`
/// 2. Poll: `GET /submissions/{token}?base64_encoded=true&fields=...` at a
///    fixed interval while the status is In Queue (1) or Processing (2)
/// 3. On any other status, decode stdout/stderr/compile_output and return
///
/// **Bounds:**
/// - At most `max_polls` status requests per submission
/// - Every request and every sleep races the caller's cancellation token
/// - No sleep after the final poll

use base64::{engine::general_purpose::STANDARD, Engine as _};
use grader_common::config::JudgeConfig;
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const POLL_FIELDS: &str = "stdout,stderr,compile_output,status";

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("request to judge failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("judge returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("could not decode judge response: {0}")]
    Decode(String),

    #[error("judge did not finish after {attempts} polls")]
    PollLimitExceeded { attempts: u32 },

    #[error("wait for judge result was cancelled")]
    Cancelled,
}

/// Judge0 status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeStatus {
    InQueue,
    Processing,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    CompilationError,
    /// Ids 7..=12 (SIGSEGV, SIGXFSZ, SIGFPE, SIGABRT, NZEC, Other)
    RuntimeError(u32),
    InternalError,
    ExecFormatError,
    Unknown(u32),
}

impl JudgeStatus {
    pub fn from_id(id: u32) -> Self {
        match id {
            1 => JudgeStatus::InQueue,
            2 => JudgeStatus::Processing,
            3 => JudgeStatus::Accepted,
            4 => JudgeStatus::WrongAnswer,
            5 => JudgeStatus::TimeLimitExceeded,
            6 => JudgeStatus::CompilationError,
            7..=12 => JudgeStatus::RuntimeError(id),
            13 => JudgeStatus::InternalError,
            14 => JudgeStatus::ExecFormatError,
            other => JudgeStatus::Unknown(other),
        }
    }

    pub fn id(&self) -> u32 {
        match self {
            JudgeStatus::InQueue => 1,
            JudgeStatus::Processing => 2,
            JudgeStatus::Accepted => 3,
            JudgeStatus::WrongAnswer => 4,
            JudgeStatus::TimeLimitExceeded => 5,
            JudgeStatus::CompilationError => 6,
            JudgeStatus::RuntimeError(id) => *id,
            JudgeStatus::InternalError => 13,
            JudgeStatus::ExecFormatError => 14,
            JudgeStatus::Unknown(id) => *id,
        }
    }

    /// Only queued and processing submissions need another poll
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JudgeStatus::InQueue | JudgeStatus::Processing)
    }

    /// Fallback label when the judge sends no description
    pub fn description(&self) -> &'static str {
        match self {
            JudgeStatus::InQueue => "In Queue",
            JudgeStatus::Processing => "Processing",
            JudgeStatus::Accepted => "Accepted",
            JudgeStatus::WrongAnswer => "Wrong Answer",
            JudgeStatus::TimeLimitExceeded => "Time Limit Exceeded",
            JudgeStatus::CompilationError => "Compilation Error",
            JudgeStatus::RuntimeError(_) => "Runtime Error",
            JudgeStatus::InternalError => "Internal Error",
            JudgeStatus::ExecFormatError => "Exec Format Error",
            JudgeStatus::Unknown(_) => "Unknown Status",
        }
    }
}

/// Terminal (or latest) state of one submission, with decoded text fields
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeOutcome {
    pub status: JudgeStatus,
    pub description: String,
    pub stdout: String,
    pub stderr: String,
    pub compile_output: String,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    language_id: u32,
    source_code: String,
    stdin: &'a str,
}

#[derive(Deserialize)]
struct SubmitResponse {
    token: String,
}

#[derive(Deserialize)]
struct PollResponse {
    status: PollStatus,
    #[serde(default)]
    stdout: Option<String>,
    #[serde(default)]
    stderr: Option<String>,
    #[serde(default)]
    compile_output: Option<String>,
}

#[derive(Deserialize)]
struct PollStatus {
    id: u32,
    #[serde(default)]
    description: Option<String>,
}

/// Decode a Judge0 base64 field; the judge wraps long values across lines
fn decode_field(field: Option<String>) -> Result<String, JudgeError> {
    let Some(encoded) = field else {
        return Ok(String::new());
    };
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| JudgeError::Decode(format!("invalid base64 payload: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn cancellable<T, F>(cancel: &CancellationToken, request: F) -> Result<T, JudgeError>
where
    F: Future<Output = Result<T, JudgeError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(JudgeError::Cancelled),
        result = request => result,
    }
}

/// HTTP client for a single Judge0 deployment
#[derive(Debug, Clone)]
pub struct RemoteJudgeClient {
    http: Client,
    config: JudgeConfig,
}

impl RemoteJudgeClient {
    pub fn new(config: JudgeConfig) -> Result<Self, JudgeError> {
        let http = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let mut request = request;
        if let Some(key) = &self.config.api_key {
            request = request.header("X-RapidAPI-Key", key);
        }
        if let Some(host) = &self.config.api_host {
            request = request.header("X-RapidAPI-Host", host);
        }
        if let Some(token) = &self.config.auth_token {
            request = request.header("X-Auth-Token", token);
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, JudgeError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(JudgeError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Enqueue a script without waiting for it to run; returns the token
    pub async fn submit(&self, source: &str) -> Result<String, JudgeError> {
        let body = SubmitRequest {
            language_id: self.config.language_id,
            source_code: STANDARD.encode(source),
            stdin: "",
        };

        let request = self
            .http
            .post(self.url("/submissions"))
            .query(&[("base64_encoded", "true"), ("wait", "false"), ("fields", "token")])
            .json(&body);

        let response: SubmitResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| JudgeError::Decode(format!("submit response: {}", e)))?;

        info!(token = %response.token, language_id = self.config.language_id, "Submitted batch to judge");
        Ok(response.token)
    }

    /// Fetch the current state of a submission
    pub async fn poll_once(&self, token: &str) -> Result<JudgeOutcome, JudgeError> {
        let request = self
            .http
            .get(self.url(&format!("/submissions/{}", token)))
            .query(&[("base64_encoded", "true"), ("fields", POLL_FIELDS)]);

        let response: PollResponse = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|e| JudgeError::Decode(format!("poll response: {}", e)))?;

        let status = JudgeStatus::from_id(response.status.id);
        let description = response
            .status
            .description
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| status.description().to_string());

        Ok(JudgeOutcome {
            status,
            description,
            stdout: decode_field(response.stdout)?,
            stderr: decode_field(response.stderr)?,
            compile_output: decode_field(response.compile_output)?,
        })
    }

    /// Poll until the submission reaches a terminal status
    #[tracing::instrument(skip(self, cancel))]
    pub async fn wait_for_result(
        &self,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<JudgeOutcome, JudgeError> {
        let max_polls = self.config.max_polls.max(1);
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        for attempt in 1..=max_polls {
            let outcome = cancellable(cancel, self.poll_once(token)).await?;

            if outcome.status.is_terminal() {
                info!(
                    status_id = outcome.status.id(),
                    status = %outcome.description,
                    attempts = attempt,
                    "Judge reached terminal status"
                );
                return Ok(outcome);
            }

            debug!(attempt = attempt, status = %outcome.description, "Submission not finished");

            if attempt < max_polls {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(JudgeError::Cancelled),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        }

        warn!(attempts = max_polls, "Giving up on judge submission");
        Err(JudgeError::PollLimitExceeded { attempts: max_polls })
    }

    /// Submit and wait in one call
    pub async fn execute(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<JudgeOutcome, JudgeError> {
        let token = cancellable(cancel, self.submit(source)).await?;
        self.wait_for_result(&token, cancel).await
    }
}
