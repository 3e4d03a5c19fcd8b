// Engine configuration shared by the API and the CLI

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_MAX_POLLS: u32 = 60;
pub const DEFAULT_LANGUAGE_ID: u32 = 71; // Python 3 on Judge0
pub const DEFAULT_JUDGE_URL: &str = "https://judge0-ce.p.rapidapi.com";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraderConfig {
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub judge: Option<JudgeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// 0 means one worker per available core
    #[serde(default)]
    pub max_parallel_cases: usize,
    /// Parent directory for per-case scratch dirs, system temp dir when unset
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    /// Overall bound on one grading call, across all cases
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_ms: default_timeout_ms(),
            max_parallel_cases: 0,
            scratch_dir: None,
            deadline_ms: None,
        }
    }
}

/// Connection settings for a Judge0 compatible backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    #[serde(default = "default_judge_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub api_host: Option<String>,
    /// `X-Auth-Token` for self-hosted deployments
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_language_id")]
    pub language_id: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_judge_url(),
            api_key: None,
            api_host: None,
            auth_token: None,
            language_id: default_language_id(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_interpreter() -> String {
    "python3".to_string()
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

fn default_judge_url() -> String {
    DEFAULT_JUDGE_URL.to_string()
}

fn default_language_id() -> u32 {
    DEFAULT_LANGUAGE_ID
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_polls() -> u32 {
    DEFAULT_MAX_POLLS
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl GraderConfig {
    /// Override settings from process environment variables
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Override settings from a key lookup.
    ///
    /// Any `JUDGE_*` key enables the remote judge, starting from defaults
    /// when no judge section was configured.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(interpreter) = lookup("GRADER_PYTHON") {
            self.local.interpreter = interpreter;
        }
        if let Some(timeout) = lookup("GRADER_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.local.timeout_ms = timeout;
        }
        if let Some(parallel) = lookup("GRADER_MAX_PARALLEL").and_then(|v| v.parse().ok()) {
            self.local.max_parallel_cases = parallel;
        }
        if let Some(deadline) = lookup("GRADER_DEADLINE_MS").and_then(|v| v.parse().ok()) {
            self.local.deadline_ms = Some(deadline);
        }

        let url = lookup("JUDGE_API_URL");
        let key = lookup("JUDGE_API_KEY");
        let host = lookup("JUDGE_API_HOST");
        let token = lookup("JUDGE_AUTH_TOKEN");
        let language = lookup("JUDGE_LANGUAGE_ID").and_then(|v| v.parse().ok());

        if url.is_none() && key.is_none() && host.is_none() && token.is_none() && language.is_none() {
            return;
        }

        let judge = self.judge.get_or_insert_with(JudgeConfig::default);
        if let Some(url) = url {
            judge.base_url = url;
        }
        if key.is_some() {
            judge.api_key = key;
        }
        if host.is_some() {
            judge.api_host = host;
        }
        if token.is_some() {
            judge.auth_token = token;
        }
        if let Some(language) = language {
            judge.language_id = language;
        }
    }
}
