// Configuration loading for the grading engine
use anyhow::{bail, Context, Result};
use grader_common::config::GraderConfig;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "config/grader.json";

/// Load a config file, then apply environment overrides
pub fn load(config_path: &Path) -> Result<GraderConfig> {
    let mut config = read_file(config_path)?;
    config.apply_env();
    Ok(config)
}

/// Load `config/grader.json` when present, defaults otherwise, then apply
/// environment overrides
pub fn load_default() -> Result<GraderConfig> {
    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    let mut config = if default_path.exists() {
        read_file(default_path)?
    } else {
        debug!(path = DEFAULT_CONFIG_PATH, "No config file found, using defaults");
        GraderConfig::default()
    };
    config.apply_env();
    Ok(config)
}

fn read_file(config_path: &Path) -> Result<GraderConfig> {
    if !config_path.exists() {
        bail!("Grader config file not found: {}", config_path.display());
    }

    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;

    let config: GraderConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", config_path.display()))?;

    info!(
        path = %config_path.display(),
        interpreter = %config.local.interpreter,
        timeout_ms = config.local.timeout_ms,
        judge_enabled = config.judge.is_some(),
        "Loaded grader config"
    );

    Ok(config)
}

/// Pretty JSON for a fresh config file
pub fn render_default() -> Result<String> {
    serde_json::to_string_pretty(&GraderConfig::default()).context("Failed to serialize default config")
}
