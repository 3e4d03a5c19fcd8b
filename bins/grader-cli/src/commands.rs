// CLI commands for grading submissions from the terminal
use anyhow::{bail, Context, Result};
use grader_common::config::GraderConfig;
use grader_common::types::Submission;
use grader_engine::harness::{ArgumentStyle, REMOTE_ENTRY_POINT};
use grader_engine::{ExecutionMode, Grader, HarnessBuilder};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Options for the `grade` command
#[derive(Debug, Clone)]
pub struct GradeOptions<'a> {
    pub code: &'a Path,
    pub inputs: &'a Path,
    pub expected: Option<&'a Path>,
    pub entry_point: Option<String>,
    pub remote: bool,
    pub timeout_ms: Option<u64>,
    pub config: Option<&'a Path>,
}

fn read_code(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read code file: {}", path.display()))
}

/// Read a file holding one JSON array
fn read_json_array(path: &Path) -> Result<Vec<Value>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {} as JSON", path.display()))?;
    match value {
        Value::Array(items) => Ok(items),
        _ => bail!("{} must contain a JSON array", path.display()),
    }
}

fn load_config(path: Option<&Path>, timeout_ms: Option<u64>) -> Result<GraderConfig> {
    let mut config = match path {
        Some(path) => grader_engine::config::load(path)?,
        None => grader_engine::config::load_default()?,
    };
    if let Some(timeout_ms) = timeout_ms {
        config.local.timeout_ms = timeout_ms;
    }
    Ok(config)
}

/// Grade a submission and print the report as JSON.
///
/// Returns whether every case passed.
pub async fn grade(options: GradeOptions<'_>) -> Result<bool> {
    let code = read_code(options.code)?;
    let inputs = read_json_array(options.inputs)?;
    let expected = match options.expected {
        Some(path) => read_json_array(path)?,
        None => Vec::new(),
    };

    let config = load_config(options.config, options.timeout_ms)?;
    let grader = Grader::new(&config)?;
    let mode = if options.remote {
        ExecutionMode::Remote
    } else {
        ExecutionMode::Local
    };

    let submission = Submission::from_parallel(code, inputs, expected)?
        .with_entry_point(options.entry_point);

    eprintln!(
        "🚀 Grading {} test case(s) ({})",
        submission.test_cases.len(),
        mode
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("⚠️  Interrupted, cancelling remaining cases");
            on_interrupt.cancel();
        }
    });

    let report = grader.grade(&submission, mode, &cancel).await?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize report")?
    );

    if report.all_passed {
        eprintln!("✅ {} / {} passed ({})", report.passed, report.total, report.verdict);
    } else {
        eprintln!("❌ {} / {} passed ({})", report.passed, report.total, report.verdict);
    }

    Ok(report.all_passed)
}

/// Build the script that would be executed for a submission
pub fn render_harness(code: &str, inputs: &[Value], remote: bool) -> Result<String> {
    let harness = if remote {
        let submission = Submission::from_parallel(code, inputs.to_vec(), Vec::new())?;
        HarnessBuilder::new(code)
            .entry_point(Some(REMOTE_ENTRY_POINT))
            .argument_style(ArgumentStyle::Spread)
            .build_batch(&submission.test_cases)?
    } else {
        HarnessBuilder::new(code).build_local()?
    };
    Ok(harness.source)
}

/// Print the generated harness
pub fn print_harness(code: &Path, inputs: &Path, remote: bool) -> Result<()> {
    let code = read_code(code)?;
    let inputs = read_json_array(inputs)?;
    print!("{}", render_harness(&code, &inputs, remote)?);
    Ok(())
}

/// Write a default `config/grader.json` under `path`
pub fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing grader config at: {}", path);

    let config_dir = Path::new(path).join("config");
    fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create directory: {}", config_dir.display()))?;

    let config_path = config_dir.join("grader.json");
    if config_path.exists() {
        println!("  ⏭️  Skipped: config/grader.json already exists");
    } else {
        let content = grader_engine::config::render_default()?;
        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write {}", config_path.display()))?;
        println!("  ✅ Created: config/grader.json");
    }

    println!("\n📋 Next steps:");
    println!("  1. Set JUDGE_API_KEY and JUDGE_API_HOST to enable remote grading");
    println!("  2. Grade locally: grader-cli grade --code solution.py --inputs inputs.json");

    Ok(())
}
