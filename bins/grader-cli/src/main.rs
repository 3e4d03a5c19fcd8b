mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "grader-cli")]
#[command(about = "Grader CLI - Grade Python submissions locally or on a remote judge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a submission and print the report as JSON
    Grade {
        /// Python source file with the candidate function
        #[arg(short, long)]
        code: PathBuf,

        /// JSON file holding an array of test inputs
        #[arg(short, long)]
        inputs: PathBuf,

        /// JSON file holding an array of expected outputs
        #[arg(short, long)]
        expected: Option<PathBuf>,

        /// Function to call (defaults to the first top-level function)
        #[arg(long)]
        entry_point: Option<String>,

        /// Run on the remote judge instead of locally
        #[arg(long, default_value = "false")]
        remote: bool,

        /// Per-case wall-clock timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Config file (defaults to config/grader.json)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the harness script generated for a submission
    Harness {
        /// Python source file with the candidate function
        #[arg(short, long)]
        code: PathBuf,

        /// JSON file holding an array of test inputs
        #[arg(short, long)]
        inputs: PathBuf,

        /// Generate the batch script sent to the remote judge
        #[arg(long, default_value = "false")]
        remote: bool,
    },

    /// Write a default config/grader.json
    Init {
        /// Project path
        #[arg(short, long, default_value = ".")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Grade {
            code,
            inputs,
            expected,
            entry_point,
            remote,
            timeout_ms,
            config,
        } => {
            let all_passed = commands::grade(commands::GradeOptions {
                code: &code,
                inputs: &inputs,
                expected: expected.as_deref(),
                entry_point,
                remote,
                timeout_ms,
                config: config.as_deref(),
            })
            .await?;

            if !all_passed {
                std::process::exit(1);
            }
        }
        Commands::Harness { code, inputs, remote } => {
            commands::print_harness(&code, &inputs, remote)?;
        }
        Commands::Init { path } => {
            commands::init_project(&path)?;
        }
    }

    Ok(())
}
