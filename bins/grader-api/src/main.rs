mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use grader_engine::Grader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub struct AppState {
    pub grader: Grader,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    info!("Grader API booting...");

    let config = grader_engine::config::load_default().map_err(|e| {
        error!("Failed to load grader configuration: {:#}", e);
        e
    })?;

    let grader = Grader::new(&config).context("Failed to initialize grader")?;

    info!(
        interpreter = %config.local.interpreter,
        timeout_ms = config.local.timeout_ms,
        parallel_cases = grader.runner().parallelism(),
        "Local runner ready"
    );
    match &config.judge {
        Some(judge) => info!(base_url = %judge.base_url, language_id = judge.language_id, "Remote judge enabled"),
        None => warn!("No remote judge configured; /run-code will return 503"),
    }

    let state = Arc::new(AppState { grader });

    // Build router
    let app = Router::new()
        .merge(routes::routes())
        .with_state(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);
    info!("Ready to grade submissions");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Grader API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
