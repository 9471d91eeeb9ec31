mod handlers;
mod metrics;
mod routes;

use anyhow::{Context, Result};
use axum::Router;
use codepad_common::problems::{FileProblemStore, ProblemStore};
use codepad_common::redis::RedisProblemStore;
use codepad_harness::{Harness, HarnessConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub struct AppState {
    pub harness: Arc<Harness>,
    pub problems: Arc<dyn ProblemStore>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new().merge(routes::routes()).with_state(state)
}

async fn problem_store() -> Result<Arc<dyn ProblemStore>> {
    if let Ok(redis_url) = std::env::var("REDIS_URL") {
        let store = RedisProblemStore::connect(&redis_url).await?;
        info!("Problem store: Redis at {}", redis_url);
        return Ok(Arc::new(store));
    }

    let path = std::env::var("CODEPAD_PROBLEMS")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data/problems.json"));
    let store = FileProblemStore::load(&path)?;
    info!(
        problems = store.problems().len(),
        "Problem store: {}",
        store.path().display()
    );
    Ok(Arc::new(store))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        return;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Codepad API booting...");

    let config = HarnessConfig::load_default()?;
    info!(
        backend = ?config.backend,
        timeout_ms = config.timeout_ms,
        languages = ?config.list_languages(),
        "Harness configured"
    );
    let harness = Arc::new(Harness::from_config(config)?);

    // Boot the environment in the background so the first run is fast
    let warm = harness.clone();
    tokio::spawn(async move {
        match warm.warm_up().await {
            Ok(()) => info!("Execution environment ready"),
            Err(e) => warn!(error = %e, "Warm-up failed, will retry on first run"),
        }
    });

    let state = Arc::new(AppState {
        harness: harness.clone(),
        problems: problem_store().await?,
    });

    let addr = std::env::var("CODEPAD_BIND").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Err(e) = harness.shutdown().await {
        warn!(error = %e, "Failed to tear down execution environment");
    }
    info!("Codepad API shut down gracefully");
    Ok(())
}
