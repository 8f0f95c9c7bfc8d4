//! Deploy Service
//!
//! REST API for starting deployments; each deployment's pipeline runs as a
//! background task.

use anyhow::{Context, Result};
use deploy_service::{build_orchestrator, create_router, AppState, Config, ProcessInvoker};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deploy_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Configuration (also loads .env)
    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);

    info!("Starting Deploy Service");
    info!("Deployments directory: {}", config.deployments_dir.display());
    info!(
        "Reverse proxy configuration: {}",
        config.proxy_config_path.display()
    );
    info!("Public base URL: {}", config.public_base_url);

    config
        .ensure_directories()
        .context("Failed to create directories")?;

    let orchestrator = Arc::new(build_orchestrator(
        config.clone(),
        Arc::new(ProcessInvoker::new()),
    ));
    orchestrator
        .proxy()
        .ensure_initialized()
        .await
        .context("Failed to initialize reverse proxy configuration")?;

    // Create router
    let app = create_router(AppState { orchestrator });

    // Start API server
    let listener = tokio::net::TcpListener::bind(&config.api_address())
        .await
        .with_context(|| format!("Failed to bind to {}", config.api_address()))?;

    info!("Deploy Service API running on http://{}", config.api_address());

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
