//! Deploy Service
//!
//! Takes a repository reference and an application name, clones, builds
//! and containerizes the application, and publishes it behind a shared
//! nginx reverse proxy under a generated path.
//!
//! ## Endpoints
//!
//! - `GET /api/deployments` - List deployments
//! - `GET /api/deployments/{id}` - Get one deployment
//! - `POST /api/deployments` - Start a deployment
//! - `DELETE /api/deployments/{id}` - Remove a deployment and its container
//! - `GET /api/stats` - Deployment counts by status
//! - `GET /health` - Health check

pub mod config;
pub mod handlers;
pub mod invoker;
pub mod models;
pub mod pipeline;
pub mod proxy;
pub mod registry;
pub mod templates;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use handlers::AppState;
pub use invoker::{CommandLine, InvokeError, Invoker, ProcessInvoker, ProcessOutput};
pub use models::CreateDeploymentRequest;
pub use pipeline::Orchestrator;
pub use proxy::{ProxyRoute, ProxySynchronizer};
pub use registry::{DeploymentStats, Registry};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/stats", get(handlers::get_stats_handler))
        .route(
            "/api/deployments",
            get(handlers::list_deployments_handler).post(handlers::create_deployment_handler),
        )
        .route(
            "/api/deployments/{id}",
            get(handlers::get_deployment_handler).delete(handlers::delete_deployment_handler),
        )
        .with_state(shared_state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Wire the registry, invoker and proxy synchronizer into an orchestrator
pub fn build_orchestrator(config: Arc<Config>, invoker: Arc<dyn Invoker>) -> Orchestrator {
    let proxy = Arc::new(ProxySynchronizer::new(
        config.proxy_config_path.clone(),
        ProxySynchronizer::docker_reload_command(&config.docker_bin, &config.proxy_container),
        invoker.clone(),
    ));

    Orchestrator::new(config, Arc::new(Registry::new()), invoker, proxy)
}
