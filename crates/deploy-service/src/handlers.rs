//! API handlers for Deploy Service

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use launchpad_common::{DeploymentRecord, Error};
use std::sync::Arc;
use tracing::{error, info};

use crate::{models::CreateDeploymentRequest, pipeline::Orchestrator};

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
}

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found() -> Self {
        ApiError {
            status: StatusCode::NOT_FOUND,
            message: "Deployment not found".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Request failed: {:#}", err);
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error".to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(_) => ApiError::not_found(),
            Error::Validation(message) => ApiError::bad_request(message),
            Error::Conflict(message) => ApiError {
                status: StatusCode::CONFLICT,
                message,
            },
            other => {
                error!("Request failed: {}", other);
                ApiError {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: "Internal server error".to_string(),
                }
            }
        }
    }
}

/// Health check
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "deploy-service"
    }))
}

/// List all deployments
pub async fn list_deployments_handler(
    State(state): State<Arc<AppState>>,
) -> Json<Vec<DeploymentRecord>> {
    let deployments = state.orchestrator.registry().list().await;
    Json(deployments)
}

/// Get a single deployment
pub async fn get_deployment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DeploymentRecord>, ApiError> {
    match state.orchestrator.registry().get(&id).await {
        Some(deployment) => Ok(Json(deployment)),
        None => Err(ApiError::not_found()),
    }
}

/// Create a deployment and start its pipeline
pub async fn create_deployment_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateDeploymentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DeploymentRecord>), ApiError> {
    let Json(payload) =
        payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let (source_ref, app_name) = payload.validate().map_err(ApiError::bad_request)?;

    info!("Creating deployment of {} from {}", app_name, source_ref);

    let deployment = state
        .orchestrator
        .start_deployment(source_ref, app_name)
        .await?;

    Ok((StatusCode::CREATED, Json(deployment)))
}

/// Delete a deployment and release its container
pub async fn delete_deployment_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    info!("Deleting deployment: {}", id);

    match state.orchestrator.remove_deployment(&id).await {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(ApiError::not_found()),
    }
}

/// Deployment counts by status
pub async fn get_stats_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let stats = state.orchestrator.registry().stats().await;

    Json(serde_json::json!({
        "service": "deploy-service",
        "total": stats.total(),
        "stats": stats
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchpad_common::DeploymentStatus;

    #[test]
    fn test_error_status_codes() {
        let err = ApiError::from(Error::NotFound("abc".to_string()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "Deployment not found");

        let err = ApiError::from(Error::Validation("bad name".to_string()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "bad name");

        let err = ApiError::from(Error::Conflict("taken".to_string()));
        assert_eq!(err.status, StatusCode::CONFLICT);
    }

    #[test]
    fn test_unexpected_errors_are_generic() {
        let err = ApiError::from(Error::InvalidTransition {
            from: DeploymentStatus::Deployed,
            to: DeploymentStatus::Cloning,
        });
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Internal server error");

        let err = ApiError::from(Error::LogRewrite("abc".to_string()));
        assert_eq!(err.message, "Internal server error");
    }
}
