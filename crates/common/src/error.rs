use thiserror::Error;

use crate::models::DeploymentStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Deployment not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: DeploymentStatus,
        to: DeploymentStatus,
    },

    #[error("Log for deployment {0} is append-only")]
    LogRewrite(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
