//! Shared types for the Launchpad deployment service
//!
//! Deployment records, their status machine and log entries, as exposed
//! over the control API.

pub mod error;
pub mod models;

pub use error::{Error, Result};
pub use models::{DeploymentPatch, DeploymentRecord, DeploymentStatus, LogEntry};
