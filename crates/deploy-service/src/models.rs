//! Request models for the control API

use serde::Deserialize;

/// Request to create a deployment
///
/// Fields are optional here so a missing field can be reported as a
/// validation error rather than a deserialization failure.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    /// Repository to deploy
    #[serde(default, alias = "repoUrl")]
    pub source_ref: Option<String>,

    /// Application name
    #[serde(default)]
    pub app_name: Option<String>,
}

impl CreateDeploymentRequest {
    /// Return `(source_ref, app_name)` trimmed, or a message naming the
    /// first missing field
    pub fn validate(&self) -> Result<(&str, &str), String> {
        let source_ref = non_empty(&self.source_ref)
            .ok_or_else(|| "Repository URL is required".to_string())?;
        let app_name = non_empty(&self.app_name)
            .ok_or_else(|| "Application name is required".to_string())?;

        Ok((source_ref, app_name))
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
