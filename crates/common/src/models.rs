//! Data models for deployments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Deployment status
///
/// Records move forward one step at a time along
/// `Pending -> Cloning -> Building -> Configuring -> Deploying -> Deployed`.
/// `Failed` can be entered from any non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Record created, pipeline not started yet
    Pending,
    /// Fetching the source tree
    Cloning,
    /// Detecting, installing dependencies and building
    Building,
    /// Writing container and web server configuration
    Configuring,
    /// Building and starting the container, publishing the route
    Deploying,
    /// Reachable behind the reverse proxy
    Deployed,
    /// Pipeline aborted
    Failed,
}

impl DeploymentStatus {
    /// All statuses, in pipeline order with `Failed` last
    pub const ALL: [DeploymentStatus; 7] = [
        DeploymentStatus::Pending,
        DeploymentStatus::Cloning,
        DeploymentStatus::Building,
        DeploymentStatus::Configuring,
        DeploymentStatus::Deploying,
        DeploymentStatus::Deployed,
        DeploymentStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Cloning => "cloning",
            DeploymentStatus::Building => "building",
            DeploymentStatus::Configuring => "configuring",
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Failed => "failed",
        }
    }

    /// Whether no further transition can leave this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentStatus::Deployed | DeploymentStatus::Failed)
    }

    /// The status that follows this one on the success path
    pub fn next(&self) -> Option<DeploymentStatus> {
        match self {
            DeploymentStatus::Pending => Some(DeploymentStatus::Cloning),
            DeploymentStatus::Cloning => Some(DeploymentStatus::Building),
            DeploymentStatus::Building => Some(DeploymentStatus::Configuring),
            DeploymentStatus::Configuring => Some(DeploymentStatus::Deploying),
            DeploymentStatus::Deploying => Some(DeploymentStatus::Deployed),
            DeploymentStatus::Deployed | DeploymentStatus::Failed => None,
        }
    }

    /// Check whether moving from `self` to `to` is allowed
    pub fn can_transition_to(&self, to: DeploymentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        to == DeploymentStatus::Failed || self.next() == Some(to)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timestamped line in a deployment's narrative log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.timestamp.to_rfc3339(), self.message)
    }
}

/// A deployment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    /// Unique deployment identifier
    pub id: String,

    /// Caller supplied application name
    pub app_name: String,

    /// Repository reference the source is fetched from
    pub source_ref: String,

    /// Directory name and public URL segment, unique per record
    pub target_path: String,

    /// Name of the image and container built for this deployment
    pub container_name: String,

    /// Current status
    pub status: DeploymentStatus,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// When the record was last mutated
    pub updated_at: DateTime<Utc>,

    /// Whether the application is server-rendered
    #[serde(rename = "isSSR")]
    pub is_ssr: bool,

    /// Public URL the deployment is served at once published
    pub public_url: String,

    /// Append-only narrative of the deployment
    pub logs: Vec<LogEntry>,
}

impl DeploymentRecord {
    /// Create a new pending record with its first log entry
    pub fn new(
        id: String,
        app_name: String,
        source_ref: String,
        target_path: String,
        container_name: String,
        public_url: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            app_name,
            source_ref,
            target_path,
            container_name,
            status: DeploymentStatus::Pending,
            created_at: now,
            updated_at: now,
            is_ssr: false,
            public_url,
            logs: vec![LogEntry::new(now, "Deployment initiated")],
        }
    }

    /// URL path the deployment is routed under, e.g. `/demo-app_1700000000000/`
    pub fn url_path(&self) -> String {
        format!("/{}/", self.target_path)
    }

    /// Append a log entry. The timestamp never goes below the previous entry's.
    pub fn push_log(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        let timestamp = match self.logs.last() {
            Some(last) if last.timestamp > now => last.timestamp,
            _ => now,
        };
        self.logs.push(LogEntry::new(timestamp, message));
    }

    /// Refresh the update timestamp without letting it decrease
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Shallow-merge a patch into this record
    ///
    /// The patch is validated as a whole before anything is written, so a
    /// rejected patch leaves the record untouched.
    pub fn apply(&mut self, patch: DeploymentPatch, now: DateTime<Utc>) -> Result<()> {
        if let Some(to) = patch.status {
            if to != self.status && !self.status.can_transition_to(to) {
                return Err(Error::InvalidTransition {
                    from: self.status,
                    to,
                });
            }
        }

        if let Some(logs) = &patch.logs {
            if logs.len() < self.logs.len() || logs[..self.logs.len()] != self.logs[..] {
                return Err(Error::LogRewrite(self.id.clone()));
            }
            let mut floor = self.logs.last().map(|entry| entry.timestamp);
            for entry in &logs[self.logs.len()..] {
                if floor.is_some_and(|floor| entry.timestamp < floor) {
                    return Err(Error::LogRewrite(self.id.clone()));
                }
                floor = Some(entry.timestamp);
            }
        }

        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(is_ssr) = patch.is_ssr {
            self.is_ssr = is_ssr;
        }
        if let Some(logs) = patch.logs {
            self.logs = logs;
        }
        self.touch(now);

        Ok(())
    }
}

/// Partial update of a deployment record
///
/// `logs`, when present, is the complete new log: the current entries
/// followed by the appended ones.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPatch {
    pub status: Option<DeploymentStatus>,
    pub is_ssr: Option<bool>,
    pub logs: Option<Vec<LogEntry>>,
}

impl DeploymentPatch {
    pub fn status(status: DeploymentStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_is_ssr(mut self, is_ssr: bool) -> Self {
        self.is_ssr = Some(is_ssr);
        self
    }

    pub fn with_logs(mut self, logs: Vec<LogEntry>) -> Self {
        self.logs = Some(logs);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_record() -> DeploymentRecord {
        DeploymentRecord::new(
            "0b7e4c1a-1111-4222-8333-444455556666".to_string(),
            "demo-app".to_string(),
            "https://example.com/repo.git".to_string(),
            "demo-app_1700000000000".to_string(),
            "app-0b7e4c1a1111".to_string(),
            "http://localhost:8080/demo-app_1700000000000/".to_string(),
        )
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = sample_record();

        assert_eq!(record.status, DeploymentStatus::Pending);
        assert!(!record.is_ssr);
        assert_eq!(record.logs.len(), 1);
        assert_eq!(record.logs[0].message, "Deployment initiated");
        assert_eq!(record.created_at, record.updated_at);
        assert_eq!(record.url_path(), "/demo-app_1700000000000/");
    }

    #[test]
    fn test_success_path_transitions() {
        let mut status = DeploymentStatus::Pending;
        let mut visited = vec![status];
        while let Some(next) = status.next() {
            assert!(status.can_transition_to(next));
            status = next;
            visited.push(status);
        }

        assert_eq!(
            visited,
            vec![
                DeploymentStatus::Pending,
                DeploymentStatus::Cloning,
                DeploymentStatus::Building,
                DeploymentStatus::Configuring,
                DeploymentStatus::Deploying,
                DeploymentStatus::Deployed,
            ]
        );
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        for status in DeploymentStatus::ALL {
            assert_eq!(
                status.can_transition_to(DeploymentStatus::Failed),
                !status.is_terminal(),
                "{status}"
            );
        }
        assert!(!DeploymentStatus::Deployed.can_transition_to(DeploymentStatus::Pending));
        assert!(!DeploymentStatus::Failed.can_transition_to(DeploymentStatus::Cloning));
    }

    #[test]
    fn test_no_skipping_or_going_back() {
        assert!(!DeploymentStatus::Pending.can_transition_to(DeploymentStatus::Building));
        assert!(!DeploymentStatus::Building.can_transition_to(DeploymentStatus::Cloning));
        assert!(!DeploymentStatus::Deploying.can_transition_to(DeploymentStatus::Pending));
    }

    #[test]
    fn test_apply_rejects_invalid_transition() {
        let mut record = sample_record();
        let before = record.clone();

        let err = record
            .apply(
                DeploymentPatch::status(DeploymentStatus::Deployed).with_is_ssr(true),
                Utc::now(),
            )
            .unwrap_err();

        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(record, before);
    }

    #[test]
    fn test_apply_rejects_log_rewrite() {
        let mut record = sample_record();
        let now = Utc::now();
        record.push_log("Cloning repository", now);

        // Dropping an entry
        let truncated = vec![record.logs[0].clone()];
        let err = record
            .apply(DeploymentPatch::default().with_logs(truncated), now)
            .unwrap_err();
        assert!(matches!(err, Error::LogRewrite(_)));

        // Reordering entries
        let mut reordered = record.logs.clone();
        reordered.swap(0, 1);
        let err = record
            .apply(DeploymentPatch::default().with_logs(reordered), now)
            .unwrap_err();
        assert!(matches!(err, Error::LogRewrite(_)));

        assert_eq!(record.logs.len(), 2);
    }

    #[test]
    fn test_apply_accepts_extended_log() {
        let mut record = sample_record();
        let now = record.updated_at + Duration::seconds(1);

        let mut logs = record.logs.clone();
        logs.push(LogEntry::new(now, "Cloning repository"));

        record
            .apply(
                DeploymentPatch::status(DeploymentStatus::Cloning).with_logs(logs),
                now,
            )
            .unwrap();

        assert_eq!(record.status, DeploymentStatus::Cloning);
        assert_eq!(record.logs.len(), 2);
        assert_eq!(record.updated_at, now);
    }

    #[test]
    fn test_timestamps_never_decrease() {
        let mut record = sample_record();
        let earlier = record.updated_at - Duration::seconds(30);

        record.push_log("clock stepped back", earlier);
        record.touch(earlier);

        assert!(record.logs[1].timestamp >= record.logs[0].timestamp);
        assert!(record.updated_at >= record.created_at);
    }

    #[test]
    fn test_record_json_shape() {
        let record = sample_record();
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["appName"], "demo-app");
        assert_eq!(json["sourceRef"], "https://example.com/repo.git");
        assert_eq!(json["targetPath"], "demo-app_1700000000000");
        assert_eq!(json["status"], "pending");
        assert_eq!(json["isSSR"], false);
        assert_eq!(
            json["publicUrl"],
            "http://localhost:8080/demo-app_1700000000000/"
        );
        assert_eq!(json["logs"][0]["message"], "Deployment initiated");
    }
}
