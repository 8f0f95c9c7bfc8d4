//! In-memory registry of deployment records

use chrono::Utc;
use launchpad_common::{
    DeploymentPatch, DeploymentRecord, DeploymentStatus, Error, LogEntry, Result,
};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Registry of deployment records keyed by identifier
///
/// Every mutation runs under a single write-lock acquisition, so a
/// read-modify-write of one record can never interleave with another.
#[derive(Default)]
pub struct Registry {
    records: RwLock<HashMap<String, DeploymentRecord>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new record
    ///
    /// Fails with `Conflict` if the identifier or target path is already in use.
    pub async fn create(&self, record: DeploymentRecord) -> Result<DeploymentRecord> {
        let mut records = self.records.write().await;

        if records.contains_key(&record.id) {
            return Err(Error::Conflict(format!(
                "deployment id already exists: {}",
                record.id
            )));
        }
        if records
            .values()
            .any(|existing| existing.target_path == record.target_path)
        {
            return Err(Error::Conflict(format!(
                "target path already in use: {}",
                record.target_path
            )));
        }

        records.insert(record.id.clone(), record.clone());

        info!(
            "Created deployment: {} ({}) at {}",
            record.id, record.app_name, record.target_path
        );
        Ok(record)
    }

    /// All records, in no particular order
    pub async fn list(&self) -> Vec<DeploymentRecord> {
        self.records.read().await.values().cloned().collect()
    }

    /// Get a record by identifier
    pub async fn get(&self, id: &str) -> Option<DeploymentRecord> {
        self.records.read().await.get(id).cloned()
    }

    /// Merge a patch into a record and refresh its update timestamp
    pub async fn update(&self, id: &str, patch: DeploymentPatch) -> Result<DeploymentRecord> {
        self.modify(id, |record| record.apply(patch, Utc::now())).await
    }

    /// Append one entry to a record's log
    pub async fn append_log(
        &self,
        id: &str,
        message: impl Into<String>,
    ) -> Result<DeploymentRecord> {
        let message = message.into();
        self.modify(id, |record| {
            let now = Utc::now();
            record.push_log(message, now);
            record.touch(now);
            Ok(())
        })
        .await
    }

    /// Move a record to `status` and append a log entry in the same step
    pub async fn transition(
        &self,
        id: &str,
        status: DeploymentStatus,
        message: impl Into<String>,
    ) -> Result<DeploymentRecord> {
        let message = message.into();
        self.modify(id, |record| {
            let now = Utc::now();
            let mut logs = record.logs.clone();
            let timestamp = logs
                .last()
                .map(|last| last.timestamp.max(now))
                .unwrap_or(now);
            logs.push(LogEntry::new(timestamp, message));
            record.apply(DeploymentPatch::status(status).with_logs(logs), now)
        })
        .await
    }

    /// Remove a record, returning it if it existed
    pub async fn delete(&self, id: &str) -> Option<DeploymentRecord> {
        let removed = self.records.write().await.remove(id);
        if removed.is_some() {
            info!("Deleted deployment: {}", id);
        }
        removed
    }

    /// Count records per status
    pub async fn stats(&self) -> DeploymentStats {
        let records = self.records.read().await;
        let mut stats = DeploymentStats::default();
        for record in records.values() {
            match record.status {
                DeploymentStatus::Pending => stats.pending += 1,
                DeploymentStatus::Cloning => stats.cloning += 1,
                DeploymentStatus::Building => stats.building += 1,
                DeploymentStatus::Configuring => stats.configuring += 1,
                DeploymentStatus::Deploying => stats.deploying += 1,
                DeploymentStatus::Deployed => stats.deployed += 1,
                DeploymentStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    async fn modify<F>(&self, id: &str, f: F) -> Result<DeploymentRecord>
    where
        F: FnOnce(&mut DeploymentRecord) -> Result<()>,
    {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        f(record)?;

        debug!("Updated deployment: {} status: {}", id, record.status);
        Ok(record.clone())
    }
}

/// Deployment counts by status
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentStats {
    pub pending: usize,
    pub cloning: usize,
    pub building: usize,
    pub configuring: usize,
    pub deploying: usize,
    pub deployed: usize,
    pub failed: usize,
}

impl DeploymentStats {
    pub fn total(&self) -> usize {
        self.pending
            + self.cloning
            + self.building
            + self.configuring
            + self.deploying
            + self.deployed
            + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn record(id: &str, target_path: &str) -> DeploymentRecord {
        DeploymentRecord::new(
            id.to_string(),
            "demo-app".to_string(),
            "https://example.com/repo.git".to_string(),
            target_path.to_string(),
            format!("app-{}", id),
            format!("http://localhost:8080/{}/", target_path),
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = Registry::new();

        registry.create(record("a", "demo_1")).await.unwrap();

        let retrieved = registry.get("a").await.expect("record not found");
        assert_eq!(retrieved.target_path, "demo_1");
        assert!(registry.get("b").await.is_none());
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let registry = Registry::new();
        registry.create(record("a", "demo_1")).await.unwrap();

        let same_id = registry.create(record("a", "demo_2")).await;
        assert!(matches!(same_id, Err(Error::Conflict(_))));

        let same_path = registry.create(record("b", "demo_1")).await;
        assert!(matches!(same_path, Err(Error::Conflict(_))));

        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_update_merges_and_refreshes_timestamp() {
        let registry = Registry::new();
        let created = registry.create(record("a", "demo_1")).await.unwrap();

        let updated = registry
            .update(
                "a",
                DeploymentPatch::status(DeploymentStatus::Cloning).with_is_ssr(true),
            )
            .await
            .unwrap();

        assert_eq!(updated.status, DeploymentStatus::Cloning);
        assert!(updated.is_ssr);
        assert_eq!(updated.logs, created.logs);
        assert!(updated.updated_at >= created.updated_at);
        assert_eq!(updated.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_update_unknown_id() {
        let registry = Registry::new();

        let result = registry.update("missing", DeploymentPatch::default()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        let result = registry.append_log("missing", "hello").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_transition_enforces_order() {
        let registry = Registry::new();
        registry.create(record("a", "demo_1")).await.unwrap();

        let skipped = registry
            .transition("a", DeploymentStatus::Deployed, "too early")
            .await;
        assert!(matches!(skipped, Err(Error::InvalidTransition { .. })));

        registry
            .transition("a", DeploymentStatus::Cloning, "Cloning")
            .await
            .unwrap();
        let failed = registry
            .transition("a", DeploymentStatus::Failed, "Deployment failed")
            .await
            .unwrap();
        assert_eq!(failed.status, DeploymentStatus::Failed);

        let after_terminal = registry
            .transition("a", DeploymentStatus::Building, "after failure")
            .await;
        assert!(after_terminal.is_err());

        let record = registry.get("a").await.unwrap();
        let messages: Vec<_> = record.logs.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["Deployment initiated", "Cloning", "Deployment failed"]
        );
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let registry = Arc::new(Registry::new());
        registry.create(record("a", "demo_1")).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..50 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.append_log("a", format!("entry {}", i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = registry.get("a").await.unwrap();
        assert_eq!(record.logs.len(), 51);
        assert!(record
            .logs
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[tokio::test]
    async fn test_delete() {
        let registry = Registry::new();
        registry.create(record("a", "demo_1")).await.unwrap();

        let removed = registry.delete("a").await;
        assert!(removed.is_some());
        assert!(registry.get("a").await.is_none());
        assert!(registry.list().await.is_empty());
        assert!(registry.delete("a").await.is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let registry = Registry::new();
        registry.create(record("a", "demo_1")).await.unwrap();
        registry.create(record("b", "demo_2")).await.unwrap();
        registry
            .transition("b", DeploymentStatus::Failed, "Deployment failed")
            .await
            .unwrap();

        let stats = registry.stats().await;
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.total(), 2);
    }
}
