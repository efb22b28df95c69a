//! In-memory collaborator implementations.

use super::{
    AnomalyLog, AutomationLog, AutomationLogEntry, CacheStore, ReportStore, SnapshotStore,
};
use crate::models::{AnalysisReport, Anomaly, CacheEntry, Snapshot};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Snapshots held in insertion order.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<Vec<Snapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a snapshot. Replacing keeps the original position.
    pub async fn insert(&self, snapshot: Snapshot) {
        let mut snapshots = self.snapshots.write().await;
        match snapshots.iter_mut().find(|s| s.task_id == snapshot.task_id) {
            Some(existing) => *existing = snapshot,
            None => snapshots.push(snapshot),
        }
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self, task_id: &str) -> Result<Option<Snapshot>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.iter().find(|s| s.task_id == task_id).cloned())
    }

    async fn list_tasks(&self) -> Result<Vec<String>> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.iter().map(|s| s.task_id.clone()).collect())
    }
}

/// Reports keyed by task id.
#[derive(Debug, Default)]
pub struct MemoryReportStore {
    reports: RwLock<HashMap<String, AnalysisReport>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored reports, ordered by task id.
    pub async fn all(&self) -> Vec<AnalysisReport> {
        let reports = self.reports.read().await;
        let mut all: Vec<AnalysisReport> = reports.values().cloned().collect();
        all.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        all
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn upsert_report(&self, report: AnalysisReport) -> Result<()> {
        let mut reports = self.reports.write().await;
        reports.insert(report.task_id.clone(), report);
        Ok(())
    }

    async fn get_latest_report(&self, task_id: &str) -> Result<Option<AnalysisReport>> {
        let reports = self.reports.read().await;
        Ok(reports.get(task_id).cloned())
    }
}

/// Automation log kept in memory, mainly for inspection in tests.
#[derive(Debug, Default)]
pub struct MemoryAutomationLog {
    entries: RwLock<Vec<AutomationLogEntry>>,
}

impl MemoryAutomationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<AutomationLogEntry> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AutomationLog for MemoryAutomationLog {
    async fn append(&self, entry: AutomationLogEntry) -> Result<()> {
        self.entries.write().await.push(entry);
        Ok(())
    }
}

/// Automation log that writes through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAutomationLog;

#[async_trait]
impl AutomationLog for TracingAutomationLog {
    async fn append(&self, entry: AutomationLogEntry) -> Result<()> {
        if entry.status == "failed" {
            warn!(
                "[{}] {} failed after {:.2}s: {}",
                entry.task_type, entry.related_id, entry.duration_seconds, entry.message
            );
        } else {
            info!(
                "[{}] {} {} in {:.2}s: {}",
                entry.task_type,
                entry.related_id,
                entry.status,
                entry.duration_seconds,
                entry.message
            );
        }
        Ok(())
    }
}

type CacheKey = (String, String, String);

/// Cache entries keyed by (analysis_type, target_id, task_id).
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn find_latest(
        &self,
        analysis_type: &str,
        target_id: &str,
        task_id: &str,
    ) -> Result<Option<CacheEntry>> {
        let key = (
            analysis_type.to_string(),
            target_id.to_string(),
            task_id.to_string(),
        );
        Ok(self.entries.read().await.get(&key).cloned())
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<()> {
        let key = (
            entry.analysis_type.clone(),
            entry.target_id.clone(),
            entry.task_id.clone(),
        );
        self.entries.write().await.insert(key, entry);
        Ok(())
    }
}

/// Anomalies in detection order.
#[derive(Debug, Default)]
pub struct MemoryAnomalyLog {
    anomalies: RwLock<Vec<Anomaly>>,
}

impl MemoryAnomalyLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnomalyLog for MemoryAnomalyLog {
    async fn append(&self, anomaly: Anomaly) -> Result<()> {
        self.anomalies.write().await.push(anomaly);
        Ok(())
    }

    async fn acknowledge(&self, anomaly_id: &str) -> Result<bool> {
        let mut anomalies = self.anomalies.write().await;
        match anomalies.iter_mut().find(|a| a.anomaly_id == anomaly_id) {
            Some(anomaly) => {
                anomaly.acknowledged = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<Anomaly>> {
        Ok(self.anomalies.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryStatus, ReportStatus};
    use chrono::Utc;

    #[tokio::test]
    async fn test_snapshot_replace_keeps_order() {
        let store = MemorySnapshotStore::new();
        for id in ["a", "b", "c"] {
            store
                .insert(Snapshot {
                    task_id: id.to_string(),
                    items: vec![],
                })
                .await;
        }
        store
            .insert(Snapshot {
                task_id: "a".to_string(),
                items: vec![Default::default()],
            })
            .await;

        assert_eq!(store.list_tasks().await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(store.load("a").await.unwrap().unwrap().items.len(), 1);
        assert!(store.load("zzz").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_report_upsert_latest_wins() {
        let store = MemoryReportStore::new();
        let report = AnalysisReport::analyzing("task-1");
        store.upsert_report(report.clone()).await.unwrap();
        store
            .upsert_report(report.into_failed("boom", 0.1))
            .await
            .unwrap();

        let latest = store.get_latest_report("task-1").await.unwrap().unwrap();
        assert_eq!(latest.status, ReportStatus::Failed);
        assert_eq!(store.all().await.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_store_key() {
        let store = MemoryCacheStore::new();
        let entry = CacheEntry {
            analysis_type: "task".to_string(),
            target_id: "t1".to_string(),
            task_id: "t1".to_string(),
            data_hash: "abc".to_string(),
            status: EntryStatus::Completed,
            payload: serde_json::json!({"k": 1}),
            updated_at: Utc::now(),
        };
        store.upsert(entry.clone()).await.unwrap();

        assert_eq!(
            store.find_latest("task", "t1", "t1").await.unwrap(),
            Some(entry)
        );
        assert!(store.find_latest("book", "t1", "t1").await.unwrap().is_none());
    }
}
