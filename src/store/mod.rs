//! Storage collaborators consumed by the analysis core.
//!
//! The core never owns a schema: snapshots, reports, cache entries,
//! automation logs and anomalies are read and written through these
//! traits. In-memory implementations back the CLI and the tests, and a
//! JSON directory can serve as the snapshot source.

pub mod files;
pub mod memory;

use crate::models::{AnalysisReport, Anomaly, CacheEntry, Snapshot};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use files::{FileCacheStore, FileSnapshotStore};
pub use memory::{
    MemoryAnomalyLog, MemoryAutomationLog, MemoryCacheStore, MemoryReportStore,
    MemorySnapshotStore, TracingAutomationLog,
};

/// Read-only provider of immutable task snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Load the snapshot for a task, `None` if it does not exist.
    async fn load(&self, task_id: &str) -> Result<Option<Snapshot>>;

    /// All known task ids, oldest first.
    async fn list_tasks(&self) -> Result<Vec<String>>;
}

/// Analysis reports, keyed by task id. Latest write wins.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn upsert_report(&self, report: AnalysisReport) -> Result<()>;

    async fn get_latest_report(&self, task_id: &str) -> Result<Option<AnalysisReport>>;
}

/// One automation-log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationLogEntry {
    pub task_type: String,
    pub related_id: String,
    pub status: String,
    pub message: String,
    pub duration_seconds: f64,
    pub logged_at: DateTime<Utc>,
}

/// Append-only automation log.
#[async_trait]
pub trait AutomationLog: Send + Sync {
    async fn append(&self, entry: AutomationLogEntry) -> Result<()>;
}

/// Deep-analysis cache keyed by (analysis_type, target_id, task_id).
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Most recent entry for the key.
    async fn find_latest(
        &self,
        analysis_type: &str,
        target_id: &str,
        task_id: &str,
    ) -> Result<Option<CacheEntry>>;

    /// Insert or replace the entry for its key.
    async fn upsert(&self, entry: CacheEntry) -> Result<()>;
}

/// Append-only anomaly log with an external acknowledgement flag.
#[async_trait]
pub trait AnomalyLog: Send + Sync {
    async fn append(&self, anomaly: Anomaly) -> Result<()>;

    /// Mark an anomaly as acknowledged. Returns false if the id is unknown.
    async fn acknowledge(&self, anomaly_id: &str) -> Result<bool>;

    async fn list(&self) -> Result<Vec<Anomaly>>;
}
