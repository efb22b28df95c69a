//! Hash-keyed cache of deep-analysis results.
//!
//! Quick stats are always recomputed; only the expensive deep-analysis
//! payload is cached. An entry is valid while its stored hash equals the
//! hash of the current quick stats and its status is completed.

use crate::analysis::{Aggregator, QuickStats};
use crate::error::{AnalysisError, Result};
use crate::models::{CacheEntry, EntryStatus, Snapshot};
use crate::store::{CacheStore, SnapshotStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Analysis type used for whole-task deep analyses.
pub const TASK_ANALYSIS: &str = "task";

/// Outcome of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Valid entry, payload returned.
    Completed,
    /// A computation is in progress; no payload.
    Analyzing,
    /// An entry exists but no longer matches the data.
    Stale,
    /// Nothing cached yet.
    Pending,
}

/// Result of `get_cached`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAnalysis {
    pub quick_stats: QuickStats,
    pub llm_analysis: Option<Value>,
    pub status: CacheStatus,
    /// Hash of the freshly computed quick stats.
    pub data_hash: String,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<DateTime<Utc>>,
}

/// Cache layer over a snapshot source and a cache store.
#[derive(Clone)]
pub struct CacheLayer {
    snapshots: Arc<dyn SnapshotStore>,
    store: Arc<dyn CacheStore>,
    aggregator: Aggregator,
}

impl CacheLayer {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        store: Arc<dyn CacheStore>,
        aggregator: Aggregator,
    ) -> Self {
        Self {
            snapshots,
            store,
            aggregator,
        }
    }

    /// Look up the cached deep analysis for a task.
    pub async fn get_cached(
        &self,
        task_id: &str,
        analysis_type: &str,
        target_id: &str,
    ) -> Result<CachedAnalysis> {
        let snapshot = self
            .snapshots
            .load(task_id)
            .await?
            .ok_or_else(|| AnalysisError::NotFound(format!("task {}", task_id)))?;

        self.lookup(&snapshot, analysis_type, target_id).await
    }

    /// Same as `get_cached` for a snapshot the caller already loaded.
    pub async fn lookup(
        &self,
        snapshot: &Snapshot,
        analysis_type: &str,
        target_id: &str,
    ) -> Result<CachedAnalysis> {
        let quick_stats = self.aggregator.quick_stats(snapshot);
        let data_hash = quick_stats.data_hash();

        let entry = self
            .store
            .find_latest(analysis_type, target_id, &snapshot.task_id)
            .await?;

        let Some(entry) = entry else {
            debug!("Cache miss for {}/{}/{}", analysis_type, target_id, snapshot.task_id);
            return Ok(CachedAnalysis {
                quick_stats,
                llm_analysis: None,
                status: CacheStatus::Pending,
                data_hash,
                cache_hit: false,
                message: None,
                cached_at: None,
            });
        };

        if entry.status == EntryStatus::Completed && entry.data_hash == data_hash {
            debug!("Cache hit for {}/{}/{}", analysis_type, target_id, snapshot.task_id);
            return Ok(CachedAnalysis {
                quick_stats,
                llm_analysis: Some(entry.payload),
                status: CacheStatus::Completed,
                data_hash,
                cache_hit: true,
                message: None,
                cached_at: Some(entry.updated_at),
            });
        }

        if entry.status == EntryStatus::Analyzing {
            return Ok(CachedAnalysis {
                quick_stats,
                llm_analysis: None,
                status: CacheStatus::Analyzing,
                data_hash,
                cache_hit: false,
                message: Some("analysis in progress".to_string()),
                cached_at: Some(entry.updated_at),
            });
        }

        info!(
            "Cached {} analysis for {} is stale ({} != {})",
            analysis_type, snapshot.task_id, entry.data_hash, data_hash
        );
        Ok(CachedAnalysis {
            quick_stats,
            llm_analysis: Some(entry.payload),
            status: CacheStatus::Stale,
            data_hash,
            cache_hit: false,
            message: Some("data changed since the cached analysis".to_string()),
            cached_at: Some(entry.updated_at),
        })
    }

    /// Store a completed deep analysis.
    pub async fn save(
        &self,
        task_id: &str,
        analysis_type: &str,
        target_id: &str,
        payload: Value,
        data_hash: &str,
    ) -> Result<()> {
        let entry = CacheEntry {
            analysis_type: analysis_type.to_string(),
            target_id: target_id.to_string(),
            task_id: task_id.to_string(),
            data_hash: data_hash.to_string(),
            status: EntryStatus::Completed,
            payload,
            updated_at: Utc::now(),
        };

        self.store.upsert(entry).await?;
        debug!("Saved {} analysis for {}", analysis_type, task_id);
        Ok(())
    }
}
