//! Stores backed by directories of JSON files.
//!
//! Each task snapshot lives in `<dir>/<task_id>.json`. Hidden files and
//! anything that is not a `.json` file are ignored, so a cache directory
//! such as `<dir>/.cache` can share the same root.

use super::{CacheStore, SnapshotStore};
use crate::models::{CacheEntry, Snapshot};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Directory-of-JSON snapshot source.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    /// Create a store over `dir`. The directory must exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(anyhow::anyhow!(
                "Snapshot directory does not exist: {}",
                dir.display()
            ));
        }
        Ok(Self { dir })
    }

    /// Root directory of the store.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, task_id: &str) -> Result<PathBuf> {
        // Task ids map straight to file names
        if task_id.is_empty()
            || task_id.starts_with('.')
            || task_id.contains(['/', '\\'])
        {
            return Err(anyhow::anyhow!("Invalid task id: {:?}", task_id));
        }
        Ok(self.dir.join(format!("{}.json", task_id)))
    }
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, task_id: &str) -> Result<Option<Snapshot>> {
        let path = self.path_for(task_id)?;

        if !path.is_file() {
            debug!("No snapshot file at {}", path.display());
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;

        let mut snapshot: Snapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot: {}", path.display()))?;

        if snapshot.task_id.is_empty() {
            snapshot.task_id = task_id.to_string();
        } else if snapshot.task_id != task_id {
            warn!(
                "Snapshot {} declares task id {}, using file name",
                path.display(),
                snapshot.task_id
            );
            snapshot.task_id = task_id.to_string();
        }

        Ok(Some(snapshot))
    }

    async fn list_tasks(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;

        let mut tasks = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();

            if name.starts_with('.') || !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                tasks.push(stem.to_string());
            }
        }

        // File names are expected to sort chronologically (e.g. dated ids)
        tasks.sort();
        Ok(tasks)
    }
}

/// Deep-analysis cache persisted as one JSON file per key.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Create a store over `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create cache directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// File for a key. The key is hashed so ids never leave the directory.
    fn path_for(&self, analysis_type: &str, target_id: &str, task_id: &str) -> PathBuf {
        let digest = Sha256::digest(format!("{}\n{}\n{}", analysis_type, target_id, task_id));
        self.dir.join(format!("{}.json", hex::encode(digest)))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn find_latest(
        &self,
        analysis_type: &str,
        target_id: &str,
        task_id: &str,
    ) -> Result<Option<CacheEntry>> {
        let path = self.path_for(analysis_type, target_id, task_id);
        if !path.is_file() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read cache entry: {}", path.display()))?;
        let entry = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache entry: {}", path.display()))?;
        Ok(Some(entry))
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<()> {
        let path = self.path_for(&entry.analysis_type, &entry.target_id, &entry.task_id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&entry)?;

        // Write then rename so readers never see a partial entry
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write cache entry: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to replace cache entry: {}", path.display()))?;

        debug!("Cache entry written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryStatus;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    const FIXTURE: &str = include_str!("../../fixtures/snapshots/2024-03-01-math.json");

    #[tokio::test]
    async fn test_load_and_list() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("2024-03-01-math.json"), FIXTURE).unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(temp_dir.path().join(".hidden.json"), "{}").unwrap();

        let store = FileSnapshotStore::new(temp_dir.path()).unwrap();
        assert_eq!(store.list_tasks().await.unwrap(), vec!["2024-03-01-math"]);

        let snapshot = store.load("2024-03-01-math").await.unwrap().unwrap();
        assert_eq!(snapshot.task_id, "2024-03-01-math");
        assert!(!snapshot.items.is_empty());

        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_task_ids() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileSnapshotStore::new(temp_dir.path()).unwrap();

        assert!(store.load("../etc/passwd").await.is_err());
        assert!(store.load(".hidden").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_json_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("bad.json"), "not json").unwrap();

        let store = FileSnapshotStore::new(temp_dir.path()).unwrap();
        assert!(store.load("bad").await.is_err());
    }

    #[test]
    fn test_cache_entries_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let cache_dir = temp_dir.path().join(".cache");
        let entry = CacheEntry {
            analysis_type: "task".to_string(),
            target_id: "../t1".to_string(),
            task_id: "t1".to_string(),
            data_hash: "abc".to_string(),
            status: EntryStatus::Completed,
            payload: json!({"clusters": []}),
            updated_at: Utc::now(),
        };

        let store = FileCacheStore::new(&cache_dir).unwrap();
        tokio_test::block_on(store.upsert(entry.clone())).unwrap();

        let reopened = FileCacheStore::new(&cache_dir).unwrap();
        let found = tokio_test::block_on(reopened.find_latest("task", "../t1", "t1")).unwrap();
        assert_eq!(found, Some(entry));

        let other = tokio_test::block_on(reopened.find_latest("task", "t1", "t1")).unwrap();
        assert!(other.is_none());

        // The cache directory is hidden from the snapshot listing.
        let snapshots = FileSnapshotStore::new(temp_dir.path()).unwrap();
        assert!(tokio_test::block_on(snapshots.list_tasks()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_directory() {
        assert!(FileSnapshotStore::new("/definitely/not/here").is_err());
    }
}
