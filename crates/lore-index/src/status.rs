//! Observable per-repository ingestion status.
//!
//! The registry is an explicit, injected job store: the coordinator is the
//! only writer, status-query callers only read, and terminal records are
//! evicted after a retention window rather than living forever.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::IngestError;

/// Ingestion lifecycle stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Starting,
    LoadingFiles,
    Chunking,
    ConnectingStore,
    GeneratingEmbeddings,
    Completed,
    Failed,
}

impl IngestStage {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One repository's ingestion record. Exactly one exists per repo key at a
/// time; a new ingestion for the same key overwrites the old record.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionStatus {
    pub repo_key: String,
    pub stage: IngestStage,
    pub progress_percent: u8,
    pub total_files: usize,
    pub processed_files: usize,
    pub total_chunks: usize,
    pub processed_chunks: usize,
    pub collection: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl IngestionStatus {
    fn new(repo_key: String) -> Self {
        Self {
            repo_key,
            stage: IngestStage::Starting,
            progress_percent: 0,
            total_files: 0,
            processed_files: 0,
            total_chunks: 0,
            processed_chunks: 0,
            collection: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Wall-clock duration, up to now for in-flight records.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds()
    }
}

struct Entry {
    status: IngestionStatus,
    in_flight: bool,
}

/// Process-wide registry of ingestion records, keyed by repo key.
#[derive(Clone, Default)]
pub struct StatusRegistry {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
}

impl std::fmt::Debug for StatusRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusRegistry").finish_non_exhaustive()
    }
}

impl StatusRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an ingestion for `repo_key`.
    ///
    /// Replaces any previous record for the key. At most one ingestion may
    /// be in flight per key; the returned guard releases the key on drop
    /// and marks a non-terminal record as failed, so pollers never observe
    /// a run stuck at an intermediate stage.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::AlreadyRunning`] if the key has an in-flight
    /// ingestion.
    pub fn begin(&self, repo_key: &str) -> Result<IngestGuard, IngestError> {
        let mut map = self.write();
        if map.get(repo_key).is_some_and(|e| e.in_flight) {
            return Err(IngestError::AlreadyRunning(repo_key.to_string()));
        }
        map.insert(
            repo_key.to_string(),
            Entry {
                status: IngestionStatus::new(repo_key.to_string()),
                in_flight: true,
            },
        );
        drop(map);
        Ok(IngestGuard {
            registry: self.clone(),
            repo_key: repo_key.to_string(),
        })
    }

    /// Apply a mutation to a record. Progress never moves backwards while
    /// the record is live; the clamp lives here so callers can report raw
    /// stage-local percentages.
    pub fn update(&self, repo_key: &str, f: impl FnOnce(&mut IngestionStatus)) {
        let mut map = self.write();
        if let Some(entry) = map.get_mut(repo_key) {
            let before = entry.status.progress_percent;
            f(&mut entry.status);
            if entry.status.stage != IngestStage::Failed {
                entry.status.progress_percent = entry.status.progress_percent.max(before);
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self, repo_key: &str) -> Option<IngestionStatus> {
        self.read().get(repo_key).map(|e| e.status.clone())
    }

    #[must_use]
    pub fn is_in_flight(&self, repo_key: &str) -> bool {
        self.read().get(repo_key).is_some_and(|e| e.in_flight)
    }

    /// Drop terminal records that finished before `cutoff`.
    pub fn evict_finished_before(&self, cutoff: DateTime<Utc>) {
        self.write().retain(|_, e| {
            e.in_flight
                || !e.status.stage.is_terminal()
                || e.status.finished_at.is_none_or(|t| t >= cutoff)
        });
    }

    fn mark_finished(&self, repo_key: &str) {
        let mut map = self.write();
        if let Some(entry) = map.get_mut(repo_key) {
            entry.in_flight = false;
            if !entry.status.stage.is_terminal() {
                entry.status.stage = IngestStage::Failed;
                entry.status.error = Some("ingestion aborted".to_string());
                entry.status.finished_at = Some(Utc::now());
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Exclusive right to run the ingestion for one repo key.
#[derive(Debug)]
pub struct IngestGuard {
    registry: StatusRegistry,
    repo_key: String,
}

impl IngestGuard {
    #[must_use]
    pub fn repo_key(&self) -> &str {
        &self.repo_key
    }
}

impl Drop for IngestGuard {
    fn drop(&mut self) {
        self.registry.mark_finished(&self.repo_key);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn begin_creates_starting_record() {
        let registry = StatusRegistry::new();
        let _guard = registry.begin("o/r").unwrap();
        let status = registry.snapshot("o/r").unwrap();
        assert_eq!(status.stage, IngestStage::Starting);
        assert_eq!(status.progress_percent, 0);
        assert!(status.error.is_none());
    }

    #[test]
    fn second_begin_for_same_key_rejected() {
        let registry = StatusRegistry::new();
        let _guard = registry.begin("o/r").unwrap();
        let err = registry.begin("o/r").unwrap_err();
        assert!(matches!(err, IngestError::AlreadyRunning(_)));
    }

    #[test]
    fn begin_after_guard_drop_overwrites() {
        let registry = StatusRegistry::new();
        {
            let _guard = registry.begin("o/r").unwrap();
            registry.update("o/r", |s| s.total_files = 7);
        }
        let _guard = registry.begin("o/r").unwrap();
        let status = registry.snapshot("o/r").unwrap();
        assert_eq!(status.total_files, 0, "new run overwrites, never appends");
    }

    #[test]
    fn different_keys_run_concurrently() {
        let registry = StatusRegistry::new();
        let _a = registry.begin("o/a").unwrap();
        let _b = registry.begin("o/b").unwrap();
        assert!(registry.is_in_flight("o/a"));
        assert!(registry.is_in_flight("o/b"));
    }

    #[test]
    fn progress_never_moves_backwards() {
        let registry = StatusRegistry::new();
        let _guard = registry.begin("o/r").unwrap();
        registry.update("o/r", |s| s.progress_percent = 50);
        registry.update("o/r", |s| s.progress_percent = 30);
        assert_eq!(registry.snapshot("o/r").unwrap().progress_percent, 50);
    }

    #[test]
    fn dropped_guard_fails_unfinished_run() {
        let registry = StatusRegistry::new();
        {
            let _guard = registry.begin("o/r").unwrap();
            registry.update("o/r", |s| {
                s.stage = IngestStage::Chunking;
                s.progress_percent = 30;
            });
        }
        let status = registry.snapshot("o/r").unwrap();
        assert_eq!(status.stage, IngestStage::Failed);
        assert_eq!(status.error.as_deref(), Some("ingestion aborted"));
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn completed_run_survives_guard_drop() {
        let registry = StatusRegistry::new();
        {
            let _guard = registry.begin("o/r").unwrap();
            registry.update("o/r", |s| {
                s.stage = IngestStage::Completed;
                s.progress_percent = 100;
                s.finished_at = Some(Utc::now());
            });
        }
        let status = registry.snapshot("o/r").unwrap();
        assert_eq!(status.stage, IngestStage::Completed);
        assert!(status.error.is_none());
    }

    #[test]
    fn unknown_key_snapshot_is_none() {
        let registry = StatusRegistry::new();
        assert!(registry.snapshot("nope").is_none());
    }

    #[test]
    fn eviction_drops_old_terminal_records() {
        let registry = StatusRegistry::new();
        {
            let _guard = registry.begin("o/old").unwrap();
            registry.update("o/old", |s| {
                s.stage = IngestStage::Completed;
                s.finished_at = Some(Utc::now() - Duration::hours(2));
            });
        }
        {
            let _guard = registry.begin("o/new").unwrap();
            registry.update("o/new", |s| {
                s.stage = IngestStage::Completed;
                s.finished_at = Some(Utc::now());
            });
        }

        registry.evict_finished_before(Utc::now() - Duration::hours(1));
        assert!(registry.snapshot("o/old").is_none());
        assert!(registry.snapshot("o/new").is_some());
    }

    #[test]
    fn eviction_keeps_in_flight_records() {
        let registry = StatusRegistry::new();
        let _guard = registry.begin("o/r").unwrap();
        registry.evict_finished_before(Utc::now() + Duration::hours(1));
        assert!(registry.snapshot("o/r").is_some());
    }

    #[test]
    fn stage_serializes_snake_case() {
        let json = serde_json::to_string(&IngestStage::GeneratingEmbeddings).unwrap();
        assert_eq!(json, "\"generating_embeddings\"");
    }

    #[test]
    fn duration_uses_finished_at_when_set() {
        let registry = StatusRegistry::new();
        let _guard = registry.begin("o/r").unwrap();
        registry.update("o/r", |s| {
            s.finished_at = Some(s.started_at + Duration::milliseconds(1500));
        });
        assert_eq!(registry.snapshot("o/r").unwrap().duration_ms(), 1500);
    }
}
