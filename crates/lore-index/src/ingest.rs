//! Ingestion orchestration: list → load → chunk → embed → store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use lore_llm::Embedder;
use lore_store::{VectorPoint, VectorStore, collection_name, replace_collection};

use crate::chunker::{Chunk, ChunkerConfig, chunk_file};
use crate::error::{IngestError, Result};
use crate::source::{FileSource, load_files};
use crate::status::{IngestGuard, IngestStage, StatusRegistry};

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub chunker: ChunkerConfig,
    /// Chunks embedded and upserted per batch (default: 64).
    pub embed_batch: usize,
    /// Concurrent file reads (default: 8).
    pub fetch_concurrency: usize,
    /// Wall-clock budget for source enumeration (default: 120s).
    pub source_timeout: Duration,
    /// Status update cadence while loading files (default: every 25).
    pub progress_every: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            embed_batch: 64,
            fetch_concurrency: 8,
            source_timeout: Duration::from_secs(120),
            progress_every: 25,
        }
    }
}

/// Identity of one repository snapshot to ingest.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// `owner/name`.
    pub repo_key: String,
    /// PR marker (`pr42`) or branch name.
    pub rev: String,
    /// Commit SHA.
    pub commit: String,
}

impl IngestRequest {
    #[must_use]
    pub fn collection(&self) -> String {
        collection_name(&self.repo_key, &self.rev, &self.commit)
    }
}

/// Structured result of a completed ingestion.
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub collection: String,
    pub total_files: usize,
    pub total_chunks: usize,
    pub successful_chunks: usize,
    pub duration_ms: u64,
}

/// Drives the ingestion state machine for one repository snapshot at a
/// time per key, reporting progress through the shared [`StatusRegistry`].
pub struct IngestionCoordinator {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    registry: StatusRegistry,
    config: IngestConfig,
}

impl IngestionCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        registry: StatusRegistry,
        config: IngestConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            registry,
            config,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &StatusRegistry {
        &self.registry
    }

    /// Run a full ingestion, acquiring the per-key guard first.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::AlreadyRunning`] if an ingestion for the same
    /// key is in flight, or any error from [`Self::run`].
    pub async fn ingest(
        &self,
        req: &IngestRequest,
        source: &dyn FileSource,
    ) -> Result<IngestOutcome> {
        let guard = self.registry.begin(&req.repo_key)?;
        self.run(req, source, guard).await
    }

    /// Run a full ingestion under an already-acquired guard.
    ///
    /// Every terminal path updates the status record, so polling clients
    /// observe `completed` or `failed` rather than a stage that never
    /// advances.
    ///
    /// # Errors
    ///
    /// Returns an error if the source yields no eligible files, source
    /// enumeration times out, the embedding probe fails, or the collection
    /// cannot be replaced. Per-batch embedding and upsert failures are
    /// logged and skipped, not returned.
    pub async fn run(
        &self,
        req: &IngestRequest,
        source: &dyn FileSource,
        guard: IngestGuard,
    ) -> Result<IngestOutcome> {
        let _guard = guard;
        let started = Instant::now();

        match self.run_inner(req, source, started).await {
            Ok(outcome) => {
                self.registry.update(&req.repo_key, |s| {
                    s.stage = IngestStage::Completed;
                    s.progress_percent = 100;
                    s.finished_at = Some(Utc::now());
                });
                tracing::info!(
                    repo = %req.repo_key,
                    collection = %outcome.collection,
                    chunks = outcome.successful_chunks,
                    duration_ms = outcome.duration_ms,
                    "ingestion completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.registry.update(&req.repo_key, |s| {
                    s.stage = IngestStage::Failed;
                    s.error = Some(e.to_string());
                    s.finished_at = Some(Utc::now());
                });
                tracing::error!(repo = %req.repo_key, error = %e, "ingestion failed");
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        req: &IngestRequest,
        source: &dyn FileSource,
        started: Instant,
    ) -> Result<IngestOutcome> {
        let key = req.repo_key.as_str();
        let registry = &self.registry;

        registry.update(key, |s| {
            s.stage = IngestStage::LoadingFiles;
            s.progress_percent = 5;
        });

        let files = tokio::time::timeout(self.config.source_timeout, source.list())
            .await
            .map_err(|_| IngestError::SourceTimeout(self.config.source_timeout))??;
        if files.is_empty() {
            return Err(IngestError::NoEligibleFiles(req.repo_key.clone()));
        }

        let total_files = files.len();
        registry.update(key, |s| s.total_files = total_files);

        let progress_every = self.config.progress_every.max(1);
        let loaded = load_files(source, &files, self.config.fetch_concurrency, |done| {
            if done % progress_every == 0 || done == total_files {
                registry.update(key, |s| {
                    s.processed_files = done;
                    s.progress_percent = file_progress(done, total_files);
                });
            }
        })
        .await;

        registry.update(key, |s| {
            s.stage = IngestStage::Chunking;
            s.progress_percent = 30;
        });

        let mut chunks: Vec<Chunk> = Vec::new();
        for (file, text) in &loaded {
            chunks.extend(chunk_file(
                &req.repo_key,
                &file.path,
                text,
                &self.config.chunker,
            ));
        }
        let total_chunks = chunks.len();
        registry.update(key, |s| s.total_chunks = total_chunks);

        registry.update(key, |s| {
            s.stage = IngestStage::ConnectingStore;
            s.progress_percent = 40;
        });

        let collection = req.collection();
        registry.update(key, |s| s.collection = Some(collection.clone()));

        // Probe the embedder once to size the collection; a dead embedding
        // backend fails the run here instead of failing every batch below.
        let probe = self.embedder.embed("dimension probe").await?;
        let vector_size = u64::try_from(probe.len())?;
        replace_collection(self.store.as_ref(), &collection, vector_size).await?;

        registry.update(key, |s| {
            s.stage = IngestStage::GeneratingEmbeddings;
            s.progress_percent = 50;
        });

        let mut successful = 0usize;
        for (batch_idx, batch) in chunks.chunks(self.config.embed_batch.max(1)).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = match self.embedder.embed_batch(&texts).await {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(batch = batch_idx, error = %e, "embedding batch failed, skipping");
                    continue;
                }
            };

            let base = batch_idx * self.config.embed_batch.max(1);
            let points: Vec<VectorPoint> = batch
                .iter()
                .zip(vectors)
                .enumerate()
                .map(|(i, (chunk, vector))| chunk_point(req, chunk, base + i, vector))
                .collect();

            if let Err(e) = self.store.upsert(&collection, points).await {
                tracing::warn!(batch = batch_idx, error = %e, "upsert batch failed, skipping");
                continue;
            }

            successful += batch.len();
            registry.update(key, |s| {
                s.processed_chunks = successful;
                s.progress_percent = embed_progress(successful, total_chunks);
            });
        }

        Ok(IngestOutcome {
            collection,
            total_files,
            total_chunks,
            successful_chunks: successful,
            duration_ms: started.elapsed().as_millis().try_into().unwrap_or(u64::MAX),
        })
    }
}

/// Map file-loading progress into [5, 25].
fn file_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 5;
    }
    let pct = 5 + done * 20 / total;
    u8::try_from(pct).unwrap_or(25)
}

/// Map embedding progress into [50, 95].
fn embed_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 95;
    }
    let pct = 50 + done * 45 / total;
    u8::try_from(pct).unwrap_or(95)
}

fn chunk_point(req: &IngestRequest, chunk: &Chunk, index: usize, vector: Vec<f32>) -> VectorPoint {
    // Qdrant point ids must be UUIDs; derive one deterministically from the
    // chunk's identity so a same-content re-upsert overwrites.
    let descriptor = format!(
        "{}:{}:{}:{}-{}:{}",
        req.repo_key, req.commit, chunk.file_path, chunk.start, chunk.end, index
    );
    let id = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, descriptor.as_bytes()).to_string();

    let payload = serde_json::json!({
        "repo": req.repo_key,
        "commit": req.commit,
        "file": chunk.file_path,
        "start": chunk.start,
        "end": chunk.end,
        "language": chunk.language,
        "content_hash": chunk.content_hash,
        "text": chunk.text,
    });
    let payload = match payload {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => unreachable!("chunk payload is always an object"),
    };

    VectorPoint {
        id,
        vector,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use lore_llm::mock::MockEmbedder;
    use lore_store::InMemoryVectorStore;

    use super::*;
    use crate::source::LocalSource;

    fn coordinator(store: Arc<dyn VectorStore>) -> IngestionCoordinator {
        IngestionCoordinator::new(
            store,
            Arc::new(MockEmbedder::default()),
            StatusRegistry::new(),
            IngestConfig::default(),
        )
    }

    fn request() -> IngestRequest {
        IngestRequest {
            repo_key: "octo/widgets".into(),
            rev: "pr1".into(),
            commit: "abc123".into(),
        }
    }

    fn checkout() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "print('hello')\n".repeat(20)).unwrap();
        fs::write(dir.path().join("lib.rs"), "fn lib() {}\n".repeat(10)).unwrap();
        dir
    }

    #[tokio::test]
    async fn ingest_completes_with_counts() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let coordinator = coordinator(Arc::clone(&store));
        let dir = checkout();
        let source = LocalSource::new(dir.path());

        let outcome = coordinator.ingest(&request(), &source).await.unwrap();

        assert_eq!(outcome.total_files, 2);
        assert!(outcome.total_chunks > 0);
        assert_eq!(outcome.successful_chunks, outcome.total_chunks);

        let status = coordinator.registry().snapshot("octo/widgets").unwrap();
        assert_eq!(status.stage, IngestStage::Completed);
        assert_eq!(status.progress_percent, 100);
        assert!(status.error.is_none());

        let stored = store.scroll_all(&outcome.collection).await.unwrap();
        assert_eq!(stored.len(), outcome.total_chunks);
    }

    #[tokio::test]
    async fn empty_tree_fails_with_distinct_error() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let coordinator = coordinator(store);
        let dir = tempfile::tempdir().unwrap();
        let source = LocalSource::new(dir.path());

        let err = coordinator.ingest(&request(), &source).await.unwrap_err();
        assert!(matches!(err, IngestError::NoEligibleFiles(_)));

        let status = coordinator.registry().snapshot("octo/widgets").unwrap();
        assert_eq!(status.stage, IngestStage::Failed);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn reingest_replaces_collection() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let coordinator = coordinator(Arc::clone(&store));
        let dir = checkout();
        let source = LocalSource::new(dir.path());

        let first = coordinator.ingest(&request(), &source).await.unwrap();

        // Shrink the tree, re-ingest the same key: the collection must hold
        // exactly the second run's chunks.
        fs::remove_file(dir.path().join("lib.rs")).unwrap();
        let second = coordinator.ingest(&request(), &source).await.unwrap();

        assert!(second.total_chunks < first.total_chunks);
        let stored = store.scroll_all(&second.collection).await.unwrap();
        assert_eq!(stored.len(), second.total_chunks);
    }

    #[tokio::test]
    async fn failing_embedder_marks_run_failed() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let coordinator = IngestionCoordinator::new(
            store,
            Arc::new(MockEmbedder::failing()),
            StatusRegistry::new(),
            IngestConfig::default(),
        );
        let dir = checkout();
        let source = LocalSource::new(dir.path());

        assert!(coordinator.ingest(&request(), &source).await.is_err());
        let status = coordinator.registry().snapshot("octo/widgets").unwrap();
        assert_eq!(status.stage, IngestStage::Failed);
    }

    #[tokio::test]
    async fn point_metadata_carries_chunk_schema() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let coordinator = coordinator(Arc::clone(&store));
        let dir = checkout();
        let source = LocalSource::new(dir.path());

        let outcome = coordinator.ingest(&request(), &source).await.unwrap();
        let stored = store.scroll_all(&outcome.collection).await.unwrap();

        let payload = &stored[0].payload;
        for field in ["repo", "commit", "file", "start", "end", "language", "text"] {
            assert!(payload.contains_key(field), "missing payload field {field}");
        }
    }

    #[test]
    fn chunk_point_ids_deterministic_and_uuid() {
        let req = request();
        let chunk = Chunk {
            repo_key: "octo/widgets".into(),
            file_path: "main.py".into(),
            start: 0,
            end: 10,
            language: "python".into(),
            text: "print('x')".into(),
            content_hash: "h".into(),
        };
        let a = chunk_point(&req, &chunk, 0, vec![0.0]);
        let b = chunk_point(&req, &chunk, 0, vec![0.0]);
        assert_eq!(a.id, b.id);
        assert!(uuid::Uuid::parse_str(&a.id).is_ok());

        let c = chunk_point(&req, &chunk, 1, vec![0.0]);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn progress_maps_stay_in_band() {
        assert_eq!(file_progress(0, 10), 5);
        assert_eq!(file_progress(10, 10), 25);
        assert_eq!(embed_progress(0, 10), 50);
        assert_eq!(embed_progress(10, 10), 95);
        assert_eq!(embed_progress(0, 0), 95);
    }
}
