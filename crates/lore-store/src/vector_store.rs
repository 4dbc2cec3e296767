use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("collection error: {0}")]
    Collection(String),
    #[error("upsert error: {0}")]
    Upsert(String),
    #[error("search error: {0}")]
    Search(String),
    #[error("delete error: {0}")]
    Delete(String),
    #[error("scroll error: {0}")]
    Scroll(String),
}

/// A vector plus its payload, addressed by a collection-unique id.
/// Upserting an existing id overwrites the stored point.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: HashMap<String, serde_json::Value>,
}

/// A search hit: higher score means a better match. Result order is the
/// store's ranking and must be preserved by callers.
#[derive(Debug, Clone)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
    pub payload: HashMap<String, serde_json::Value>,
}

/// A stored point without its vector, as returned by full scans.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub payload: HashMap<String, serde_json::Value>,
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait VectorStore: Send + Sync {
    /// Idempotent get-or-create.
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn collection_exists(&self, collection: &str) -> BoxFuture<'_, Result<bool, VectorStoreError>>;

    fn delete_collection(&self, collection: &str) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> BoxFuture<'_, Result<(), VectorStoreError>>;

    /// Nearest-neighbor search, best match first.
    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, VectorStoreError>>;

    /// All stored records, for full-context consumers.
    fn scroll_all(&self, collection: &str)
    -> BoxFuture<'_, Result<Vec<StoredRecord>, VectorStoreError>>;
}

/// Delete-if-exists then create.
///
/// Called at the start of every full re-ingestion so a repeated run fully
/// replaces the prior snapshot instead of accumulating stale chunks.
///
/// # Errors
///
/// Returns an error if any of the underlying store calls fail.
pub async fn replace_collection(
    store: &dyn VectorStore,
    collection: &str,
    vector_size: u64,
) -> Result<(), VectorStoreError> {
    if store.collection_exists(collection).await? {
        store.delete_collection(collection).await?;
    }
    store.ensure_collection(collection, vector_size).await
}
