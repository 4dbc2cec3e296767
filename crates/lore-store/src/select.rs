//! Once-per-process store selection.

use std::sync::Arc;

use crate::in_memory_store::InMemoryVectorStore;
use crate::qdrant_store::QdrantStore;
use crate::vector_store::VectorStore;

/// Which backend a process ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Network,
    Embedded,
}

/// Why the network store was not used.
#[derive(Debug, thiserror::Error)]
pub enum StoreUnavailable {
    #[error("invalid store URL: {0}")]
    InvalidUrl(String),
    #[error("store unreachable: {0}")]
    Unreachable(String),
}

/// Pick the vector store for this process.
///
/// Probes the network store once; on any typed failure the embedded store
/// is used for the rest of the process lifetime. The decision is made here
/// exactly once — callers hold the returned handle and never re-probe.
pub async fn select_store(url: Option<&str>) -> (Arc<dyn VectorStore>, StoreBackend) {
    if let Some(url) = url {
        match probe_network(url).await {
            Ok(store) => {
                tracing::info!(url, "using network vector store");
                return (Arc::new(store), StoreBackend::Network);
            }
            Err(reason) => {
                tracing::warn!(url, %reason, "falling back to embedded vector store");
            }
        }
    }
    (Arc::new(InMemoryVectorStore::new()), StoreBackend::Embedded)
}

async fn probe_network(url: &str) -> Result<QdrantStore, StoreUnavailable> {
    let store = QdrantStore::new(url).map_err(|e| StoreUnavailable::InvalidUrl(e.to_string()))?;
    store
        .probe()
        .await
        .map_err(|e| StoreUnavailable::Unreachable(e.to_string()))?;
    Ok(store)
}
