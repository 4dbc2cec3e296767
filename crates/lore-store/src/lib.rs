//! Named-collection vector storage.
//!
//! One dyn-compatible [`VectorStore`] contract with two implementations: a
//! Qdrant network adapter and an embedded in-memory fallback. Which one a
//! process uses is decided once at startup by [`select::select_store`] and
//! never re-attempted per call.

pub mod in_memory_store;
pub mod naming;
pub mod qdrant_store;
pub mod select;
pub mod vector_store;

pub use in_memory_store::InMemoryVectorStore;
pub use naming::collection_name;
pub use qdrant_store::QdrantStore;
pub use select::{StoreBackend, StoreUnavailable, select_store};
pub use vector_store::{
    ScoredVectorPoint, StoredRecord, VectorPoint, VectorStore, VectorStoreError,
    replace_collection,
};
