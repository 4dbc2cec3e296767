//! Error types for lore-index.

use std::time::Duration;

/// Errors that can occur during ingestion or retrieval.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// IO error reading source files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Vector store error.
    #[error("vector store error: {0}")]
    Store(#[from] lore_store::VectorStoreError),

    /// Embedding backend error.
    #[error("embedding error: {0}")]
    Embed(#[from] lore_llm::LlmError),

    /// The source tree contained no files passing the eligibility filter.
    #[error("no eligible files under {0}")]
    NoEligibleFiles(String),

    /// Source enumeration exceeded the wall-clock budget. Kept distinct
    /// from other failures so callers can tell a slow checkout apart from
    /// a broken one.
    #[error("source enumeration timed out after {0:?}")]
    SourceTimeout(Duration),

    /// An ingestion for this repository key is already in flight.
    #[error("ingestion already running for {0}")]
    AlreadyRunning(String),

    /// Integer conversion error.
    #[error("integer conversion failed: {0}")]
    IntConversion(#[from] std::num::TryFromIntError),

    /// Generic catch-all error.
    #[error("{0}")]
    Other(String),
}

/// Result type alias using `IngestError`.
pub type Result<T> = std::result::Result<T, IngestError>;
