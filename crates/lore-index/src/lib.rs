//! Repository ingestion and retrieval.
//!
//! Ingestion walks a checkout, splits eligible files into overlapping
//! chunks, embeds them in batches, and stores chunk+vector pairs under a
//! deterministic collection name — while a per-repository status record
//! tracks progress for polling clients. Retrieval embeds a query and
//! returns the nearest stored chunks.

pub mod chunker;
pub mod error;
pub mod ingest;
pub mod retriever;
pub mod source;
pub mod status;

pub use chunker::{Chunk, ChunkerConfig};
pub use error::{IngestError, Result};
pub use ingest::{IngestConfig, IngestOutcome, IngestRequest, IngestionCoordinator};
pub use retriever::{RetrievalService, RetrievedMatch};
pub use source::{FileSource, LocalSource, SourceFile};
pub use status::{IngestStage, IngestionStatus, StatusRegistry};
