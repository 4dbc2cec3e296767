//! Query-time retrieval: embed the question, fetch the nearest chunks.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use lore_llm::Embedder;
use lore_store::{StoredRecord, VectorStore};

use crate::error::Result;

/// One retrieved chunk with its stored metadata. Missing metadata fields
/// degrade to `unknown` / `None`, never to an error.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedMatch {
    pub text: String,
    pub file: String,
    pub start: Option<usize>,
    pub end: Option<usize>,
    pub language: String,
    pub score: f32,
}

/// Embeds queries and searches one collection per call.
pub struct RetrievalService {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl RetrievalService {
    #[must_use]
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Top-`k` chunks for a query, best match first, in store order.
    ///
    /// A missing collection is a valid degraded answer: the result is
    /// empty, not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if query embedding or the store search fails.
    pub async fn retrieve(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<RetrievedMatch>> {
        if k == 0 || !self.store.collection_exists(collection).await? {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        let limit = u64::try_from(k).unwrap_or(u64::MAX);
        let hits = self.store.search(collection, vector, limit).await?;

        Ok(hits
            .into_iter()
            .map(|hit| match_from_payload(hit.payload, hit.score))
            .collect())
    }

    /// Every stored chunk of a collection, for full-context consumers.
    /// Missing collections yield an empty result here too.
    ///
    /// # Errors
    ///
    /// Returns an error if the store scan fails.
    pub async fn all_matches(&self, collection: &str) -> Result<Vec<RetrievedMatch>> {
        if !self.store.collection_exists(collection).await? {
            return Ok(Vec::new());
        }

        let records = self.store.scroll_all(collection).await?;
        Ok(records
            .into_iter()
            .map(|StoredRecord { payload, .. }| match_from_payload(payload, 0.0))
            .collect())
    }
}

fn match_from_payload(
    payload: HashMap<String, serde_json::Value>,
    score: f32,
) -> RetrievedMatch {
    let get_str = |key: &str| {
        payload
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string()
    };
    let get_offset = |key: &str| {
        payload
            .get(key)
            .and_then(serde_json::Value::as_u64)
            .and_then(|v| usize::try_from(v).ok())
    };

    RetrievedMatch {
        text: get_str("text"),
        file: get_str("file"),
        start: get_offset("start"),
        end: get_offset("end"),
        language: get_str("language"),
        score,
    }
}

#[cfg(test)]
mod tests {
    use lore_llm::mock::MockEmbedder;
    use lore_store::{InMemoryVectorStore, VectorPoint};

    use super::*;

    fn service(store: Arc<dyn VectorStore>) -> RetrievalService {
        RetrievalService::new(store, Arc::new(MockEmbedder::default()))
    }

    fn point(id: &str, vector: Vec<f32>, file: &str, text: &str) -> VectorPoint {
        let payload = [
            ("file".to_string(), serde_json::json!(file)),
            ("text".to_string(), serde_json::json!(text)),
            ("start".to_string(), serde_json::json!(0)),
            ("end".to_string(), serde_json::json!(text.len())),
            ("language".to_string(), serde_json::json!("python")),
        ]
        .into_iter()
        .collect();
        VectorPoint {
            id: id.into(),
            vector,
            payload,
        }
    }

    #[tokio::test]
    async fn missing_collection_returns_empty() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let service = service(store);
        let matches = service.retrieve("missing", "query", 5).await.unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn empty_collection_returns_empty() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        store.ensure_collection("col", 8).await.unwrap();
        let service = service(store);
        let matches = service.retrieve("col", "query", 5).await.unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn retrieve_preserves_store_ranking() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        store.ensure_collection("col", 8).await.unwrap();

        // The mock embedder maps "aaa" deterministically; store one vector
        // equal to the query's and one orthogonal-ish other.
        let query_vec = {
            let e = MockEmbedder::default();
            e.embed("aaa").await.unwrap()
        };
        store
            .upsert(
                "col",
                vec![
                    point("far", vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0], "far.py", "far"),
                    point("near", query_vec, "near.py", "near"),
                ],
            )
            .await
            .unwrap();

        let service = service(store);
        let matches = service.retrieve("col", "aaa", 2).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].file, "near.py");
        assert!(matches[0].score >= matches[1].score);
    }

    #[tokio::test]
    async fn missing_metadata_degrades_to_unknown() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        store.ensure_collection("col", 8).await.unwrap();
        store
            .upsert(
                "col",
                vec![VectorPoint {
                    id: "bare".into(),
                    vector: vec![1.0; 8],
                    payload: HashMap::new(),
                }],
            )
            .await
            .unwrap();

        let service = service(store);
        let matches = service.retrieve("col", "anything", 1).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].file, "unknown");
        assert_eq!(matches[0].language, "unknown");
        assert!(matches[0].start.is_none());
    }

    #[tokio::test]
    async fn zero_k_short_circuits() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        store.ensure_collection("col", 8).await.unwrap();
        let embedder = Arc::new(MockEmbedder::default());
        let service = RetrievalService::new(store, Arc::clone(&embedder) as Arc<dyn Embedder>);

        let matches = service.retrieve("col", "query", 0).await.unwrap();
        assert!(matches.is_empty());
        assert_eq!(embedder.calls(), 0, "no embedding for k = 0");
    }

    #[tokio::test]
    async fn all_matches_scans_collection() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        store.ensure_collection("col", 8).await.unwrap();
        store
            .upsert(
                "col",
                vec![
                    point("a", vec![1.0; 8], "a.py", "aa"),
                    point("b", vec![0.5; 8], "b.py", "bb"),
                ],
            )
            .await
            .unwrap();

        let service = service(store);
        let matches = service.all_matches("col").await.unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn all_matches_missing_collection_empty() {
        let store: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
        let service = service(store);
        assert!(service.all_matches("nope").await.unwrap().is_empty());
    }
}
