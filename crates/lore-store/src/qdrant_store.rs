//! Qdrant network adapter.

use std::collections::HashMap;

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    CreateCollectionBuilder, Distance, PointId, PointStruct, ScoredPoint, ScrollPointsBuilder,
    SearchPointsBuilder, UpsertPointsBuilder, VectorParamsBuilder, value::Kind,
};

use crate::vector_store::{
    ScoredVectorPoint, StoredRecord, VectorPoint, VectorStore, VectorStoreError,
};

type QdrantResult<T> = Result<T, Box<qdrant_client::QdrantError>>;

/// Thin wrapper over [`Qdrant`] encapsulating the collection operations the
/// pipeline needs.
#[derive(Clone)]
pub struct QdrantStore {
    client: Qdrant,
}

impl std::fmt::Debug for QdrantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantStore").finish_non_exhaustive()
    }
}

impl QdrantStore {
    /// Create a new `QdrantStore` connected to the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the Qdrant client cannot be created.
    pub fn new(url: &str) -> QdrantResult<Self> {
        let client = Qdrant::from_url(url).build().map_err(Box::new)?;
        Ok(Self { client })
    }

    /// One round-trip to verify the server is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the health check fails.
    pub async fn probe(&self) -> QdrantResult<()> {
        self.client.health_check().await.map_err(Box::new)?;
        Ok(())
    }

    async fn ensure_collection_inner(&self, collection: &str, vector_size: u64) -> QdrantResult<()> {
        if self
            .client
            .collection_exists(collection)
            .await
            .map_err(Box::new)?
        {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection)
                    .vectors_config(VectorParamsBuilder::new(vector_size, Distance::Cosine)),
            )
            .await
            .map_err(Box::new)?;
        Ok(())
    }

    async fn scroll_all_inner(&self, collection: &str) -> QdrantResult<Vec<StoredRecord>> {
        let mut records = Vec::new();
        let mut offset: Option<PointId> = None;

        loop {
            let mut builder = ScrollPointsBuilder::new(collection)
                .with_payload(true)
                .with_vectors(false)
                .limit(100);

            if let Some(ref off) = offset {
                builder = builder.offset(off.clone());
            }

            let response = self.client.scroll(builder).await.map_err(Box::new)?;

            for point in response.result {
                let id = point
                    .id
                    .as_ref()
                    .map(point_id_to_string)
                    .unwrap_or_default();
                let payload = qdrant_payload_to_json(point.payload);
                records.push(StoredRecord { id, payload });
            }

            match response.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }

        Ok(records)
    }
}

impl VectorStore for QdrantStore {
    fn ensure_collection(
        &self,
        collection: &str,
        vector_size: u64,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<(), VectorStoreError>> + Send + '_>,
    > {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.ensure_collection_inner(&collection, vector_size)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn collection_exists(
        &self,
        collection: &str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<bool, VectorStoreError>> + Send + '_>,
    > {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .collection_exists(&collection)
                .await
                .map_err(|e| VectorStoreError::Collection(e.to_string()))
        })
    }

    fn delete_collection(
        &self,
        collection: &str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<(), VectorStoreError>> + Send + '_>,
    > {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.client
                .delete_collection(&collection)
                .await
                .map(|_| ())
                .map_err(|e| VectorStoreError::Delete(e.to_string()))
        })
    }

    fn upsert(
        &self,
        collection: &str,
        points: Vec<VectorPoint>,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<(), VectorStoreError>> + Send + '_>,
    > {
        let collection = collection.to_owned();
        Box::pin(async move {
            let qdrant_points: Vec<PointStruct> = points
                .into_iter()
                .map(|p| {
                    let payload: HashMap<String, qdrant_client::qdrant::Value> =
                        serde_json::from_value(serde_json::Value::Object(
                            p.payload.into_iter().collect(),
                        ))
                        .unwrap_or_default();
                    PointStruct::new(p.id, p.vector, payload)
                })
                .collect();
            self.client
                .upsert_points(UpsertPointsBuilder::new(&collection, qdrant_points))
                .await
                .map(|_| ())
                .map_err(|e| VectorStoreError::Upsert(e.to_string()))
        })
    }

    fn search(
        &self,
        collection: &str,
        vector: Vec<f32>,
        limit: u64,
    ) -> std::pin::Pin<
        Box<
            dyn std::future::Future<Output = Result<Vec<ScoredVectorPoint>, VectorStoreError>>
                + Send
                + '_,
        >,
    > {
        let collection = collection.to_owned();
        Box::pin(async move {
            let builder =
                SearchPointsBuilder::new(&collection, vector, limit).with_payload(true);
            let results = self
                .client
                .search_points(builder)
                .await
                .map_err(|e| VectorStoreError::Search(e.to_string()))?;
            Ok(results
                .result
                .into_iter()
                .map(scored_point_to_vector)
                .collect())
        })
    }

    fn scroll_all(
        &self,
        collection: &str,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Vec<StoredRecord>, VectorStoreError>> + Send + '_>,
    > {
        let collection = collection.to_owned();
        Box::pin(async move {
            self.scroll_all_inner(&collection)
                .await
                .map_err(|e| VectorStoreError::Scroll(e.to_string()))
        })
    }
}

fn point_id_to_string(id: &PointId) -> String {
    match &id.point_id_options {
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(u)) => u.clone(),
        Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(n)) => n.to_string(),
        None => String::new(),
    }
}

fn qdrant_payload_to_json(
    payload: HashMap<String, qdrant_client::qdrant::Value>,
) -> HashMap<String, serde_json::Value> {
    payload
        .into_iter()
        .filter_map(|(k, v)| {
            let json_val = match v.kind? {
                Kind::StringValue(s) => serde_json::Value::String(s),
                Kind::IntegerValue(i) => serde_json::Value::Number(i.into()),
                Kind::DoubleValue(d) => {
                    serde_json::Number::from_f64(d).map(serde_json::Value::Number)?
                }
                Kind::BoolValue(b) => serde_json::Value::Bool(b),
                _ => return None,
            };
            Some((k, json_val))
        })
        .collect()
}

fn scored_point_to_vector(point: ScoredPoint) -> ScoredVectorPoint {
    let id = point
        .id
        .as_ref()
        .map(point_id_to_string)
        .unwrap_or_default();

    ScoredVectorPoint {
        id,
        score: point.score,
        payload: qdrant_payload_to_json(point.payload),
    }
}
