//! Batched, order-preserving embedding client.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::Embedder;

type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Embedding client for OpenAI-compatible `/embeddings` backends.
///
/// Requests are split into batches of at most `batch_size` items to bound
/// per-call payload. A failed batch is retried once; if the retry also
/// fails the whole call errors, so callers never receive a result that is
/// misaligned with their input. Backend responses that return a
/// list-of-one vector per item instead of a bare vector are normalized
/// here and never leak past this adapter.
pub struct EmbeddingGateway {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    batch_size: usize,
}

impl fmt::Debug for EmbeddingGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingGateway")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl Clone for EmbeddingGateway {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            batch_size: self.batch_size,
        }
    }
}

impl EmbeddingGateway {
    #[must_use]
    pub fn new(api_key: String, mut base_url: String, model: String, batch_size: usize) -> Self {
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: crate::http::default_client(),
            api_key,
            base_url,
            model,
            batch_size: batch_size.max(1),
        }
    }

    #[must_use]
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let body = EmbeddingRequest {
            input: texts,
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.map_err(LlmError::Http)?;

        if !status.is_success() {
            tracing::error!("embedding API error {status}: {text}");
            return Err(LlmError::Other(format!(
                "embedding request failed (status {status})"
            )));
        }

        let resp: EmbeddingResponse = serde_json::from_str(&text)?;
        if resp.data.len() != texts.len() {
            return Err(LlmError::EmbeddingMismatch {
                sent: texts.len(),
                got: resp.data.len(),
            });
        }

        // Some backends omit `index`; input order is the fallback.
        let mut data = resp.data;
        data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));

        data.into_iter().map(|d| d.embedding.into_vector()).collect()
    }

    async fn request_batch_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        match self.request_batch(texts).await {
            Ok(vectors) => Ok(vectors),
            Err(first) => {
                tracing::warn!(batch = texts.len(), error = %first, "embedding batch failed, retrying once");
                self.request_batch(texts).await
            }
        }
    }
}

impl Embedder for EmbeddingGateway {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, LlmError>> {
        Box::pin(async move {
            let texts = [text.to_owned()];
            let mut vectors = self.request_batch_with_retry(&texts).await?;
            vectors.pop().ok_or(LlmError::EmptyResponse {
                provider: "embedding",
            })
        })
    }

    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, LlmError>> {
        Box::pin(async move {
            let mut out = Vec::with_capacity(texts.len());
            for batch in texts.chunks(self.batch_size) {
                let vectors = self.request_batch_with_retry(batch).await?;
                out.extend(vectors);
            }
            Ok(out)
        })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "embedding-gateway"
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: EmbeddingValue,
}

/// Backends disagree on the vector shape: most return a bare vector,
/// some wrap it in a single-element list.
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingValue {
    Flat(Vec<f32>),
    Nested(Vec<Vec<f32>>),
}

impl EmbeddingValue {
    fn into_vector(self) -> Result<Vec<f32>, LlmError> {
        match self {
            Self::Flat(v) => Ok(v),
            Self::Nested(mut v) if v.len() == 1 => Ok(v.remove(0)),
            Self::Nested(_) => Err(LlmError::EmbeddingShape),
        }
    }
}
