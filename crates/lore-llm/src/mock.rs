//! Test-only mock provider and embedder.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_stream::StreamExt;

use crate::error::LlmError;
use crate::provider::{ChatStream, Embedder, LlmProvider, Message};

type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct MockProvider {
    pub response: String,
    pub fail_before_stream: bool,
    pub fail_mid_stream: bool,
    /// Number of fragments pulled from the backing stream so far.
    pulls: Arc<AtomicUsize>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            response: "mock response".into(),
            fail_before_stream: false,
            fail_mid_stream: false,
            pulls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_before_stream: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing_mid_stream(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            fail_mid_stream: true,
            ..Self::default()
        }
    }

    /// How many fragments have been pulled across all opened streams.
    #[must_use]
    pub fn pulled(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

impl LlmProvider for MockProvider {
    fn chat_stream<'a>(
        &'a self,
        _messages: &'a [Message],
    ) -> BoxFuture<'a, Result<ChatStream, LlmError>> {
        Box::pin(async move {
            if self.fail_before_stream {
                return Err(LlmError::Other("mock LLM error".into()));
            }

            let mut items: Vec<Result<String, LlmError>> = self
                .response
                .chars()
                .map(|c| Ok(c.to_string()))
                .collect();
            if self.fail_mid_stream {
                items.push(Err(LlmError::SseParse("mock mid-stream failure".into())));
            }

            let pulls = Arc::clone(&self.pulls);
            let counted = tokio_stream::iter(items).map(move |item| {
                pulls.fetch_add(1, Ordering::SeqCst);
                item
            });
            Ok(Box::pin(counted) as ChatStream)
        })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}

/// Deterministic embedder: the vector is a small byte-class histogram of
/// the text, so distinct texts usually get distinct directions.
#[derive(Debug, Clone, Default)]
pub struct MockEmbedder {
    pub fail: bool,
    calls: Arc<AtomicUsize>,
}

impl MockEmbedder {
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 8];
        for b in text.bytes() {
            v[(b % 8) as usize] += 1.0;
        }
        v
    }
}

impl Embedder for MockEmbedder {
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, LlmError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LlmError::Other("mock embed error".into()));
            }
            Ok(Self::vector_for(text))
        })
    }

    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, LlmError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LlmError::Other("mock embed error".into()));
            }
            Ok(texts.iter().map(|t| Self::vector_for(t)).collect())
        })
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock-embedder"
    }
}
