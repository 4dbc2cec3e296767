//! LLM and embedding backend clients.
//!
//! Wraps OpenAI-compatible HTTP services behind two narrow contracts: a
//! streaming chat completion ([`provider::LlmProvider`]) and an
//! order-preserving batched embedder ([`provider::Embedder`]). Backend
//! response quirks stay inside the adapters; nothing above this crate sees
//! raw wire shapes.

pub mod completion;
pub mod embedding;
pub mod error;
pub mod http;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod provider;
pub(crate) mod sse;

pub use completion::CompletionClient;
pub use embedding::EmbeddingGateway;
pub use error::{LlmError, Result};
pub use provider::{ChatStream, Embedder, LlmProvider, Message, Role};
