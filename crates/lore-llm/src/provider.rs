use std::future::Future;
use std::pin::Pin;

use futures_core::Stream;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Stream of incremental text fragments from a completion backend.
pub type ChatStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Streaming completion backend. Each call opens a fresh backend stream;
/// streams are not restartable.
pub trait LlmProvider: Send + Sync {
    /// Open a streaming completion for the given messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the request before any
    /// fragment is produced.
    fn chat_stream<'a>(&'a self, messages: &'a [Message]) -> BoxFuture<'a, Result<ChatStream, LlmError>>;

    fn name(&self) -> &str;
}

/// Text-to-vector embedding backend.
///
/// `embed_batch` is order-preserving and length-preserving: the result has
/// exactly one vector per input text, in input order, or the whole call
/// fails. Partial results are never returned, so callers can skip a failed
/// batch without ever holding misaligned chunk/vector pairs.
pub trait Embedder: Send + Sync {
    /// Embed a single text (used for query embedding).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails.
    fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<Vec<f32>, LlmError>>;

    /// Embed a slice of texts, preserving order and length.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend call fails or the response does not
    /// align one-to-one with the input.
    fn embed_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> BoxFuture<'a, Result<Vec<Vec<f32>>, LlmError>>;

    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::system("a").role, Role::System);
        assert_eq!(Message::user("b").role, Role::User);
    }

    #[test]
    fn role_serializes_lowercase() {
        let json = serde_json::to_string(&Role::Assistant).unwrap();
        assert_eq!(json, "\"assistant\"");
    }

    #[test]
    fn message_roundtrips_through_json() {
        let msg = Message::user("explain this");
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back.role, Role::User);
        assert_eq!(back.content, "explain this");
    }
}
