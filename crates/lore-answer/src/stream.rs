//! Streamed answer delivery over a line-delimited wire protocol.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;

use lore_llm::{LlmProvider, Message};

/// One NDJSON wire event. A stream is zero or more `Delta`s followed by
/// exactly one terminal event: `Done` on success, `Error` on failure —
/// never both, never neither (unless the client walked away first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireEvent {
    Delta { delta: String },
    Done { done: bool },
    Error { error: String },
}

impl WireEvent {
    #[must_use]
    pub fn delta(text: impl Into<String>) -> Self {
        Self::Delta { delta: text.into() }
    }

    #[must_use]
    pub fn done() -> Self {
        Self::Done { done: true }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }

    /// Serialize as one NDJSON line, newline included.
    #[must_use]
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        line.push('\n');
        line
    }
}

/// Pump a backend completion stream into `tx` as wire events.
///
/// Fragments are forwarded in backend order. After each fragment the
/// channel is checked: once the receiver is gone the backend stream is
/// dropped without further pulls and no terminal event is emitted — nobody
/// is listening. A backend failure before the first fragment still yields
/// a single terminal error event rather than a silently empty stream.
pub async fn stream_answer(
    provider: &dyn LlmProvider,
    messages: &[Message],
    tx: &mpsc::Sender<WireEvent>,
) {
    let mut stream = match provider.chat_stream(messages).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "completion backend failed before streaming");
            let _ = tx.send(WireEvent::error(e.to_string())).await;
            return;
        }
    };

    loop {
        if tx.is_closed() {
            tracing::debug!("client disconnected, abandoning generation stream");
            return;
        }
        match stream.next().await {
            Some(Ok(fragment)) => {
                if fragment.is_empty() {
                    continue;
                }
                if tx.send(WireEvent::delta(fragment)).await.is_err() {
                    tracing::debug!("client disconnected mid-stream");
                    return;
                }
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "completion stream failed mid-generation");
                let _ = tx.send(WireEvent::error(e.to_string())).await;
                return;
            }
            None => {
                let _ = tx.send(WireEvent::done()).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use lore_llm::mock::MockProvider;

    use super::*;

    async fn collect_events(provider: &MockProvider) -> Vec<WireEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        let messages = vec![Message::user("explain")];
        stream_answer(provider, &messages, &tx).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn delta_serializes_to_wire_shape() {
        assert_eq!(
            WireEvent::delta("hi").to_line(),
            "{\"delta\":\"hi\"}\n"
        );
        assert_eq!(WireEvent::done().to_line(), "{\"done\":true}\n");
        assert_eq!(
            WireEvent::error("boom").to_line(),
            "{\"error\":\"boom\"}\n"
        );
    }

    #[test]
    fn wire_events_parse_with_one_schema() {
        let delta: WireEvent = serde_json::from_str("{\"delta\":\"x\"}").unwrap();
        let done: WireEvent = serde_json::from_str("{\"done\":true}").unwrap();
        let error: WireEvent = serde_json::from_str("{\"error\":\"e\"}").unwrap();
        assert_eq!(delta, WireEvent::delta("x"));
        assert_eq!(done, WireEvent::done());
        assert_eq!(error, WireEvent::error("e"));
    }

    #[tokio::test]
    async fn success_ends_with_single_done() {
        let provider = MockProvider::with_response("abc");
        let events = collect_events(&provider).await;

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], WireEvent::delta("a"));
        assert_eq!(events[3], WireEvent::done());
        let terminals = events
            .iter()
            .filter(|e| !matches!(e, WireEvent::Delta { .. }))
            .count();
        assert_eq!(terminals, 1);
    }

    #[tokio::test]
    async fn backend_failure_before_stream_yields_single_error() {
        let provider = MockProvider::failing();
        let events = collect_events(&provider).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], WireEvent::Error { .. }));
    }

    #[tokio::test]
    async fn mid_stream_failure_yields_error_not_done() {
        let provider = MockProvider::failing_mid_stream("ab");
        let events = collect_events(&provider).await;

        assert_eq!(events[0], WireEvent::delta("a"));
        assert_eq!(events[1], WireEvent::delta("b"));
        assert!(matches!(events.last().unwrap(), WireEvent::Error { .. }));
        assert!(!events.contains(&WireEvent::done()));
    }

    #[tokio::test]
    async fn client_disconnect_stops_backend_pulls() {
        let provider = MockProvider::with_response(&"x".repeat(100));
        let (tx, mut rx) = mpsc::channel(1);
        let messages = vec![Message::user("explain")];

        let pump = tokio::spawn({
            let provider = provider.clone();
            async move { stream_answer(&provider, &messages, &tx).await }
        });

        // Read two deltas, then walk away.
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, WireEvent::Delta { .. }));
        assert!(matches!(second, WireEvent::Delta { .. }));
        drop(rx);

        pump.await.unwrap();

        // The pump stopped long before draining the backend, and no done
        // sentinel was produced (nothing was left to receive it anyway).
        assert!(provider.pulled() < 10, "pulled {} fragments", provider.pulled());
    }

    #[tokio::test]
    async fn empty_fragments_are_skipped() {
        // MockProvider never emits empty fragments, so drive the pump with
        // a response and confirm only non-empty deltas arrive.
        let provider = MockProvider::with_response("ab");
        let events = collect_events(&provider).await;
        for event in &events {
            if let WireEvent::Delta { delta } = event {
                assert!(!delta.is_empty());
            }
        }
    }
}
