use axum::Json;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use lore_answer::{PromptInput, build_messages, stream_answer};
use lore_index::{IngestError, IngestRequest, IngestStage, LocalSource};
use lore_store::collection_name;

use crate::server::AppState;

const STREAM_CHANNEL_CAPACITY: usize = 32;

#[derive(serde::Deserialize)]
pub(crate) struct IngestPayload {
    pub repo: String,
    #[serde(default)]
    pub pr_number: Option<u64>,
    #[serde(default)]
    pub branch: Option<String>,
    pub commit: String,
    /// Local checkout root; cloning happens upstream of this service.
    pub path: String,
}

#[derive(serde::Deserialize)]
pub(crate) struct StatusQuery {
    pub repo: String,
}

#[derive(serde::Deserialize)]
pub(crate) struct ExplainPayload {
    pub repo: String,
    #[serde(default)]
    pub pr_number: Option<u64>,
    #[serde(default)]
    pub branch: Option<String>,
    pub commit: String,
    pub file: String,
    #[serde(default)]
    pub language: Option<String>,
    pub selected_text: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub full_context: bool,
}

fn bad_request(message: &str) -> axum::response::Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn rev_of(pr_number: Option<u64>, branch: Option<&str>) -> String {
    match (pr_number, branch) {
        (Some(n), _) => format!("pr{n}"),
        (None, Some(b)) if !b.trim().is_empty() => b.to_string(),
        _ => "main".to_string(),
    }
}

pub(crate) async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn ingest_handler(
    State(state): State<AppState>,
    Json(payload): Json<IngestPayload>,
) -> axum::response::Response {
    for (field, value) in [
        ("repo", &payload.repo),
        ("commit", &payload.commit),
        ("path", &payload.path),
    ] {
        if value.trim().is_empty() {
            return bad_request(&format!("missing required field: {field}"));
        }
    }

    let request = IngestRequest {
        repo_key: payload.repo.clone(),
        rev: rev_of(payload.pr_number, payload.branch.as_deref()),
        commit: payload.commit.clone(),
    };
    let collection = request.collection();

    let guard = match state.registry.begin(&request.repo_key) {
        Ok(guard) => guard,
        Err(IngestError::AlreadyRunning(key)) => {
            return (
                StatusCode::CONFLICT,
                Json(json!({ "error": format!("ingestion already running for {key}") })),
            )
                .into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response();
        }
    };

    let coordinator = state.coordinator;
    let path = payload.path.clone();
    tokio::spawn(async move {
        let source = LocalSource::new(path);
        // Terminal status is recorded by the coordinator; pollers see the
        // outcome through /status.
        let _ = coordinator.run(&request, &source, guard).await;
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "accepted",
            "repo": payload.repo,
            "collection": collection,
        })),
    )
        .into_response()
}

pub(crate) async fn status_handler(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    let retention = chrono::Duration::from_std(state.status_retention)
        .unwrap_or_else(|_| chrono::Duration::hours(1));
    state
        .registry
        .evict_finished_before(chrono::Utc::now() - retention);

    match state.registry.snapshot(&query.repo) {
        None => Json(json!({ "status": "not_started" })),
        Some(status) => {
            let state_label = match status.stage {
                IngestStage::Completed => "completed",
                IngestStage::Failed => "failed",
                _ => "in_progress",
            };
            Json(json!({
                "status": state_label,
                "stage": status.stage,
                "progress_percent": status.progress_percent,
                "total_files": status.total_files,
                "processed_files": status.processed_files,
                "total_chunks": status.total_chunks,
                "processed_chunks": status.processed_chunks,
                "collection": status.collection,
                "duration_ms": status.duration_ms(),
                "error": status.error,
            }))
        }
    }
}

pub(crate) async fn explain_handler(
    State(state): State<AppState>,
    Json(payload): Json<ExplainPayload>,
) -> axum::response::Response {
    for (field, value) in [
        ("repo", &payload.repo),
        ("commit", &payload.commit),
        ("file", &payload.file),
    ] {
        if value.trim().is_empty() {
            return bad_request(&format!("missing required field: {field}"));
        }
    }
    if payload.selected_text.trim().is_empty() {
        return bad_request("empty selection");
    }

    let rev = rev_of(payload.pr_number, payload.branch.as_deref());
    let collection = collection_name(&payload.repo, &rev, &payload.commit);

    let query = format!(
        "{}\n\nExplain the selected code block in {}. \
         Focus on purpose, parameters, invariants, side effects.",
        payload.selected_text, payload.file
    );

    let k = payload.k.unwrap_or(state.default_k);
    let lookup = if payload.full_context {
        state.retrieval.all_matches(&collection).await
    } else {
        state.retrieval.retrieve(&collection, &query, k).await
    };
    // Retrieval trouble degrades to an answer without context rather than
    // failing the whole request.
    let matches = lookup.unwrap_or_else(|e| {
        tracing::warn!(collection = %collection, error = %e, "retrieval failed, answering without context");
        Vec::new()
    });

    let messages = build_messages(&PromptInput {
        repo: &payload.repo,
        file: &payload.file,
        language: payload.language.as_deref().unwrap_or("unknown"),
        selected: &payload.selected_text,
        matches: &matches,
    });

    let (tx, rx) = tokio::sync::mpsc::channel(STREAM_CHANNEL_CAPACITY);
    let provider = state.provider;
    tokio::spawn(async move {
        stream_answer(provider.as_ref(), &messages, &tx).await;
    });

    let body = Body::from_stream(
        ReceiverStream::new(rx).map(|event| Ok::<_, std::convert::Infallible>(event.to_line())),
    );

    // No intermediary buffering: fragments must reach the client as they
    // are produced, not batched at the end.
    (
        [
            ("content-type", "application/x-ndjson"),
            ("cache-control", "no-cache"),
            ("x-accel-buffering", "no"),
        ],
        body,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rev_prefers_pr_number() {
        assert_eq!(rev_of(Some(42), Some("feature")), "pr42");
    }

    #[test]
    fn rev_uses_branch_without_pr() {
        assert_eq!(rev_of(None, Some("feature/x")), "feature/x");
    }

    #[test]
    fn rev_defaults_to_main() {
        assert_eq!(rev_of(None, None), "main");
        assert_eq!(rev_of(None, Some("  ")), "main");
    }

    #[test]
    fn ingest_payload_deserializes_minimal() {
        let json = r#"{"repo":"o/r","commit":"abc","path":"/tmp/co"}"#;
        let payload: IngestPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.repo, "o/r");
        assert!(payload.pr_number.is_none());
        assert!(payload.branch.is_none());
    }

    #[test]
    fn explain_payload_defaults() {
        let json = r#"{"repo":"o/r","commit":"abc","file":"a.py","selected_text":"x"}"#;
        let payload: ExplainPayload = serde_json::from_str(json).unwrap();
        assert!(payload.k.is_none());
        assert!(!payload.full_context);
        assert!(payload.language.is_none());
    }
}
