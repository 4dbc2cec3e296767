use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use lore_index::{IngestionCoordinator, RetrievalService, StatusRegistry};
use lore_llm::LlmProvider;

use crate::error::GatewayError;
use crate::router::build_router;

/// Shared handler state. Everything heavy sits behind an `Arc`; the store
/// and backend clients were selected once at startup and are never
/// re-probed here.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<IngestionCoordinator>,
    pub retrieval: Arc<RetrievalService>,
    pub provider: Arc<dyn LlmProvider>,
    pub registry: StatusRegistry,
    /// Terminal status records older than this are evicted lazily on
    /// status queries.
    pub status_retention: Duration,
    /// Default top-k for explain requests that don't specify one.
    pub default_k: usize,
}

pub struct GatewayServer {
    addr: SocketAddr,
    max_body_size: usize,
    state: AppState,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    #[must_use]
    pub fn new(bind: &str, port: u16, state: AppState, shutdown_rx: watch::Receiver<bool>) -> Self {
        let addr: SocketAddr = format!("{bind}:{port}").parse().unwrap_or_else(|e| {
            tracing::warn!("invalid bind '{bind}': {e}, falling back to 127.0.0.1:{port}");
            SocketAddr::from(([127, 0, 0, 1], port))
        });

        Self {
            addr,
            max_body_size: 1_048_576,
            state,
            shutdown_rx,
        }
    }

    #[must_use]
    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    /// Start the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server fails to bind or encounters a fatal
    /// IO error.
    pub async fn serve(self) -> Result<(), GatewayError> {
        let router = build_router(self.state, self.max_body_size);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| GatewayError::Bind(self.addr.to_string(), e))?;
        tracing::info!("gateway listening on {}", self.addr);

        let mut shutdown_rx = self.shutdown_rx;
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                while !*shutdown_rx.borrow_and_update() {
                    if shutdown_rx.changed().await.is_err() {
                        std::future::pending::<()>().await;
                    }
                }
                tracing::info!("gateway shutting down");
            })
            .await
            .map_err(|e| GatewayError::Server(format!("{e}")))?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use lore_llm::mock::{MockEmbedder, MockProvider};
    use lore_store::InMemoryVectorStore;

    use super::*;

    pub(crate) fn test_state() -> AppState {
        let store: Arc<dyn lore_store::VectorStore> = Arc::new(InMemoryVectorStore::new());
        let embedder: Arc<dyn lore_llm::Embedder> = Arc::new(MockEmbedder::default());
        let registry = StatusRegistry::new();
        AppState {
            coordinator: Arc::new(IngestionCoordinator::new(
                Arc::clone(&store),
                Arc::clone(&embedder),
                registry.clone(),
                lore_index::IngestConfig::default(),
            )),
            retrieval: Arc::new(RetrievalService::new(store, embedder)),
            provider: Arc::new(MockProvider::with_response("streamed answer")),
            registry,
            status_retention: Duration::from_secs(3600),
            default_k: 6,
        }
    }

    #[test]
    fn server_builder_chain() {
        let (_stx, srx) = watch::channel(false);
        let server =
            GatewayServer::new("127.0.0.1", 8090, test_state(), srx).with_max_body_size(512);
        assert_eq!(server.max_body_size, 512);
    }

    #[test]
    fn server_invalid_bind_fallback() {
        let (_stx, srx) = watch::channel(false);
        let server = GatewayServer::new("not_an_ip", 9999, test_state(), srx);
        assert_eq!(server.addr.port(), 9999);
    }
}
