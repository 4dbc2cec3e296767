use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ingest: IngestSettings,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8080,
            max_body_size: 1_048_576,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            model: "qwen2.5-coder:7b".into(),
            max_tokens: 700,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".into(),
            model: "nomic-embed-text".into(),
            batch_size: 64,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Network vector store URL. Absent means the embedded store.
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub separator_aware: bool,
    pub embed_batch: usize,
    pub fetch_concurrency: usize,
    pub source_timeout_secs: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separator_aware: true,
            embed_batch: 64,
            fetch_concurrency: 8,
            source_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub default_k: usize,
    pub status_retention_secs: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            default_k: 6,
            status_retention_secs: 3600,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LORE_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Ok(v) = std::env::var("LORE_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("LORE_EMBEDDING_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("LORE_EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("LORE_STORE_URL") {
            self.store.url = Some(v);
        }
    }

    #[must_use]
    pub fn ingest_config(&self) -> lore_index::IngestConfig {
        lore_index::IngestConfig {
            chunker: lore_index::ChunkerConfig {
                chunk_size: self.ingest.chunk_size,
                chunk_overlap: self.ingest.chunk_overlap,
                separator_aware: self.ingest.separator_aware,
            },
            embed_batch: self.ingest.embed_batch,
            fetch_concurrency: self.ingest.fetch_concurrency,
            source_timeout: Duration::from_secs(self.ingest.source_timeout_secs),
            progress_every: 25,
        }
    }
}
