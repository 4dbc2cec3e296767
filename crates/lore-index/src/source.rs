//! Source tree access: enumeration and bounded-parallel content loading.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use futures::StreamExt;

use crate::chunker::is_eligible;
use crate::error::Result;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One eligible file in a source tree, addressed by repo-relative path.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub size: u64,
}

/// A readable snapshot of a repository checkout. Cloning/fetching the
/// checkout itself is someone else's job; this trait only lists and reads.
pub trait FileSource: Send + Sync {
    /// Enumerate eligible files.
    fn list(&self) -> BoxFuture<'_, Result<Vec<SourceFile>>>;

    /// Read one file's text content by relative path.
    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// Local checkout walker honoring gitignore plus the chunker's own
/// eligibility filter.
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FileSource for LocalSource {
    fn list(&self) -> BoxFuture<'_, Result<Vec<SourceFile>>> {
        Box::pin(async move {
            let mut files = Vec::new();
            for entry in ignore::WalkBuilder::new(&self.root)
                .hidden(true)
                .git_ignore(true)
                .build()
                .flatten()
            {
                if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(&self.root)
                    .unwrap_or(entry.path());
                let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
                if !is_eligible(rel, size) {
                    continue;
                }
                files.push(SourceFile {
                    path: rel.to_string_lossy().to_string(),
                    size,
                });
            }
            files.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(files)
        })
    }

    fn read<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let abs = self.root.join(path);
            Ok(tokio::fs::read_to_string(abs).await?)
        })
    }
}

/// Load file contents with bounded parallelism, preserving input order.
///
/// A single file's read error is logged and the file skipped; the overall
/// load never fails on one bad file. `on_loaded` fires once per attempted
/// file, in order, for progress reporting.
pub async fn load_files(
    source: &dyn FileSource,
    files: &[SourceFile],
    concurrency: usize,
    mut on_loaded: impl FnMut(usize),
) -> Vec<(SourceFile, String)> {
    let results: Vec<Option<(SourceFile, String)>> = futures::stream::iter(files.iter().cloned())
        .map(|file| async move {
            match source.read(&file.path).await {
                Ok(text) => Some((file, text)),
                Err(e) => {
                    tracing::warn!(file = %file.path, error = %e, "failed to read file, skipping");
                    None
                }
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut loaded = Vec::with_capacity(results.len());
    for (i, result) in results.into_iter().enumerate() {
        on_loaded(i + 1);
        if let Some(pair) = result {
            loaded.push(pair);
        }
    }
    loaded
}
