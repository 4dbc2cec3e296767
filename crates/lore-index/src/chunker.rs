//! File eligibility and separator-aware overlapping chunking.

use std::path::{Component, Path};

use serde::Serialize;

/// One chunk of a source file, the unit of embedding and retrieval.
/// Offsets are char positions in the original file text.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub repo_key: String,
    pub file_path: String,
    pub start: usize,
    pub end: usize,
    pub language: String,
    pub text: String,
    pub content_hash: String,
}

/// Chunker configuration.
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Target chunk size in chars (default: 1000).
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in chars (default: 200).
    /// Effective overlap is capped below `chunk_size` so the splitter
    /// always makes forward progress.
    pub chunk_overlap: usize,
    /// Prefer breaking at paragraph/line/space boundaries over hard cuts.
    pub separator_aware: bool,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            separator_aware: true,
        }
    }
}

/// Maximum file size considered for indexing: 1 MiB.
pub const MAX_FILE_SIZE: u64 = 1024 * 1024;

const INDEXED_EXTENSIONS: &[&str] = &[
    "rs", "py", "pyi", "js", "jsx", "mjs", "cjs", "ts", "tsx", "go", "java", "rb", "php", "c",
    "h", "cpp", "hpp", "cc", "cs", "kt", "swift", "scala", "sh", "bash", "sql", "toml", "yaml",
    "yml", "json", "md", "txt",
];

const IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    ".venv",
    "venv",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".tox",
    "vendor",
    ".idea",
    ".vscode",
];

/// Whether a file should be indexed: allow-listed extension, below the
/// size ceiling, and not under a VCS/dependency/build directory.
#[must_use]
pub fn is_eligible(path: &Path, size: u64) -> bool {
    if size > MAX_FILE_SIZE {
        return false;
    }
    let under_ignored = path.components().any(|c| {
        matches!(c, Component::Normal(name)
            if name.to_str().is_some_and(|n| IGNORED_DIRS.contains(&n)))
    });
    if under_ignored {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| INDEXED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Best-effort language tag from the file extension.
#[must_use]
pub fn detect_language(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return "unknown";
    };
    match ext.to_ascii_lowercase().as_str() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "java" => "java",
        "rb" => "ruby",
        "php" => "php",
        "c" | "h" => "c",
        "cpp" | "hpp" | "cc" => "cpp",
        "cs" => "csharp",
        "kt" => "kotlin",
        "swift" => "swift",
        "scala" => "scala",
        "sh" | "bash" => "shell",
        "sql" => "sql",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "md" => "markdown",
        "txt" => "text",
        _ => "unknown",
    }
}

/// Lazy char-span sequence over one file's text.
///
/// Each call to [`split_spans`] builds a fresh iterator, so the sequence
/// is restartable; no iteration state is shared between calls.
pub struct Spans {
    chars: Vec<char>,
    config: ChunkerConfig,
    start: usize,
}

impl Iterator for Spans {
    type Item = (usize, usize);

    fn next(&mut self) -> Option<(usize, usize)> {
        let len = self.chars.len();
        if self.start >= len {
            return None;
        }

        let hard_end = (self.start + self.config.chunk_size.max(1)).min(len);
        let end = if hard_end < len && self.config.separator_aware {
            find_break(&self.chars, self.start, hard_end)
        } else {
            hard_end
        };

        let span = (self.start, end);
        if end >= len {
            self.start = len;
        } else {
            // The max(start + 1) clamp keeps the stride positive even for
            // pathological configs (overlap == chunk_size - 1 and worse).
            self.start = end
                .saturating_sub(self.config.chunk_overlap)
                .max(self.start + 1);
        }
        Some(span)
    }
}

/// Best break position in `(start, hard_end]`: after the last paragraph
/// break, else after the last line break, else after the last space, else
/// the hard cut.
fn find_break(chars: &[char], start: usize, hard_end: usize) -> usize {
    for i in (start..hard_end.saturating_sub(1)).rev() {
        if chars[i] == '\n' && chars[i + 1] == '\n' {
            return i + 2;
        }
    }
    for i in (start..hard_end).rev() {
        if chars[i] == '\n' {
            return i + 1;
        }
    }
    for i in (start..hard_end).rev() {
        if chars[i] == ' ' {
            return i + 1;
        }
    }
    hard_end
}

/// Split `text` into overlapping char spans.
#[must_use]
pub fn split_spans(text: &str, config: &ChunkerConfig) -> Spans {
    Spans {
        chars: text.chars().collect(),
        config: config.clone(),
        start: 0,
    }
}

/// Lazy chunk sequence for one file. Whitespace-only spans are skipped.
pub struct ChunkIter {
    spans: Spans,
    repo_key: String,
    file_path: String,
    language: String,
}

impl Iterator for ChunkIter {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        loop {
            let (start, end) = self.spans.next()?;
            let text: String = self.spans.chars[start..end].iter().collect();
            if text.trim().is_empty() {
                continue;
            }
            return Some(Chunk {
                repo_key: self.repo_key.clone(),
                file_path: self.file_path.clone(),
                start,
                end,
                language: self.language.clone(),
                content_hash: blake3_hex(&text),
                text,
            });
        }
    }
}

/// Chunk one file into a lazy, restartable sequence of [`Chunk`]s with
/// exact offsets and content hashes.
#[must_use]
pub fn chunk_file(
    repo_key: &str,
    file_path: &str,
    text: &str,
    config: &ChunkerConfig,
) -> ChunkIter {
    ChunkIter {
        spans: split_spans(text, config),
        repo_key: repo_key.to_string(),
        file_path: file_path.to_string(),
        language: detect_language(Path::new(file_path)).to_string(),
    }
}

fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}
