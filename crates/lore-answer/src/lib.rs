//! Answer generation: prompt assembly and streamed NDJSON delivery.

pub mod prompt;
pub mod stream;

pub use prompt::{MAX_SELECTED_CHARS, MAX_SNIPPET_CHARS, MAX_SNIPPETS, PromptInput, build_messages};
pub use stream::{WireEvent, stream_answer};
