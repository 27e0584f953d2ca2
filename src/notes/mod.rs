pub mod chunker;
pub mod clean;
pub mod identity;
pub mod loader;

use std::path::PathBuf;

pub use chunker::chunk_documents;
pub use loader::load_notes;

/// A markdown note as read from disk, with markup already stripped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Canonical absolute path.
    pub path: PathBuf,
    pub title: String,
    pub tags: Vec<String>,
    pub content: String,
}

/// A retrievable slice of a note, prefixed with the note title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passage {
    pub text: String,
    pub title: String,
    pub tags: Vec<String>,
    pub source: PathBuf,
    pub sequence_index: usize,
    /// Human-readable `{file_stem}_{sequence_index}` label.
    pub chunk_id: String,
    /// Content-addressed id used as the vector store key.
    pub content_id: String,
}
