use serde::{Deserialize, Serialize};

use crate::notes::Passage;

/// Metadata stored next to each embedded passage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassageMetadata {
    #[serde(default)]
    pub title: String,
    /// Tags joined with `", "`.
    #[serde(default)]
    pub tags: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub chunk_id: String,
}

impl PassageMetadata {
    pub fn from_passage(passage: &Passage) -> Self {
        Self {
            title: passage.title.clone(),
            tags: passage.tags.join(", "),
            source: passage.source.display().to_string(),
            chunk_id: passage.chunk_id.clone(),
        }
    }
}

/// One passage as proposed to the vector store.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub document: String,
    pub metadata: PassageMetadata,
}

/// A nearest-neighbour hit, ordered by ascending distance within a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreHit {
    pub id: String,
    pub text: String,
    pub metadata: PassageMetadata,
    pub distance: f32,
}

/// Outcome of one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub total: usize,
    pub skipped: usize,
    pub duplicates: usize,
    pub added: usize,
}

impl std::fmt::Display for IndexReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} passages: {} added, {} already indexed, {} duplicates dropped",
            self.total, self.added, self.skipped, self.duplicates
        )
    }
}
