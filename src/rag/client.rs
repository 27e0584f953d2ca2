use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use super::types::{IndexEntry, StoreHit};

/// The vector store could not be reached; the current operation was aborted.
#[derive(Debug, thiserror::Error)]
#[error("vector store at {endpoint} is unreachable: {reason}")]
pub struct StoreUnavailable {
    pub endpoint: String,
    pub reason: String,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn heartbeat(&self) -> anyhow::Result<()>;
    async fn ensure_collection(&self, name: &str) -> anyhow::Result<()>;
    /// Dropping a collection that does not exist is not an error.
    async fn delete_collection(&self, name: &str) -> anyhow::Result<()>;
    async fn existing_ids(&self, name: &str) -> anyhow::Result<HashSet<String>>;
    async fn add(&self, name: &str, entries: Vec<IndexEntry>) -> anyhow::Result<()>;
    /// Up to `k` hits ordered by ascending distance. A missing collection yields no hits.
    async fn query(&self, name: &str, vector: &[f32], k: usize) -> anyhow::Result<Vec<StoreHit>>;
}

pub type SharedVectorStore = Arc<dyn VectorStore>;
