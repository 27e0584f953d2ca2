use anyhow::Context;
use tracing::{debug, info, instrument};

use super::client::SharedVectorStore;
use super::config::{FallbackPolicy, RagConfig};
use super::embed::SharedEmbeddings;
use super::types::StoreHit;

/// Nearest-neighbour lookup with a relevance cut-off.
pub struct Retriever {
    store: SharedVectorStore,
    embedder: SharedEmbeddings,
    collection: String,
    top_k: usize,
    threshold: f32,
    fallback: FallbackPolicy,
}

impl Retriever {
    pub fn new(store: SharedVectorStore, embedder: SharedEmbeddings, collection: String) -> Self {
        Self {
            store,
            embedder,
            collection,
            top_k: RagConfig::DEFAULT_TOP_K,
            threshold: RagConfig::DEFAULT_THRESHOLD,
            fallback: FallbackPolicy::Nearest,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackPolicy) -> Self {
        self.fallback = fallback;
        self
    }

    #[instrument(
        skip_all,
        name = "retrieve",
        fields(top_k = self.top_k, threshold = self.threshold)
    )]
    pub async fn retrieve(&self, question: &str) -> anyhow::Result<Vec<StoreHit>> {
        let vector = self
            .embedder
            .embed(question)
            .await
            .context("Failed to embed question")?;

        let hits = self
            .store
            .query(&self.collection, &vector, self.top_k)
            .await
            .context("Vector store query failed")?;
        debug!(raw = hits.len(), "Vector store returned hits");

        let selected = select_passages(hits, self.threshold, self.fallback);
        info!(selected = selected.len(), "Retrieved passages");
        Ok(selected)
    }
}

/// Keep hits strictly closer than `threshold`, nearest first.
///
/// When none qualify, [`FallbackPolicy::Nearest`] keeps the single nearest
/// hit and [`FallbackPolicy::GeneralKnowledge`] keeps nothing.
pub fn select_passages(
    mut hits: Vec<StoreHit>,
    threshold: f32,
    fallback: FallbackPolicy,
) -> Vec<StoreHit> {
    hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));

    let cutoff = hits.partition_point(|hit| hit.distance < threshold);
    if cutoff > 0 {
        hits.truncate(cutoff);
        return hits;
    }

    match fallback {
        FallbackPolicy::Nearest => {
            if let Some(nearest) = hits.first() {
                info!(
                    distance = nearest.distance,
                    threshold, "No passage under threshold; using nearest match"
                );
            }
            hits.truncate(1);
            hits
        }
        FallbackPolicy::GeneralKnowledge => Vec::new(),
    }
}
