use std::collections::HashSet;

use anyhow::Context;
use tracing::{info, instrument, warn};

use super::client::SharedVectorStore;
use super::embed::SharedEmbeddings;
use super::types::{IndexEntry, IndexReport, PassageMetadata};
use crate::notes::Passage;

/// Reconciles local passages with what the vector collection already holds.
pub struct Indexer {
    store: SharedVectorStore,
    embedder: SharedEmbeddings,
    collection: String,
}

impl Indexer {
    pub fn new(store: SharedVectorStore, embedder: SharedEmbeddings, collection: String) -> Self {
        Self {
            store,
            embedder,
            collection,
        }
    }

    /// Embed and store only the passages whose content id is not yet indexed.
    ///
    /// With `reset` the collection is dropped first. An unreachable store
    /// aborts before anything is written.
    #[instrument(
        skip_all,
        name = "reindex",
        fields(collection = %self.collection, passages = passages.len(), reset = reset)
    )]
    pub async fn reindex(&self, passages: &[Passage], reset: bool) -> anyhow::Result<IndexReport> {
        self.store.heartbeat().await?;

        if reset {
            info!("Dropping collection before reindex");
            self.store
                .delete_collection(&self.collection)
                .await
                .context("Failed to reset collection")?;
        }

        self.store
            .ensure_collection(&self.collection)
            .await
            .context("Failed to prepare collection")?;

        let existing = self
            .store
            .existing_ids(&self.collection)
            .await
            .context("Failed to list indexed passages")?;

        let mut report = IndexReport {
            total: passages.len(),
            ..IndexReport::default()
        };

        let mut batch_ids: HashSet<&str> = HashSet::new();
        let mut fresh: Vec<&Passage> = Vec::new();
        for passage in passages {
            if existing.contains(&passage.content_id) {
                report.skipped += 1;
                continue;
            }
            if !batch_ids.insert(passage.content_id.as_str()) {
                warn!(
                    content_id = %passage.content_id,
                    chunk_id = %passage.chunk_id,
                    "Dropping duplicate passage"
                );
                report.duplicates += 1;
                continue;
            }
            fresh.push(passage);
        }

        if fresh.is_empty() {
            info!(skipped = report.skipped, "Nothing new to index");
            return Ok(report);
        }

        let texts: Vec<String> = fresh.iter().map(|passage| passage.text.clone()).collect();
        info!(count = texts.len(), "Embedding new passages");
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("Failed to embed passages")?;
        anyhow::ensure!(
            vectors.len() == fresh.len(),
            "Embedder returned {} vectors for {} passages",
            vectors.len(),
            fresh.len()
        );

        let entries: Vec<IndexEntry> = fresh
            .iter()
            .zip(vectors)
            .map(|(passage, vector)| IndexEntry {
                id: passage.content_id.clone(),
                vector,
                document: passage.text.clone(),
                metadata: PassageMetadata::from_passage(passage),
            })
            .collect();

        report.added = entries.len();
        self.store
            .add(&self.collection, entries)
            .await
            .context("Failed to store embeddings")?;

        info!(
            added = report.added,
            skipped = report.skipped,
            duplicates = report.duplicates,
            "Reindex complete"
        );
        Ok(report)
    }
}
