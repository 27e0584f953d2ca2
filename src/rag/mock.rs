use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;

use super::client::{StoreUnavailable, VectorStore};
use super::types::{IndexEntry, StoreHit};

/// In-process vector store using squared Euclidean distance, matching
/// Chroma's default `l2` space.
#[derive(Default)]
pub struct MemoryVectorStore {
    collections: Mutex<HashMap<String, Vec<IndexEntry>>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every call fails as unreachable.
    pub fn offline() -> Self {
        let store = Self::default();
        store.set_offline(true);
        store
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of `add` calls that actually wrote entries.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn entry_count(&self, name: &str) -> usize {
        self.collections
            .lock()
            .expect("memory store poisoned")
            .get(name)
            .map_or(0, Vec::len)
    }

    fn check_online(&self) -> anyhow::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreUnavailable {
                endpoint: "memory".to_string(),
                reason: "store is offline".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }
}

#[async_trait::async_trait]
impl VectorStore for MemoryVectorStore {
    async fn heartbeat(&self) -> anyhow::Result<()> {
        self.check_online()
    }

    async fn ensure_collection(&self, name: &str) -> anyhow::Result<()> {
        self.check_online()?;
        self.collections
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> anyhow::Result<()> {
        self.check_online()?;
        self.collections
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?
            .remove(name);
        Ok(())
    }

    async fn existing_ids(&self, name: &str) -> anyhow::Result<HashSet<String>> {
        self.check_online()?;
        let collections = self
            .collections
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        Ok(collections
            .get(name)
            .map(|entries| entries.iter().map(|entry| entry.id.clone()).collect())
            .unwrap_or_default())
    }

    async fn add(&self, name: &str, entries: Vec<IndexEntry>) -> anyhow::Result<()> {
        self.check_online()?;
        if entries.is_empty() {
            return Ok(());
        }
        let mut collections = self
            .collections
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        let collection = collections
            .get_mut(name)
            .ok_or_else(|| anyhow!("collection '{name}' does not exist"))?;

        for entry in entries {
            if collection.iter().any(|existing| existing.id == entry.id) {
                return Err(anyhow!("duplicate id '{}' in collection '{name}'", entry.id));
            }
            collection.push(entry);
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, name: &str, vector: &[f32], k: usize) -> anyhow::Result<Vec<StoreHit>> {
        self.check_online()?;
        let collections = self
            .collections
            .lock()
            .map_err(|_| anyhow!("memory store lock poisoned"))?;
        let Some(entries) = collections.get(name) else {
            return Ok(Vec::new());
        };

        let mut hits: Vec<StoreHit> = entries
            .iter()
            .map(|entry| StoreHit {
                id: entry.id.clone(),
                text: entry.document.clone(),
                metadata: entry.metadata.clone(),
                distance: Self::squared_l2(&entry.vector, vector),
            })
            .collect();
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::types::PassageMetadata;

    fn entry(id: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            vector,
            document: format!("text of {id}"),
            metadata: PassageMetadata::default(),
        }
    }

    #[tokio::test]
    async fn query_orders_by_ascending_distance() {
        let store = MemoryVectorStore::new();
        store.ensure_collection("notes").await.expect("create");
        store
            .add(
                "notes",
                vec![
                    entry("far", vec![3.0, 0.0]),
                    entry("near", vec![0.5, 0.0]),
                    entry("mid", vec![1.0, 0.0]),
                ],
            )
            .await
            .expect("add");

        let hits = store.query("notes", &[0.0, 0.0], 2).await.expect("query");
        let ids: Vec<_> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "mid"]);
        assert_eq!(hits[0].distance, 0.25);
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_missing_collections_query_empty() {
        let store = MemoryVectorStore::new();
        store.delete_collection("absent").await.expect("delete absent");
        assert!(store.query("absent", &[1.0], 3).await.expect("query").is_empty());
        assert!(store.existing_ids("absent").await.expect("ids").is_empty());
    }

    #[tokio::test]
    async fn offline_store_rejects_calls() {
        let store = MemoryVectorStore::offline();
        let err = store.heartbeat().await.expect_err("offline");
        assert!(err.downcast_ref::<StoreUnavailable>().is_some());
        assert!(store.ensure_collection("notes").await.is_err());
    }
}
