use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::client::{StoreUnavailable, VectorStore};
use super::config::ChromaConfig;
use super::types::{IndexEntry, PassageMetadata, StoreHit};

/// Minimal HTTP client for Chroma's REST surface.
pub struct ChromaClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    collection_ids: Mutex<HashMap<String, String>>,
}

impl ChromaClient {
    const GET_PAGE_SIZE: usize = 1_000;

    pub fn new(config: &ChromaConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_millis(config.http_timeout_ms.max(1));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Chroma HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            auth_token: config.auth_token.clone(),
            collection_ids: Mutex::new(HashMap::new()),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/api/v1/{path}")
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.auth_token {
            builder.bearer_auth(token)
        } else {
            builder
        }
    }

    fn unavailable(&self, err: &reqwest::Error) -> StoreUnavailable {
        StoreUnavailable {
            endpoint: self.base_url.clone(),
            reason: err.to_string(),
        }
    }

    async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        payload: &T,
    ) -> anyhow::Result<R> {
        let response = self
            .apply_auth(self.http.post(self.endpoint(path)))
            .json(payload)
            .send()
            .await
            .map_err(|err| self.unavailable(&err))?;

        let response = error_for_status(response)
            .await
            .with_context(|| format!("Chroma request '{path}' failed"))?;

        response
            .json::<R>()
            .await
            .with_context(|| format!("Failed to deserialize Chroma '{path}' response"))
    }

    /// Resolve a collection id, returning `None` when it does not exist.
    async fn lookup_collection(&self, name: &str) -> anyhow::Result<Option<String>> {
        if let Some(id) = self.collection_ids.lock().await.get(name) {
            return Ok(Some(id.clone()));
        }

        let response = self
            .apply_auth(self.http.get(self.endpoint(&format!("collections/{name}"))))
            .send()
            .await
            .map_err(|err| self.unavailable(&err))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if is_missing_collection(status, &body) {
                return Ok(None);
            }
            return Err(anyhow!(
                "Chroma collection lookup for '{name}' returned status {status}: {body}"
            ));
        }

        let collection: CollectionResponse = response
            .json()
            .await
            .context("Failed to deserialize Chroma collection response")?;

        self.collection_ids
            .lock()
            .await
            .insert(name.to_string(), collection.id.clone());
        Ok(Some(collection.id))
    }

    async fn require_collection(&self, name: &str) -> anyhow::Result<String> {
        self.lookup_collection(name)
            .await?
            .ok_or_else(|| anyhow!("Chroma collection '{name}' does not exist"))
    }
}

#[async_trait]
impl VectorStore for ChromaClient {
    #[instrument(level = "debug", skip_all)]
    async fn heartbeat(&self) -> anyhow::Result<()> {
        let response = self
            .apply_auth(self.http.get(self.endpoint("heartbeat")))
            .send()
            .await
            .map_err(|err| self.unavailable(&err))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(StoreUnavailable {
                endpoint: self.base_url.clone(),
                reason: format!("heartbeat returned status {}", response.status()),
            }
            .into())
        }
    }

    async fn ensure_collection(&self, name: &str) -> anyhow::Result<()> {
        let collection: CollectionResponse = self
            .post_json(
                "collections",
                &json!({ "name": name, "get_or_create": true }),
            )
            .await
            .with_context(|| format!("Failed to create Chroma collection '{name}'"))?;

        debug!(collection = name, id = %collection.id, "Chroma collection ready");
        self.collection_ids
            .lock()
            .await
            .insert(name.to_string(), collection.id);
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> anyhow::Result<()> {
        self.collection_ids.lock().await.remove(name);

        let response = self
            .apply_auth(self.http.delete(self.endpoint(&format!("collections/{name}"))))
            .send()
            .await
            .map_err(|err| self.unavailable(&err))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if is_missing_collection(status, &body) {
            return Ok(());
        }
        Err(anyhow!(
            "Chroma delete of '{name}' returned status {status}: {body}"
        ))
    }

    async fn existing_ids(&self, name: &str) -> anyhow::Result<HashSet<String>> {
        let Some(collection_id) = self.lookup_collection(name).await? else {
            return Ok(HashSet::new());
        };

        let mut ids = HashSet::new();
        let mut offset = 0;
        loop {
            let page: GetResponse = self
                .post_json(
                    &format!("collections/{collection_id}/get"),
                    &json!({
                        "include": [],
                        "limit": Self::GET_PAGE_SIZE,
                        "offset": offset,
                    }),
                )
                .await
                .context("Failed to list Chroma ids")?;

            let fetched = page.ids.len();
            ids.extend(page.ids);
            if fetched < Self::GET_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        Ok(ids)
    }

    async fn add(&self, name: &str, entries: Vec<IndexEntry>) -> anyhow::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let collection_id = self.require_collection(name).await?;

        let mut ids = Vec::with_capacity(entries.len());
        let mut embeddings = Vec::with_capacity(entries.len());
        let mut documents = Vec::with_capacity(entries.len());
        let mut metadatas = Vec::with_capacity(entries.len());
        for entry in entries {
            ids.push(entry.id);
            embeddings.push(entry.vector);
            documents.push(entry.document);
            metadatas.push(entry.metadata);
        }

        let response = self
            .apply_auth(
                self.http
                    .post(self.endpoint(&format!("collections/{collection_id}/add"))),
            )
            .json(&AddRequest {
                ids,
                embeddings,
                documents,
                metadatas,
            })
            .send()
            .await
            .map_err(|err| self.unavailable(&err))?;

        error_for_status(response)
            .await
            .with_context(|| format!("Chroma add to '{name}' failed"))?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self, vector))]
    async fn query(&self, name: &str, vector: &[f32], k: usize) -> anyhow::Result<Vec<StoreHit>> {
        let Some(collection_id) = self.lookup_collection(name).await? else {
            warn!(collection = name, "Chroma collection missing; nothing to retrieve");
            return Ok(Vec::new());
        };

        let response: QueryResponse = self
            .post_json(
                &format!("collections/{collection_id}/query"),
                &json!({
                    "query_embeddings": [vector],
                    "n_results": k.max(1),
                    "include": ["documents", "metadatas", "distances"],
                }),
            )
            .await
            .context("Chroma query failed")?;

        Ok(response.into_hits())
    }
}

async fn error_for_status(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("status {status}: {body}"))
}

/// Older servers report a missing collection as a 4xx/5xx with a ValueError body.
fn is_missing_collection(status: StatusCode, body: &str) -> bool {
    status == StatusCode::NOT_FOUND || body.contains("does not exist")
}

#[derive(Debug, Deserialize)]
struct CollectionResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GetResponse {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct AddRequest {
    ids: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    documents: Vec<String>,
    metadatas: Vec<PassageMetadata>,
}

/// Query results are nested one level per query embedding; we always send one.
#[derive(Debug, Default, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<PassageMetadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

impl QueryResponse {
    fn into_hits(self) -> Vec<StoreHit> {
        let ids = self.ids.into_iter().next().unwrap_or_default();
        let documents = self
            .documents
            .and_then(|rows| rows.into_iter().next())
            .unwrap_or_default();
        let metadatas = self
            .metadatas
            .and_then(|rows| rows.into_iter().next())
            .unwrap_or_default();
        let distances = self
            .distances
            .and_then(|rows| rows.into_iter().next())
            .unwrap_or_default();

        let mut hits: Vec<StoreHit> = ids
            .into_iter()
            .enumerate()
            .map(|(idx, id)| StoreHit {
                id,
                text: documents.get(idx).cloned().flatten().unwrap_or_default(),
                metadata: metadatas.get(idx).cloned().flatten().unwrap_or_default(),
                distance: distances
                    .get(idx)
                    .copied()
                    .flatten()
                    .unwrap_or(f32::INFINITY),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits
    }
}
