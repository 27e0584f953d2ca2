use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use async_openai::{
    config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client as OpenAiClient,
};
use async_trait::async_trait;
use tracing::instrument;

use super::config::RagConfig;

#[async_trait]
pub trait EmbeddingsProvider: Send + Sync {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// Embed many texts at once; output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

pub type SharedEmbeddings = Arc<dyn EmbeddingsProvider>;

/// OpenAI-compatible embeddings endpoint (OpenAI, Ollama's `/v1`, vLLM, ...).
pub struct OpenAiEmbeddingsClient {
    client: OpenAiClient<OpenAIConfig>,
    model: String,
    cache: Mutex<HashMap<String, Vec<f32>>>,
    cache_capacity: usize,
}

impl OpenAiEmbeddingsClient {
    const BATCH_SIZE: usize = 64;

    pub fn from_config(config: &RagConfig) -> anyhow::Result<Self> {
        let mut openai_config = OpenAIConfig::new().with_api_key(config.embedding_api_key.clone());
        if let Some(base_url) = &config.embedding_base_url {
            openai_config = openai_config.with_api_base(base_url.clone());
        }

        Ok(Self {
            client: OpenAiClient::with_config(openai_config),
            model: config.embedding_model.clone(),
            cache: Mutex::new(HashMap::new()),
            cache_capacity: 512,
        })
    }

    fn cached(&self, key: &str) -> anyhow::Result<Option<Vec<f32>>> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| anyhow!("embedding cache lock poisoned"))?;
        Ok(cache.get(key).cloned())
    }

    async fn request(&self, inputs: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        let expected = inputs.len();
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.model)
            .input(inputs)
            .build()?;

        let response = self
            .client
            .embeddings()
            .create(request)
            .await
            .context("Embedding request failed")?;

        let mut data = response.data;
        data.sort_by_key(|item| item.index);
        anyhow::ensure!(
            data.len() == expected,
            "Embedding response returned {} vectors for {} inputs",
            data.len(),
            expected
        );

        Ok(data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingsProvider for OpenAiEmbeddingsClient {
    #[instrument(level = "debug", skip_all)]
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let cache_key = blake3::hash(text.as_bytes()).to_hex().to_string();

        if let Some(hit) = self.cached(&cache_key)? {
            return Ok(hit);
        }

        let embedding = self
            .request(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .context("Embedding response missing data")?;

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| anyhow!("embedding cache lock poisoned"))?;

        if cache.len() >= self.cache_capacity {
            cache.clear();
        }
        cache.insert(cache_key, embedding.clone());

        Ok(embedding)
    }

    #[instrument(level = "debug", skip_all, fields(count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(Self::BATCH_SIZE) {
            vectors.extend(self.request(batch.to_vec()).await?);
        }
        Ok(vectors)
    }
}
