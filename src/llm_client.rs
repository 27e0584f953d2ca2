use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client as AsyncOpenAiClient};
use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{instrument, warn};

use crate::rag::config::{parse_env, read_env};

pub type SharedLlmClient = Arc<dyn LlmClient>;

/// Ordered answer fragments; an `Err` item aborts the answer.
pub type FragmentStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;

    /// Stream the answer as fragments. Backends without streaming yield the
    /// whole answer as a single fragment.
    async fn complete_stream(&self, prompt: &str) -> anyhow::Result<FragmentStream> {
        let answer = self.complete(prompt).await?;
        Ok(Box::pin(stream::iter([Ok(answer)])))
    }
}

/// Drain a fragment stream in arrival order, handing each piece to `on_fragment`.
pub async fn collect_fragments(
    mut fragments: FragmentStream,
    mut on_fragment: impl FnMut(&str),
) -> anyhow::Result<String> {
    let mut answer = String::new();
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        on_fragment(&fragment);
        answer.push_str(&fragment);
    }
    Ok(answer.trim().to_string())
}

/// Offline stand-in that echoes the prompt back.
#[derive(Debug, Default, Clone)]
pub struct EchoLlmClient;

#[async_trait]
impl LlmClient for EchoLlmClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        Ok(format!("[echo]\n{prompt}"))
    }
}

impl EchoLlmClient {
    pub fn shared() -> SharedLlmClient {
        Arc::new(Self)
    }
}

/// Ollama's native `/api/generate` endpoint.
pub struct OllamaLlmClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaLlmClient {
    const DEFAULT_URL: &'static str = "http://localhost:11434";
    const DEFAULT_MODEL: &'static str = "mistral";

    pub fn new(base_url: String, model: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Ollama HTTP client")?;
        Ok(Self {
            http,
            base_url,
            model,
        })
    }

    fn from_env() -> anyhow::Result<Self> {
        let base_url = read_env(&["OLLAMA_URL", "LLM_BASE_URL"])
            .unwrap_or_else(|| Self::DEFAULT_URL.to_string());
        // Older configs point straight at the generate endpoint.
        let base_url = base_url
            .trim_end_matches('/')
            .trim_end_matches("/api/generate")
            .to_string();
        let model = read_env(&["LLM_MODEL", "OLLAMA_MODEL"])
            .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());
        let timeout_ms: u64 = parse_env(&["LLM_TIMEOUT_MS"])?.unwrap_or(300_000);

        Self::new(base_url, model, Duration::from_millis(timeout_ms.max(1)))
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }

    async fn send(&self, prompt: &str, stream: bool) -> anyhow::Result<reqwest::Response> {
        let response = self
            .http
            .post(self.endpoint())
            .json(&json!({ "model": self.model, "prompt": prompt, "stream": stream }))
            .send()
            .await
            .with_context(|| format!("Ollama is unreachable at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama API error {status}: {body}"));
        }
        Ok(response)
    }
}

/// Parse one NDJSON line. Malformed lines yield `None` after a warning.
fn parse_generate_line(line: &[u8]) -> Option<anyhow::Result<GenerateChunk>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerateChunk>(text) {
        Ok(chunk) => match chunk.error {
            Some(error) => Some(Err(anyhow!("Ollama generation failed: {error}"))),
            None => Some(Ok(chunk)),
        },
        Err(err) => {
            warn!(?err, "Skipping malformed streamed fragment");
            None
        }
    }
}

/// Split a byte stream into NDJSON lines and decode each into a text fragment.
fn ndjson_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::error::Error + Send + Sync + 'static,
{
    struct State<S> {
        bytes: Pin<Box<S>>,
        buffer: Vec<u8>,
        ready: VecDeque<anyhow::Result<String>>,
        finished: bool,
    }

    impl<S> State<S> {
        fn drain_lines(&mut self, flush: bool) {
            while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buffer.drain(..=pos).collect();
                self.push_line(&line);
            }
            if flush && !self.buffer.is_empty() {
                let line = std::mem::take(&mut self.buffer);
                self.push_line(&line);
            }
        }

        fn push_line(&mut self, line: &[u8]) {
            match parse_generate_line(line) {
                Some(Ok(chunk)) => {
                    if !chunk.response.is_empty() {
                        self.ready.push_back(Ok(chunk.response));
                    }
                    if chunk.done {
                        self.finished = true;
                    }
                }
                Some(Err(err)) => {
                    self.ready.push_back(Err(err));
                    self.finished = true;
                }
                None => {}
            }
        }
    }

    let state = State {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.ready.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.drain_lines(false);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((
                        Err(anyhow::Error::new(err).context("Ollama stream interrupted")),
                        state,
                    ));
                }
                None => {
                    state.drain_lines(true);
                    state.finished = true;
                }
            }
        }
    }))
}

#[async_trait]
impl LlmClient for OllamaLlmClient {
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let response = self.send(prompt, false).await?;
        let chunk: GenerateChunk = response
            .json()
            .await
            .context("Failed to decode Ollama response")?;
        if let Some(error) = chunk.error {
            return Err(anyhow!("Ollama generation failed: {error}"));
        }
        Ok(chunk.response.trim().to_string())
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn complete_stream(&self, prompt: &str) -> anyhow::Result<FragmentStream> {
        let response = self.send(prompt, true).await?;
        Ok(ndjson_fragments(response.bytes_stream()))
    }
}

/// OpenAI-compatible client that can point at OpenAI, vLLM, or any HTTP-compatible backend.
pub struct OpenAiLlmClient {
    client: AsyncOpenAiClient<OpenAIConfig>,
    model: String,
    system_prompt: String,
}

impl OpenAiLlmClient {
    const DEFAULT_MODEL: &'static str = "mistral";
    const DEFAULT_SYSTEM_PROMPT: &'static str =
        "You answer questions about the user's personal notes. Be concise and accurate.";

    fn from_env() -> anyhow::Result<Self> {
        let config = Self::build_config_from_env()?;
        let model = read_env(&["LLM_MODEL"]).unwrap_or_else(|| Self::DEFAULT_MODEL.to_string());
        let system_prompt = read_env(&["LLM_SYSTEM_PROMPT"])
            .unwrap_or_else(|| Self::DEFAULT_SYSTEM_PROMPT.to_string());

        Ok(Self {
            client: AsyncOpenAiClient::with_config(config),
            model,
            system_prompt,
        })
    }

    fn build_config_from_env() -> anyhow::Result<OpenAIConfig> {
        let api_key = read_env(&["LLM_API_KEY", "OPENAI_API_KEY"])
            .context("Set LLM_API_KEY (or OPENAI_API_KEY) to use the OpenAI backend")?;

        let mut config = OpenAIConfig::new().with_api_key(api_key);

        if let Some(base_url) = read_env(&["LLM_BASE_URL", "OPENAI_BASE_URL"]) {
            config = config.with_api_base(base_url);
        }

        Ok(config)
    }

    fn request(&self, prompt: &str) -> anyhow::Result<CreateChatCompletionRequest> {
        let system_message = ChatCompletionRequestSystemMessageArgs::default()
            .content(self.system_prompt.as_str())
            .build()?;
        let user_message = ChatCompletionRequestUserMessageArgs::default()
            .content(prompt)
            .build()?;

        Ok(CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .temperature(0.2)
            .messages(vec![system_message.into(), user_message.into()])
            .build()?)
    }
}

#[async_trait]
impl LlmClient for OpenAiLlmClient {
    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let response = self.client.chat().create(self.request(prompt)?).await?;
        let choice = response
            .choices
            .first()
            .context("LLM response did not contain any choices")?;

        Ok(choice
            .message
            .content
            .clone()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    #[instrument(level = "debug", skip_all, fields(model = %self.model))]
    async fn complete_stream(&self, prompt: &str) -> anyhow::Result<FragmentStream> {
        let events = self.client.chat().create_stream(self.request(prompt)?).await?;

        let fragments = events.filter_map(|event| async move {
            match event {
                Ok(chunk) => chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|choice| choice.delta.content)
                    .filter(|content| !content.is_empty())
                    .map(Ok),
                Err(OpenAIError::JSONDeserialize(err)) => {
                    warn!(?err, "Skipping malformed streamed fragment");
                    None
                }
                Err(err) => Some(Err(anyhow::Error::new(err).context("LLM stream interrupted"))),
            }
        });
        Ok(Box::pin(fragments))
    }
}

/// Build the configured inference backend (`LLM_BACKEND=ollama|openai`).
pub fn build_llm_client_from_env() -> anyhow::Result<SharedLlmClient> {
    let backend = read_env(&["LLM_BACKEND"]).unwrap_or_else(|| "ollama".to_string());
    match backend.to_ascii_lowercase().as_str() {
        "ollama" => Ok(Arc::new(OllamaLlmClient::from_env()?)),
        "openai" => Ok(Arc::new(OpenAiLlmClient::from_env()?)),
        "echo" => Ok(EchoLlmClient::shared()),
        other => anyhow::bail!("Unknown LLM_BACKEND '{other}' (expected ollama, openai or echo)"),
    }
}
