use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Context;

/// What the retriever does when no passage clears the distance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    /// Keep the single nearest passage regardless of its distance.
    Nearest,
    /// Return nothing, so the prompt falls back to general knowledge.
    GeneralKnowledge,
}

impl FromStr for FallbackPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "nearest" | "top1" | "top-1" => Ok(Self::Nearest),
            "none" | "off" | "general" => Ok(Self::GeneralKnowledge),
            other => anyhow::bail!("unknown retrieval fallback policy '{other}'"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RagConfig {
    pub embedding_api_key: String,
    pub embedding_base_url: Option<String>,
    pub embedding_model: String,
    pub top_k: usize,
    pub distance_threshold: f32,
    pub fallback: FallbackPolicy,
    pub max_chunk_chars: usize,
    pub max_context_chars: Option<usize>,
    pub notes_dirs: Vec<PathBuf>,
    pub reset_on_reindex: bool,
    pub answer_log: PathBuf,
}

impl RagConfig {
    const EMBEDDING_KEY_VARS: [&'static str; 2] = ["EMBEDDING_API_KEY", "OPENAI_API_KEY"];
    const EMBEDDING_BASE_URL_VARS: [&'static str; 2] = ["EMBEDDING_BASE_URL", "OPENAI_BASE_URL"];
    const EMBEDDING_MODEL_VARS: [&'static str; 1] = ["EMBEDDING_MODEL"];
    const TOP_K_VARS: [&'static str; 1] = ["TOP_K"];
    const THRESHOLD_VARS: [&'static str; 1] = ["DISTANCE_THRESHOLD"];
    const FALLBACK_VARS: [&'static str; 1] = ["RETRIEVAL_FALLBACK"];
    const MAX_CHUNK_VARS: [&'static str; 1] = ["MAX_CHUNK_CHARS"];
    const MAX_CONTEXT_VARS: [&'static str; 1] = ["MAX_CONTEXT_CHARS"];
    const NOTES_DIRS_VARS: [&'static str; 2] = ["NOTES_DIRS", "NOTES_DIR"];
    const RESET_VARS: [&'static str; 1] = ["REINDEX_RESET"];
    const ANSWER_LOG_VARS: [&'static str; 1] = ["ANSWER_LOG"];

    pub const DEFAULT_TOP_K: usize = 10;
    pub const DEFAULT_THRESHOLD: f32 = 0.6;
    pub const DEFAULT_MAX_CHUNK_CHARS: usize = 2000;

    pub fn from_env() -> anyhow::Result<Self> {
        let embedding_api_key =
            read_env(&Self::EMBEDDING_KEY_VARS).unwrap_or_else(|| "ollama".to_string());
        let embedding_model =
            read_env(&Self::EMBEDDING_MODEL_VARS).unwrap_or_else(|| "all-minilm".to_string());

        let top_k = parse_env(&Self::TOP_K_VARS)?.unwrap_or(Self::DEFAULT_TOP_K);
        let distance_threshold =
            parse_env(&Self::THRESHOLD_VARS)?.unwrap_or(Self::DEFAULT_THRESHOLD);
        let fallback = parse_env(&Self::FALLBACK_VARS)?.unwrap_or(FallbackPolicy::Nearest);
        let max_chunk_chars =
            parse_env(&Self::MAX_CHUNK_VARS)?.unwrap_or(Self::DEFAULT_MAX_CHUNK_CHARS);
        let max_context_chars = parse_env(&Self::MAX_CONTEXT_VARS)?;
        let reset_on_reindex = read_env(&Self::RESET_VARS)
            .map(|value| parse_flag(&value))
            .unwrap_or(false);

        let notes_dirs = read_env(&Self::NOTES_DIRS_VARS)
            .map(|value| env::split_paths(&value).collect::<Vec<_>>())
            .filter(|dirs| !dirs.is_empty())
            .unwrap_or_else(|| vec![PathBuf::from("notes")]);

        let config = Self {
            embedding_api_key,
            embedding_base_url: read_env(&Self::EMBEDDING_BASE_URL_VARS)
                .or_else(|| Some("http://127.0.0.1:11434/v1".to_string())),
            embedding_model,
            top_k: top_k.max(1),
            distance_threshold,
            fallback,
            max_chunk_chars,
            max_context_chars,
            notes_dirs,
            reset_on_reindex,
            answer_log: read_env(&Self::ANSWER_LOG_VARS)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("answers.log")),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.distance_threshold >= 0.0,
            "DISTANCE_THRESHOLD must be non-negative"
        );
        anyhow::ensure!(self.max_chunk_chars > 0, "MAX_CHUNK_CHARS must be positive");
        anyhow::ensure!(
            self.max_context_chars != Some(0),
            "MAX_CONTEXT_CHARS must be positive when set"
        );
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ChromaConfig {
    pub host: String,
    pub port: u16,
    pub auth_token: Option<String>,
    pub collection: String,
    pub http_timeout_ms: u64,
}

impl ChromaConfig {
    const HOST_VARS: [&'static str; 1] = ["CHROMA_HOST"];
    const PORT_VARS: [&'static str; 1] = ["CHROMA_PORT"];
    const AUTH_TOKEN_VARS: [&'static str; 1] = ["CHROMA_AUTH_TOKEN"];
    const COLLECTION_VARS: [&'static str; 2] = ["VAULT_COLLECTION", "CHROMA_COLLECTION"];
    const TIMEOUT_VARS: [&'static str; 1] = ["HTTP_TIMEOUT_MS"];

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            host: read_env(&Self::HOST_VARS).unwrap_or_else(|| "localhost".to_string()),
            port: parse_env(&Self::PORT_VARS)?.unwrap_or(8000),
            auth_token: read_env(&Self::AUTH_TOKEN_VARS),
            collection: read_env(&Self::COLLECTION_VARS)
                .unwrap_or_else(|| "vault-rummager".to_string()),
            http_timeout_ms: parse_env(&Self::TIMEOUT_VARS)?.unwrap_or(30_000),
        })
    }

    pub fn base_url(&self) -> String {
        if self.host.starts_with("http://") || self.host.starts_with("https://") {
            format!("{}:{}", self.host.trim_end_matches('/'), self.port)
        } else {
            format!("http://{}:{}", self.host, self.port)
        }
    }
}

pub(crate) fn read_env(candidates: &[&'static str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|key| env::var(key).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn parse_env<T>(candidates: &[&'static str]) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = read_env(candidates) else {
        return Ok(None);
    };
    raw.parse::<T>()
        .map(Some)
        .map_err(|err| anyhow::anyhow!("{err}"))
        .with_context(|| format!("Invalid value '{raw}' for {}", candidates.join("/")))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
