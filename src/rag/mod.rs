pub mod assistant;
pub mod chroma;
pub mod client;
pub mod config;
pub mod embed;
pub mod indexer;
#[cfg(test)]
pub mod mock;
pub mod prompt;
pub mod retriever;
pub mod types;

pub use assistant::{Answer, Assistant};
pub use chroma::ChromaClient;
pub use client::SharedVectorStore;
pub use config::{ChromaConfig, RagConfig};
pub use embed::{OpenAiEmbeddingsClient, SharedEmbeddings};
pub use indexer::Indexer;
pub use prompt::PromptBuilder;
pub use retriever::Retriever;
