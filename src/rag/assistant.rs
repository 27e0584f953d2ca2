use anyhow::Context;
use chrono::Local;
use tracing::{info, instrument, warn};

use super::prompt::PromptBuilder;
use super::retriever::Retriever;
use super::types::StoreHit;
use crate::answer_log::AnswerLog;
use crate::llm_client::{collect_fragments, SharedLlmClient};

/// A finished answer and how it was produced.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// True when the prompt carried retrieved note passages.
    pub from_notes: bool,
    pub passages: Vec<StoreHit>,
    /// False when the answer log could not be written.
    pub logged: bool,
}

/// Answers questions from the note collection, falling back to general knowledge.
pub struct Assistant {
    retriever: Retriever,
    prompts: PromptBuilder,
    llm: SharedLlmClient,
    log: AnswerLog,
}

impl Assistant {
    pub fn new(
        retriever: Retriever,
        prompts: PromptBuilder,
        llm: SharedLlmClient,
        log: AnswerLog,
    ) -> Self {
        Self {
            retriever,
            prompts,
            llm,
            log,
        }
    }

    /// Retrieve, prompt, generate and log one answer.
    ///
    /// With `stream` set, each fragment is handed to `on_fragment` as it
    /// arrives; the returned text is the ordered concatenation.
    #[instrument(skip_all, name = "ask", fields(stream = stream))]
    pub async fn ask(
        &self,
        question: &str,
        stream: bool,
        on_fragment: impl FnMut(&str),
    ) -> anyhow::Result<Answer> {
        let question = question.trim();
        anyhow::ensure!(!question.is_empty(), "Question is empty");

        let passages = self.retriever.retrieve(question).await?;
        let texts: Vec<&str> = passages.iter().map(|hit| hit.text.as_str()).collect();
        let prompt = self
            .prompts
            .build(question, &texts, Local::now().date_naive());
        info!(
            from_notes = prompt.from_notes,
            passages = passages.len(),
            "Prompt assembled"
        );

        let text = if stream {
            let fragments = self
                .llm
                .complete_stream(&prompt.text)
                .await
                .context("Inference request failed")?;
            collect_fragments(fragments, on_fragment).await?
        } else {
            self.llm
                .complete(&prompt.text)
                .await
                .context("Inference request failed")?
        };

        let logged = match self.log.append(question, &text).await {
            Ok(()) => true,
            Err(err) => {
                warn!(?err, path = %self.log.path().display(), "Failed to record answer");
                false
            }
        };

        Ok(Answer {
            text,
            from_notes: prompt.from_notes,
            passages,
            logged,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use super::*;
    use crate::llm_client::EchoLlmClient;
    use crate::notes::chunker::chunk_document;
    use crate::notes::Document;
    use crate::rag::config::FallbackPolicy;
    use crate::rag::indexer::tests::TestEmbedder;
    use crate::rag::indexer::Indexer;
    use crate::rag::mock::MemoryVectorStore;
    use crate::rag::prompt::NOT_IN_NOTES;

    const QUESTION: &str = "What ingredients for pasta?";

    fn recipes() -> Document {
        let short = format!("Pasta needs {}.", vec!["flour"; 48].join(" "));
        let long = format!("The sauce simmers {}.", vec!["slowly"; 897].join(" "));
        Document {
            path: PathBuf::from("/vault/Recipes.md"),
            title: "Recipes".to_string(),
            tags: vec!["cooking".to_string()],
            content: format!("{short} {long}"),
        }
    }

    fn assistant(
        store: Arc<MemoryVectorStore>,
        embedder: Arc<TestEmbedder>,
        log: AnswerLog,
        fallback: FallbackPolicy,
    ) -> Assistant {
        let retriever = Retriever::new(store, embedder, "notes".to_string())
            .with_threshold(0.6)
            .with_fallback(fallback);
        Assistant::new(
            retriever,
            PromptBuilder::default(),
            EchoLlmClient::shared(),
            log,
        )
    }

    #[tokio::test]
    async fn recipes_question_is_answered_from_notes() {
        let passages = chunk_document(&recipes(), 750);
        assert_eq!(passages.len(), 2);
        assert!(passages[0].text.contains("Pasta needs"));
        assert!(passages[1].text.contains("The sauce simmers"));

        // Squared L2 of 0.4 for the short passage, far away for the long one.
        let embedder = Arc::new(TestEmbedder::with_fixed(vec![
            (QUESTION, vec![0.0, 0.0]),
            (passages[0].text.as_str(), vec![0.4_f32.sqrt(), 0.0]),
            (passages[1].text.as_str(), vec![3.0, 0.0]),
        ]));
        let store = Arc::new(MemoryVectorStore::new());
        Indexer::new(store.clone(), embedder.clone(), "notes".to_string())
            .reindex(&passages, false)
            .await
            .expect("index");

        let dir = tempfile::tempdir().expect("tempdir");
        let log = AnswerLog::new(dir.path().join("answers.log"));
        let answer = assistant(store, embedder, log.clone(), FallbackPolicy::Nearest)
            .ask(QUESTION, false, |_| {})
            .await
            .expect("answer");

        assert!(answer.from_notes);
        assert_eq!(answer.passages.len(), 1);
        assert!((answer.passages[0].distance - 0.4).abs() < 1e-4);
        assert_eq!(answer.passages[0].metadata.chunk_id, "Recipes_0");
        assert!(answer.text.contains("Context:\nRecipes\n\nPasta needs"));
        assert!(answer.text.contains(NOT_IN_NOTES));
        assert!(answer.logged);

        let logged = std::fs::read_to_string(log.path()).expect("read log");
        assert!(logged.contains(&format!("Q: {QUESTION}")));
    }

    #[tokio::test]
    async fn empty_vault_uses_general_knowledge() {
        let dir = tempfile::tempdir().expect("tempdir");
        let answer = assistant(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(TestEmbedder::default()),
            AnswerLog::new(dir.path().join("answers.log")),
            FallbackPolicy::Nearest,
        )
        .ask("Who wrote Dune?", false, |_| {})
        .await
        .expect("answer");

        assert!(!answer.from_notes);
        assert!(answer.passages.is_empty());
        assert!(!answer.text.contains("Context:"));
        assert!(answer.text.contains("general knowledge"));
    }

    #[tokio::test]
    async fn streamed_fragments_reach_the_callback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut streamed = String::new();
        let answer = assistant(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(TestEmbedder::default()),
            AnswerLog::new(dir.path().join("answers.log")),
            FallbackPolicy::Nearest,
        )
        .ask("Who wrote Dune?", true, |piece| streamed.push_str(piece))
        .await
        .expect("answer");

        assert_eq!(streamed.trim(), answer.text);
    }

    #[tokio::test]
    async fn log_failure_keeps_the_answer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let answer = assistant(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(TestEmbedder::default()),
            AnswerLog::new(dir.path().join("no-such-dir").join("answers.log")),
            FallbackPolicy::Nearest,
        )
        .ask("Who wrote Dune?", false, |_| {})
        .await
        .expect("answer");

        assert!(!answer.logged);
        assert!(answer.text.contains("Who wrote Dune?"));
    }

    #[tokio::test]
    async fn offline_store_fails_the_question() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = assistant(
            Arc::new(MemoryVectorStore::offline()),
            Arc::new(TestEmbedder::default()),
            AnswerLog::new(dir.path().join("answers.log")),
            FallbackPolicy::Nearest,
        )
        .ask("anything", false, |_| {})
        .await;

        assert!(result.is_err());
        assert!(!dir.path().join("answers.log").exists());
    }

    #[tokio::test]
    async fn blank_questions_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = assistant(
            Arc::new(MemoryVectorStore::new()),
            Arc::new(TestEmbedder::default()),
            AnswerLog::new(dir.path().join("answers.log")),
            FallbackPolicy::GeneralKnowledge,
        )
        .ask("   ", false, |_| {})
        .await;
        assert!(result.is_err());
    }
}
