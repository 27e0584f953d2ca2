mod answer_log;
mod llm_client;
mod notes;
mod rag;

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use answer_log::AnswerLog;
use llm_client::build_llm_client_from_env;
use notes::{chunk_documents, load_notes};
use rag::{
    Answer, Assistant, ChromaClient, ChromaConfig, Indexer, OpenAiEmbeddingsClient,
    PromptBuilder, RagConfig, Retriever, SharedEmbeddings, SharedVectorStore,
};

const SOURCE_PREVIEW_CHARS: usize = 300;

#[derive(Parser, Debug)]
#[command(
    name = "vault-rummager",
    about = "Ask questions about your markdown notes, answered by a local LLM"
)]
struct Cli {
    /// Number of nearest passages to fetch per question (overrides TOP_K).
    #[arg(long, global = true)]
    top_k: Option<usize>,

    /// Maximum distance for a passage to count as relevant (overrides DISTANCE_THRESHOLD).
    #[arg(long, global = true)]
    threshold: Option<f32>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Load, chunk and embed notes, skipping passages that are already indexed.
    Reindex {
        /// Drop the collection before indexing.
        #[arg(long, default_value_t = false)]
        reset: bool,
        /// Notes directory to index; repeat for several (overrides NOTES_DIRS).
        #[arg(long = "notes", value_name = "DIR")]
        notes: Vec<PathBuf>,
    },
    /// Ask a single question.
    Ask {
        /// The question; several words are joined with spaces.
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
        /// Print the retrieved passages after the answer.
        #[arg(long, default_value_t = false)]
        show_sources: bool,
        /// Wait for the full answer instead of streaming it.
        #[arg(long, default_value_t = false)]
        no_stream: bool,
    },
    /// Interactive question loop. Type 'exit' or 'quit' to leave.
    Chat {
        #[arg(long, default_value_t = false)]
        show_sources: bool,
        #[arg(long, default_value_t = false)]
        no_stream: bool,
    },
    /// Check that the vector store is reachable.
    Check,
}

impl Cli {
    fn apply_overrides(&self, config: &mut RagConfig) {
        if let Some(top_k) = self.top_k {
            config.top_k = top_k.max(1);
        }
        if let Some(threshold) = self.threshold {
            config.distance_threshold = threshold;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let mut config = RagConfig::from_env().context("Invalid notes/retrieval configuration")?;
    cli.apply_overrides(&mut config);
    config.validate().context("Invalid command-line overrides")?;
    let chroma_config = ChromaConfig::from_env().context("Invalid vector store configuration")?;
    let store: SharedVectorStore = Arc::new(ChromaClient::new(&chroma_config)?);

    let command = cli.command.unwrap_or(Commands::Chat {
        show_sources: false,
        no_stream: false,
    });

    match command {
        Commands::Check => run_check(&store, &chroma_config).await,
        Commands::Reindex { reset, notes } => {
            let roots = if notes.is_empty() {
                config.notes_dirs.clone()
            } else {
                notes
            };
            let embedder = build_embedder(&config)?;
            let indexer = Indexer::new(store, embedder, chroma_config.collection.clone());
            run_reindex(&indexer, &roots, &config, reset || config.reset_on_reindex).await
        }
        Commands::Ask {
            question,
            show_sources,
            no_stream,
        } => {
            let assistant = build_assistant(store, &config, &chroma_config)?;
            run_single(&assistant, &question.join(" "), show_sources, !no_stream).await
        }
        Commands::Chat {
            show_sources,
            no_stream,
        } => {
            let assistant = build_assistant(store, &config, &chroma_config)?;
            run_repl(&assistant, show_sources, !no_stream).await
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .try_init();
}

fn build_embedder(config: &RagConfig) -> anyhow::Result<SharedEmbeddings> {
    let client = OpenAiEmbeddingsClient::from_config(config)
        .context("Embedding client initialization failed")?;
    Ok(Arc::new(client))
}

fn build_assistant(
    store: SharedVectorStore,
    config: &RagConfig,
    chroma_config: &ChromaConfig,
) -> anyhow::Result<Assistant> {
    let llm = build_llm_client_from_env().context("LLM client initialization failed")?;
    let retriever = Retriever::new(
        store,
        build_embedder(config)?,
        chroma_config.collection.clone(),
    )
    .with_top_k(config.top_k)
    .with_threshold(config.distance_threshold)
    .with_fallback(config.fallback);

    Ok(Assistant::new(
        retriever,
        PromptBuilder::new(config.max_context_chars),
        llm,
        AnswerLog::new(config.answer_log.clone()),
    ))
}

async fn run_check(store: &SharedVectorStore, chroma_config: &ChromaConfig) -> anyhow::Result<()> {
    store.heartbeat().await?;
    println!(
        "Vector store reachable at {} (collection '{}').",
        chroma_config.base_url(),
        chroma_config.collection
    );
    Ok(())
}

async fn run_reindex(
    indexer: &Indexer,
    roots: &[PathBuf],
    config: &RagConfig,
    reset: bool,
) -> anyhow::Result<()> {
    let documents = load_notes(roots)?;
    let passages = chunk_documents(&documents, config.max_chunk_chars);
    println!(
        "Loaded {} notes into {} passages.",
        documents.len(),
        passages.len()
    );
    if documents.is_empty() {
        let listed: Vec<String> = roots.iter().map(|root| root.display().to_string()).collect();
        println!("No markdown notes found under {}.", listed.join(", "));
    }

    let report = indexer.reindex(&passages, reset).await?;
    println!("{report}");
    Ok(())
}

async fn run_single(
    assistant: &Assistant,
    question: &str,
    show_sources: bool,
    stream: bool,
) -> anyhow::Result<()> {
    if stream {
        println!();
    }
    let answer = assistant
        .ask(question, stream, |fragment| {
            print!("{fragment}");
            let _ = io::stdout().flush();
        })
        .await
        .map_err(|err| {
            error!(?err, "Question failed");
            err
        })?;

    if stream {
        println!("\n");
    } else {
        println!("\n{}\n", answer.text);
    }
    println!("({})", grounding_label(&answer));
    if show_sources {
        print_sources(&answer);
    }
    if !answer.logged {
        eprintln!("Warning: answer was not written to the answer log.");
    }
    Ok(())
}

fn grounding_label(answer: &Answer) -> &'static str {
    if answer.from_notes {
        "answered from your notes"
    } else {
        "no relevant notes found; answered from general knowledge"
    }
}

fn print_sources(answer: &Answer) {
    if answer.passages.is_empty() {
        println!("No sources.");
        return;
    }
    println!("\nSources:");
    for hit in &answer.passages {
        println!(
            "- {} [{}] distance={:.4}",
            hit.metadata.source, hit.metadata.chunk_id, hit.distance
        );
        println!("  {}", preview(&hit.text));
    }
}

fn preview(text: &str) -> String {
    let flattened = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flattened.char_indices().nth(SOURCE_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &flattened[..cut]),
        None => flattened,
    }
}

async fn run_repl(assistant: &Assistant, show_sources: bool, stream: bool) -> anyhow::Result<()> {
    println!("Vault Rummager ready. Type 'exit' or 'quit' to leave.\n");
    let stdin = io::stdin();

    loop {
        print!("You > ");
        io::stdout().flush()?;

        let mut buffer = String::new();
        if stdin.read_line(&mut buffer)? == 0 {
            break;
        }
        let trimmed = buffer.trim();

        if is_exit_command(trimmed) {
            info!("User exited chat");
            break;
        }

        if trimmed.is_empty() {
            continue;
        }

        if let Err(err) = run_single(assistant, trimmed, show_sources, stream).await {
            println!("Error: {err:#}\n");
        }
    }

    Ok(())
}

fn is_exit_command(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn no_subcommand_means_chat() {
        let cli = Cli::parse_from(["vault-rummager"]);
        assert!(cli.command.is_none());
        assert!(cli.top_k.is_none());
    }

    #[test]
    fn ask_joins_question_words_and_reads_flags() {
        let cli = Cli::parse_from([
            "vault-rummager",
            "ask",
            "What",
            "ingredients",
            "for",
            "pasta?",
            "--show-sources",
            "--no-stream",
        ]);
        assert_eq!(
            cli.command,
            Some(Commands::Ask {
                question: vec![
                    "What".to_string(),
                    "ingredients".to_string(),
                    "for".to_string(),
                    "pasta?".to_string()
                ],
                show_sources: true,
                no_stream: true,
            })
        );
    }

    #[test]
    fn ask_requires_a_question() {
        let err = Cli::command()
            .try_get_matches_from(["vault-rummager", "ask"])
            .expect_err("question is required");
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::MissingRequiredArgument
        );
    }

    #[test]
    fn reindex_accepts_repeated_notes_dirs() {
        let cli = Cli::parse_from([
            "vault-rummager",
            "reindex",
            "--reset",
            "--notes",
            "vault",
            "--notes",
            "journal",
        ]);
        assert_eq!(
            cli.command,
            Some(Commands::Reindex {
                reset: true,
                notes: vec![PathBuf::from("vault"), PathBuf::from("journal")],
            })
        );
    }

    #[test]
    fn global_overrides_apply_after_subcommand() {
        let cli = Cli::parse_from(["vault-rummager", "chat", "--top-k", "3", "--threshold", "0.9"]);
        let mut config = RagConfig {
            embedding_api_key: "ollama".to_string(),
            embedding_base_url: None,
            embedding_model: "all-minilm".to_string(),
            top_k: 10,
            distance_threshold: 0.6,
            fallback: rag::config::FallbackPolicy::Nearest,
            max_chunk_chars: 2000,
            max_context_chars: None,
            notes_dirs: vec![PathBuf::from("notes")],
            reset_on_reindex: false,
            answer_log: PathBuf::from("answers.log"),
        };
        cli.apply_overrides(&mut config);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.distance_threshold, 0.9);
    }

    #[test]
    fn cli_help_is_emitted_as_error_kind() {
        // Clap returns DisplayHelp as an error; asserting keeps this headless and fast.
        let err = Cli::command()
            .try_get_matches_from(["vault-rummager", "--help"])
            .expect_err("help should short-circuit");
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn exit_and_quit_end_the_chat() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("QUIT"));
        assert!(!is_exit_command("exit now"));
    }

    #[test]
    fn source_previews_are_flattened_and_capped() {
        let text = format!("Title\n\n{}", "word ".repeat(200));
        let shown = preview(&text);
        assert!(shown.starts_with("Title word"));
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), SOURCE_PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}
