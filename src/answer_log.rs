use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Local};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const SEPARATOR_WIDTH: usize = 80;

/// Append-only, human-readable record of every question and answer.
#[derive(Debug, Clone)]
pub struct AnswerLog {
    path: PathBuf,
}

impl AnswerLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, question: &str, answer: &str) -> anyhow::Result<()> {
        self.append_at(Local::now(), question, answer).await
    }

    async fn append_at(
        &self,
        timestamp: DateTime<Local>,
        question: &str,
        answer: &str,
    ) -> anyhow::Result<()> {
        let record = format_record(timestamp, question, answer);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open answer log {}", self.path.display()))?;
        file.write_all(record.as_bytes())
            .await
            .with_context(|| format!("Failed to write answer log {}", self.path.display()))?;
        file.flush().await?;

        debug!(path = %self.path.display(), "Appended answer log record");
        Ok(())
    }
}

fn format_record(timestamp: DateTime<Local>, question: &str, answer: &str) -> String {
    format!(
        "[{}]\n\nQ: {}\n\nA:\n{}\n\n{}\n",
        timestamp.format("%Y-%m-%dT%H:%M:%S%.6f"),
        question.trim(),
        answer.trim(),
        "=".repeat(SEPARATOR_WIDTH)
    )
}
