use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use super::clean::{clean_markdown, split_front_matter};
use super::Document;

/// Load every markdown note below the given roots.
///
/// Files reached through more than one root (or through a symlink) are
/// loaded once, keyed by their canonical path. Missing roots are reported
/// and skipped rather than failing the whole run.
#[instrument(level = "debug", skip_all, fields(roots = roots.len()))]
pub fn load_notes(roots: &[PathBuf]) -> anyhow::Result<Vec<Document>> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut documents = Vec::new();

    for root in roots {
        if !root.is_dir() {
            warn!(root = %root.display(), "Notes root is not a directory; skipping");
            continue;
        }

        for entry in WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(?err, "Failed to walk notes directory entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() || !is_markdown(entry.path()) {
                continue;
            }

            let resolved = fs::canonicalize(entry.path())
                .with_context(|| format!("Failed to resolve {}", entry.path().display()))?;
            if !seen.insert(resolved.clone()) {
                warn!(path = %resolved.display(), "Duplicate note path; skipping");
                continue;
            }

            match load_note(&resolved) {
                Ok(document) => documents.push(document),
                Err(err) => warn!(?err, path = %resolved.display(), "Skipping unreadable note"),
            }
        }
    }

    info!(documents = documents.len(), "Loaded notes");
    Ok(documents)
}

/// Read and clean a single note.
pub fn load_note(path: &Path) -> anyhow::Result<Document> {
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read note {}", path.display()))?;
    let raw = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %path.display(), "Note is not valid UTF-8; decoding lossily");
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    };
    let (front_matter, body) = split_front_matter(&raw);

    let title = front_matter.title.unwrap_or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let content = clean_markdown(body);
    debug!(path = %path.display(), chars = content.len(), "Parsed note");

    Ok(Document {
        path: path.to_path_buf(),
        title,
        tags: front_matter.tags,
        content,
    })
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"))
}
