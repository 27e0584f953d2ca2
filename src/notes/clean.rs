use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

static WIKI_EMBED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[\[.*?\]\]").expect("valid wiki embed regex"));
static IMAGE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*?\]\([^)]*?\)").expect("valid image link regex"));
static WIKI_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\]|]+)(?:\|([^\]]+))?\]\]").expect("valid wiki link regex")
});
static MARKDOWN_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid markdown link regex"));
static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]+>").expect("valid html tag regex"));
static BLANK_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*(?:\n[ \t]*)+").expect("valid blank line regex"));

/// Declared note metadata, read from a leading YAML front matter block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontMatter {
    pub title: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFrontMatter {
    #[serde(default)]
    title: Option<serde_yaml::Value>,
    #[serde(default)]
    tags: Option<RawTags>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTags {
    List(Vec<serde_yaml::Value>),
    Text(String),
}

/// Split a note into its front matter and body.
///
/// A leading byte-order mark is dropped. Notes without a front matter block
/// return default metadata and the rest of the content untouched. A block that is not valid YAML is dropped from the
/// body and reported, and the note keeps default metadata.
pub fn split_front_matter(content: &str) -> (FrontMatter, &str) {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let Some((yaml, body)) = front_matter_block(content) else {
        return (FrontMatter::default(), content);
    };

    match serde_yaml::from_str::<Option<RawFrontMatter>>(yaml) {
        Ok(raw) => (raw.map(FrontMatter::from).unwrap_or_default(), body),
        Err(err) => {
            warn!(?err, "Ignoring malformed front matter");
            (FrontMatter::default(), body)
        }
    }
}

fn front_matter_block(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return Some((yaml, body));
        }
        offset += line.len();
    }
    None
}

impl From<RawFrontMatter> for FrontMatter {
    fn from(raw: RawFrontMatter) -> Self {
        let title = raw
            .title
            .and_then(|value| yaml_scalar(&value))
            .map(|title| title.trim().to_string())
            .filter(|title| !title.is_empty());

        let candidates: Vec<String> = match raw.tags {
            Some(RawTags::List(values)) => values.iter().filter_map(yaml_scalar).collect(),
            Some(RawTags::Text(text)) => text
                .split(|c: char| c == ',' || c.is_whitespace())
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };

        let mut tags: Vec<String> = Vec::with_capacity(candidates.len());
        for tag in candidates {
            let tag = tag.trim().trim_start_matches('#').to_string();
            if !tag.is_empty() && !tags.contains(&tag) {
                tags.push(tag);
            }
        }

        Self { title, tags }
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(text) => Some(text.clone()),
        serde_yaml::Value::Number(number) => Some(number.to_string()),
        serde_yaml::Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Strip markup that carries no meaning for retrieval.
///
/// Image embeds disappear, wiki links become their alias or target, inline
/// links become `text (destination)`, HTML tags are removed and runs of
/// blank lines collapse to a single blank line.
pub fn clean_markdown(body: &str) -> String {
    let text = body.replace("\r\n", "\n");
    let text = WIKI_EMBED.replace_all(&text, "");
    let text = IMAGE_LINK.replace_all(&text, "");
    let text = WIKI_LINK.replace_all(&text, |caps: &regex::Captures| {
        caps.get(2)
            .or_else(|| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    });
    let text = MARKDOWN_LINK.replace_all(&text, "$1 ($2)");
    let text = HTML_TAG.replace_all(&text, "");
    let text = BLANK_RUN.replace_all(&text, "\n\n");
    text.trim().to_string()
}
