use std::sync::LazyLock;

use regex::Regex;

use super::identity::content_id;
use super::{Document, Passage};

static PARAGRAPH_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("valid paragraph regex"));

const ABBREVIATIONS: &[&str] = &[
    "e.g.", "i.e.", "etc.", "vs.", "cf.", "approx.", "mr.", "mrs.", "ms.", "dr.", "prof.", "st.",
    "jr.", "sr.", "fig.", "pp.",
];

const CLOSERS: &[char] = &['"', '\'', ')', ']', '\u{201d}', '\u{2019}'];

/// Split text into sentences.
///
/// A sentence ends at `.`, `!` or `?` (plus any closing quotes or brackets)
/// followed by whitespace, or at a paragraph break. Known abbreviations and
/// single-letter initials do not end a sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    for paragraph in PARAGRAPH_BREAK.split(text) {
        split_paragraph(paragraph, &mut sentences);
    }
    sentences
}

fn split_paragraph(paragraph: &str, out: &mut Vec<String>) {
    let chars: Vec<(usize, char)> = paragraph.char_indices().collect();
    let mut start = 0;
    let mut i = 0;

    while i < chars.len() {
        let (_, c) = chars[i];
        if !matches!(c, '.' | '!' | '?') {
            i += 1;
            continue;
        }

        let mut end = i + 1;
        while end < chars.len()
            && (matches!(chars[end].1, '.' | '!' | '?') || CLOSERS.contains(&chars[end].1))
        {
            end += 1;
        }

        let at_boundary = end == chars.len() || chars[end].1.is_whitespace();
        let byte_end = chars.get(end).map_or(paragraph.len(), |(pos, _)| *pos);

        let abbreviated = c == '.'
            && ends_with_abbreviation(&paragraph[start..byte_end], &paragraph[byte_end..]);
        if at_boundary && !abbreviated {
            push_sentence(&paragraph[start..byte_end], out);
            start = byte_end;
        }
        i = end;
    }

    push_sentence(&paragraph[start..], out);
}

fn ends_with_abbreviation(candidate: &str, rest: &str) -> bool {
    let Some(last_word) = candidate.split_whitespace().last() else {
        return false;
    };
    let word = last_word.trim_start_matches(|c: char| CLOSERS.contains(&c) || c == '(');

    if ABBREVIATIONS.contains(&word.to_lowercase().as_str()) {
        return true;
    }

    // Initials such as "J." in "J. R. R. Tolkien": a capital other than the
    // pronoun "I", followed by another capitalised word.
    let mut letters = word.chars();
    let is_initial = matches!(
        (letters.next(), letters.next(), letters.next()),
        (Some(first), Some('.'), None) if first.is_uppercase() && first != 'I'
    );
    is_initial
        && rest
            .trim_start()
            .chars()
            .next()
            .is_some_and(char::is_uppercase)
}

fn push_sentence(raw: &str, out: &mut Vec<String>) {
    let sentence = raw.trim();
    if !sentence.is_empty() {
        out.push(sentence.to_string());
    }
}

/// Pack sentences into passages of at most `max_chars` characters.
///
/// Each passage is the title, a blank line, then whole sentences joined by
/// single spaces. A sentence that alone exceeds the budget becomes its own
/// passage rather than being cut.
pub fn chunk_text(text: &str, title: &str, max_chars: usize) -> Vec<String> {
    let prefix_chars = if title.trim().is_empty() {
        0
    } else {
        title.chars().count() + 2
    };
    let budget = max_chars.saturating_sub(prefix_chars);

    let mut passages = Vec::new();
    let mut buffer = String::new();
    let mut buffer_chars = 0;

    for sentence in split_sentences(text) {
        let sentence_chars = sentence.chars().count();

        if buffer.is_empty() {
            buffer = sentence;
            buffer_chars = sentence_chars;
            continue;
        }

        if buffer_chars + 1 + sentence_chars > budget {
            passages.push(with_title(title, &buffer));
            buffer = sentence;
            buffer_chars = sentence_chars;
        } else {
            buffer.push(' ');
            buffer.push_str(&sentence);
            buffer_chars += 1 + sentence_chars;
        }
    }

    if !buffer.is_empty() {
        passages.push(with_title(title, &buffer));
    }

    passages
}

fn with_title(title: &str, body: &str) -> String {
    if title.trim().is_empty() {
        body.to_string()
    } else {
        format!("{title}\n\n{body}")
    }
}

/// Chunk a loaded note into content-addressed passages.
pub fn chunk_document(document: &Document, max_chars: usize) -> Vec<Passage> {
    let stem = document
        .path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| document.title.clone());

    chunk_text(&document.content, &document.title, max_chars)
        .into_iter()
        .enumerate()
        .map(|(sequence_index, text)| Passage {
            content_id: content_id(&document.path, &text),
            chunk_id: format!("{stem}_{sequence_index}"),
            title: document.title.clone(),
            tags: document.tags.clone(),
            source: document.path.clone(),
            sequence_index,
            text,
        })
        .collect()
}

/// Chunk every document, preserving document order.
pub fn chunk_documents(documents: &[Document], max_chars: usize) -> Vec<Passage> {
    documents
        .iter()
        .flat_map(|document| chunk_document(document, max_chars))
        .collect()
}
