use std::path::Path;

/// Deterministic id for a passage: BLAKE3 over the source path and the
/// assembled passage text, separated by a NUL byte, as lowercase hex.
pub fn content_id(source: &Path, text: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(source.to_string_lossy().as_bytes());
    hasher.update(&[0]);
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}
