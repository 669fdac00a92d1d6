//! Phrase normalization and cache keys.
//!
//! Pure functions, no I/O. Two phrases that differ only in case or
//! whitespace normalize to the same string and therefore share a key.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Number of hash bytes kept in a key (16 hex chars).
const KEY_BYTES: usize = 8;

/// Lower-case, trim and collapse internal whitespace runs to one space.
pub fn normalize(text: &str) -> String {
    RE_WHITESPACE
        .replace_all(text.trim(), " ")
        .to_lowercase()
}

/// Whether `text` is worth sending to a synthesis backend.
///
/// Empty strings and strings with nothing alphanumeric ("...", "?!") are not.
pub fn is_speakable(text: &str) -> bool {
    let trimmed = text.trim();
    !trimmed.is_empty() && trimmed.chars().any(|c| c.is_alphanumeric())
}

/// Fixed-length content key for a phrase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hex length of every key.
    pub const LEN: usize = KEY_BYTES * 2;

    /// Validate a key read back from storage (e.g. a file stem).
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == Self::LEN
            && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        valid.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key for `text`: truncated SHA-256 of its normalized form.
pub fn key_for(text: &str) -> CacheKey {
    let digest = Sha256::digest(normalize(text).as_bytes());
    CacheKey(hex::encode(&digest[..KEY_BYTES]))
}
