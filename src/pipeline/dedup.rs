//! Run-local duplicate suppression by URL and by content hash.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

/// What a duplicate check is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    /// Raw candidate URL, checked before download.
    Url(String),
    /// Hex SHA-256 of the downloaded bytes, checked after download.
    Hash(String),
}

impl DedupKey {
    pub fn url(url: &str) -> Self {
        Self::Url(url.trim().to_string())
    }

    pub fn hash(hash: &str) -> Self {
        Self::Hash(hash.to_string())
    }
}

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<DedupKey>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self, key: &DedupKey) -> bool {
        self.seen.contains(key)
    }

    /// Check-and-set: records `key` and returns `true` only if it was new.
    pub fn mark(&mut self, key: DedupKey) -> bool {
        self.seen.insert(key)
    }

    /// Drop `key` so it can be processed again. Returns whether it was held.
    pub fn forget(&mut self, key: &DedupKey) -> bool {
        self.seen.remove(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_is_check_and_set() {
        let mut dedup = Deduplicator::new();
        let key = DedupKey::url("https://example.com/a.png");

        assert!(!dedup.seen(&key));
        assert!(dedup.mark(key.clone()));
        assert!(dedup.seen(&key));
        assert!(!dedup.mark(key));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn test_forget_allows_key_again() {
        let mut dedup = Deduplicator::new();
        let key = DedupKey::url("https://example.com/retry.png");

        assert!(dedup.mark(key.clone()));
        assert!(dedup.forget(&key));
        assert!(!dedup.forget(&key));
        assert!(dedup.mark(key));
    }

    #[test]
    fn test_url_and_hash_keys_are_distinct() {
        let mut dedup = Deduplicator::new();
        assert!(dedup.mark(DedupKey::url("abc")));
        assert!(dedup.mark(DedupKey::hash("abc")));
    }

    #[test]
    fn test_content_hash() {
        assert_eq!(
            content_hash(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(content_hash(b"a"), content_hash(b"a"));
        assert_ne!(content_hash(b"a"), content_hash(b"b"));
    }
}
