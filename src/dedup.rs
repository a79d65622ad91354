//! Exact-content deduplication.
//!
//! Hashes cover the raw downloaded bytes, so the same image reached through
//! different providers or URLs maps to the same key. The index is rebuilt
//! from stored images at run start and appended to as candidates are
//! accepted.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use imagefetch_common::ItemId;
use sha2::{Digest, Sha256};

/// Hex SHA-256 of the full byte stream.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Default)]
pub struct DedupIndex {
    owners: DashMap<String, ItemId>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the index with `(hash, owner)` pairs, e.g. from stored images.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, ItemId)>,
    {
        let index = Self::new();
        for (hash, item_id) in entries {
            index.owners.entry(hash).or_insert(item_id);
        }
        index
    }

    pub fn is_duplicate(&self, hash: &str) -> bool {
        self.owners.contains_key(hash)
    }

    /// Owner of a hash, if any.
    pub fn owner(&self, hash: &str) -> Option<ItemId> {
        self.owners.get(hash).map(|e| *e.value())
    }

    /// Record `item_id` as the owner of `hash`. The first owner wins.
    pub fn record(&self, hash: &str, item_id: ItemId) {
        self.owners.entry(hash.to_string()).or_insert(item_id);
    }

    /// Check and record in one step. Returns `false` if another item already
    /// owns the hash, so two workers can never both accept the same image.
    pub fn try_claim(&self, hash: &str, item_id: ItemId) -> bool {
        match self.owners.entry(hash.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(v) => {
                v.insert(item_id);
                true
            }
        }
    }

    /// Give up a claim whose image could not be stored.
    pub fn release(&self, hash: &str, item_id: ItemId) {
        self.owners.remove_if(hash, |_, owner| *owner == item_id);
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_hash_is_content_only() {
        assert_eq!(content_hash(b"abc"), content_hash(b"abc"));
        assert_ne!(content_hash(b"abc"), content_hash(b"abd"));
        assert_eq!(
            content_hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_record_and_lookup() {
        let index = DedupIndex::new();
        let item = ItemId::new();
        assert!(!index.is_duplicate("h1"));
        index.record("h1", item);
        assert!(index.is_duplicate("h1"));
        assert_eq!(index.owner("h1"), Some(item));

        index.record("h1", ItemId::new());
        assert_eq!(index.owner("h1"), Some(item));
    }

    #[test]
    fn test_seeded_from_entries() {
        let a = ItemId::new();
        let index = DedupIndex::from_entries(vec![("h1".to_string(), a), ("h2".to_string(), a)]);
        assert_eq!(index.len(), 2);
        assert!(index.is_duplicate("h2"));
    }

    #[test]
    fn test_release_only_by_owner() {
        let index = DedupIndex::new();
        let a = ItemId::new();
        assert!(index.try_claim("h", a));
        index.release("h", ItemId::new());
        assert!(index.is_duplicate("h"));
        index.release("h", a);
        assert!(!index.is_duplicate("h"));
    }

    #[test]
    fn test_concurrent_claims_single_winner() {
        let index = Arc::new(DedupIndex::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let index = Arc::clone(&index);
                std::thread::spawn(move || index.try_claim("same", ItemId::new()))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
