// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{handle::IndexEntry, id::SegmentId, HashMap};

/// In-memory index of a single segment, mapping keys to the on-disk
/// position of their latest record within that segment.
///
/// Only the keydir of the active segment is ever mutated (by the writer);
/// keydirs of closed segments are read-only until the compactor retires
/// them together with their segment.
#[derive(Clone, Debug)]
pub(crate) struct Keydir {
    segment_id: SegmentId,
    map: HashMap<String, IndexEntry>,
}

impl Keydir {
    pub fn with_capacity(segment_id: SegmentId, capacity: usize) -> Self {
        Self {
            segment_id,
            map: HashMap::with_capacity_and_hasher(
                capacity,
                xxhash_rust::xxh3::Xxh3Builder::new(),
            ),
        }
    }

    pub fn segment_id(&self) -> SegmentId {
        self.segment_id
    }

    /// Inserts an entry, replacing any previous entry for the key.
    ///
    /// The replaced record's bytes stay on disk but become unreachable
    /// through the index.
    pub fn set(&mut self, key: String, entry: IndexEntry) {
        self.map.insert(key, entry);
    }

    pub fn get(&self, key: &str) -> Option<IndexEntry> {
        self.map.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Snapshot of the current keys; iteration order is unspecified.
    pub fn keys(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, IndexEntry)> {
        self.map.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Highest record offset any entry points at, if the keydir is
    /// non-empty.
    pub fn max_offset(&self) -> Option<u64> {
        self.map.values().map(|e| e.offset).max()
    }
}
