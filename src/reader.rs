// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{engine::Shared, record::RecordReader, segment::OpenMode};

/// Resolves a key to its current value.
///
/// Keydirs are probed newest-to-oldest under a single read lock; the
/// actual record is then read from an independently opened read-only file
/// handle, outside the lock. A record that decodes to the empty string is
/// a tombstone: it masks any older version and reports "not found".
///
/// # Errors
///
/// Will return `Err` if an IO error occurs, including when a keydir names
/// a segment that has already been deleted.
pub(crate) fn get(shared: &Shared, key: &str) -> crate::Result<Option<String>> {
    for entry in shared.lookup(key) {
        let file = shared.store.open(entry.segment_id, OpenMode::ReadOnly)?;

        for record in RecordReader::new(file, entry.offset)? {
            let record = record?;

            if record.key == key {
                let value: String = serde_json::from_str(&record.value_json)?;

                return Ok(if value.is_empty() { None } else { Some(value) });
            }
        }

        // Scanned to end-of-file without finding the key; fall through to
        // an older keydir
        log::trace!(
            "key {key:?} not found in segment {} at offset {}",
            entry.segment_id,
            entry.offset
        );
    }

    Ok(None)
}
