// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    handle::IndexEntry,
    hint,
    id::{format_segment_id, SegmentId},
    keydir::Keydir,
    record::RecordReader,
    segment::{OpenMode, SegmentStore},
};

/// Rebuilds the keydir stack from disk, one keydir per segment, ordered by
/// ascending segment ID.
///
/// A segment with a complete hint file is loaded from the hint, then the
/// segment's tail is scanned from the end of the last hinted record so
/// that writes appended after the hint snapshot are not lost. Without a
/// hint (or with a leftover `.tmp` file), the whole segment is scanned.
///
/// # Errors
///
/// Will return `Err` if an IO error occurs; recovery is all-or-nothing.
pub(crate) fn rebuild(store: &SegmentStore, capacity: usize) -> crate::Result<Vec<Keydir>> {
    let ids = store.list()?;
    let cnt = ids.len();

    log::debug!("recovering {cnt} segments");

    let mut stack = Vec::with_capacity(cnt);

    for id in ids {
        let keydir = match hint::read(store, id, capacity)? {
            Some(mut keydir) => {
                let resume = match keydir.max_offset() {
                    Some(offset) => end_of_record_at(store, id, offset)?,
                    None => 0,
                };
                scan_segment(store, id, resume, &mut keydir)?;

                log::trace!(
                    "segment {}: {} keys via hint file",
                    format_segment_id(id),
                    keydir.len()
                );
                keydir
            }
            None => {
                let mut keydir = Keydir::with_capacity(id, capacity);
                scan_segment(store, id, 0, &mut keydir)?;

                log::trace!(
                    "segment {}: {} keys via full scan",
                    format_segment_id(id),
                    keydir.len()
                );
                keydir
            }
        };

        stack.push(keydir);
    }

    Ok(stack)
}

/// Returns the offset right after the record starting at `offset`, which
/// is where a tail scan has to resume.
fn end_of_record_at(store: &SegmentStore, id: SegmentId, offset: u64) -> crate::Result<u64> {
    let file = store.open(id, OpenMode::ReadOnly)?;
    let mut reader = RecordReader::new(file, offset)?;

    match reader.next() {
        Some(record) => {
            record?;
            Ok(reader.offset())
        }
        None => Ok(offset),
    }
}

fn scan_segment(
    store: &SegmentStore,
    id: SegmentId,
    from: u64,
    keydir: &mut Keydir,
) -> crate::Result<()> {
    let file = store.open(id, OpenMode::ReadOnly)?;

    for record in RecordReader::new(file, from)? {
        let record = record?;

        // Tombstones are indexed too; they mask older segments on lookup
        keydir.set(
            record.key,
            IndexEntry {
                segment_id: id,
                offset: record.offset,
            },
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record;
    use std::fs::OpenOptions;
    use test_log::test;

    fn store_in(dir: &std::path::Path) -> SegmentStore {
        let store = SegmentStore::new(dir);
        store.create_dirs().unwrap();
        store
    }

    fn append_all(
        store: &SegmentStore,
        id: SegmentId,
        items: &[(&str, &str)],
    ) -> crate::Result<Vec<u64>> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(store.segment_path(id))?;

        items
            .iter()
            .map(|(k, v)| record::append(&mut file, k, v))
            .collect()
    }

    #[test]
    fn rebuild_scans_segments_without_hints() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        append_all(&store, 1, &[("a", "1"), ("b", "2"), ("a", "3")])?;
        append_all(&store, 2, &[("c", "4")])?;

        let stack = rebuild(&store, 10)?;

        assert_eq!(2, stack.len());

        let first = stack.first().unwrap();
        assert_eq!(1, first.segment_id());
        assert_eq!(2, first.len());

        // in-segment overwrites keep only the latest offset
        let offsets = append_offsets(&store, 1)?;
        assert_eq!(Some(*offsets.get(2).unwrap()), first.get("a").map(|e| e.offset));

        Ok(())
    }

    fn append_offsets(store: &SegmentStore, id: SegmentId) -> crate::Result<Vec<u64>> {
        Ok(RecordReader::new(store.open(id, OpenMode::ReadOnly)?, 0)?
            .collect::<crate::Result<Vec<_>>>()?
            .into_iter()
            .map(|r| r.offset)
            .collect())
    }

    #[test]
    fn rebuild_overlays_records_written_after_the_hint() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        append_all(&store, 1, &[("a", "1"), ("b", "2")])?;

        // hint file snapshot taken now...
        let hinted = rebuild(&store, 10)?.pop().unwrap();
        hint::write(&store, &hinted)?;

        // ...and the segment keeps growing afterwards
        append_all(&store, 1, &[("a", "9"), ("c", "3")])?;

        let stack = rebuild(&store, 10)?;
        let keydir = stack.first().unwrap();

        assert_eq!(3, keydir.len());

        let offsets = append_offsets(&store, 1)?;
        assert_eq!(Some(*offsets.get(2).unwrap()), keydir.get("a").map(|e| e.offset));
        assert_eq!(Some(*offsets.get(3).unwrap()), keydir.get("c").map(|e| e.offset));

        Ok(())
    }

    #[test]
    fn lone_tmp_hint_falls_back_to_scanning() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        append_all(&store, 1, &[("a", "1"), ("b", "2")])?;
        std::fs::write(store.hint_tmp_path(1), "")?;

        let stack = rebuild(&store, 10)?;

        assert_eq!(2, stack.first().unwrap().len());

        Ok(())
    }
}
