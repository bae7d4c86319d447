// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    handle::IndexEntry,
    id::SegmentId,
    keydir::Keydir,
    segment::SegmentStore,
};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::{
    fs::File,
    io::{BufReader, Read, Write},
};

// Hint files persist one keydir as a little-endian stream of
// `{i32 key_len, key_bytes, i32 segment_id, i64 offset}` entries. The
// segment ID inside each entry is redundant (it always matches the file's
// own ID) but makes the files self-describing.

/// Writes the keydir to its hint file.
///
/// The data goes into `<id>.data.hint.tmp` first and is renamed over the
/// final file only after an fsync, so a crash can never leave a torn final
/// file behind.
///
/// # Errors
///
/// Will return `Err` if an IO error occurs.
pub(crate) fn write(store: &SegmentStore, keydir: &Keydir) -> crate::Result<()> {
    let id = keydir.segment_id();
    let tmp_path = store.hint_tmp_path(id);

    let mut file = File::create(&tmp_path)?;

    for (key, entry) in keydir.iter() {
        // NOTE: Truncation is okay, keys are far below 2 GiB
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
        file.write_i32::<LittleEndian>(key.len() as i32)?;
        file.write_all(key.as_bytes())?;

        #[allow(clippy::cast_possible_wrap)]
        file.write_i32::<LittleEndian>(entry.segment_id as i32)?;

        #[allow(clippy::cast_possible_wrap)]
        file.write_i64::<LittleEndian>(entry.offset as i64)?;
    }

    file.sync_all()?;
    drop(file);

    let path = store.hint_path(id);

    if path.try_exists()? {
        std::fs::remove_file(&path)?;
    }
    std::fs::rename(&tmp_path, &path)?;

    Ok(())
}

/// Reads the hint file for a segment, if a complete one exists.
///
/// Returns `None` if there is no hint file, or if a leftover `.tmp` file
/// indicates the last write never completed.
///
/// # Errors
///
/// Will return `Err` if an IO error occurs or the file is malformed.
pub(crate) fn read(
    store: &SegmentStore,
    id: SegmentId,
    capacity: usize,
) -> crate::Result<Option<Keydir>> {
    let tmp_path = store.hint_tmp_path(id);

    if tmp_path.try_exists()? {
        log::warn!(
            "{} exists, hint file write may be incomplete",
            tmp_path.display()
        );
        return Ok(None);
    }

    let file = match File::open(store.hint_path(id)) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut reader = BufReader::new(file);
    let mut keydir = Keydir::with_capacity(id, capacity);

    loop {
        let key_len = match reader.read_i32::<LittleEndian>() {
            Ok(len) => len,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };

        let key_len = usize::try_from(key_len)
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "bad key length"))?;

        let mut key = vec![0u8; key_len];
        reader.read_exact(&mut key)?;
        let key = String::from_utf8(key).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "key is not valid utf-8")
        })?;

        let segment_id = reader.read_i32::<LittleEndian>()?;
        let offset = reader.read_i64::<LittleEndian>()?;

        #[allow(clippy::cast_sign_loss)]
        keydir.set(
            key,
            IndexEntry {
                segment_id: segment_id as SegmentId,
                offset: offset as u64,
            },
        );
    }

    Ok(Some(keydir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn store_in(dir: &std::path::Path) -> SegmentStore {
        let store = SegmentStore::new(dir);
        store.create_dirs().unwrap();
        store
    }

    #[test]
    fn hint_round_trip() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        let mut keydir = Keydir::with_capacity(7, 10);
        for (i, key) in ["a", "b", "longer-key"].iter().enumerate() {
            keydir.set(
                (*key).to_owned(),
                IndexEntry {
                    segment_id: 7,
                    offset: i as u64 * 100,
                },
            );
        }

        write(&store, &keydir)?;
        let loaded = read(&store, 7, 10)?.unwrap();

        assert_eq!(keydir.len(), loaded.len());
        for (key, entry) in keydir.iter() {
            assert_eq!(Some(entry), loaded.get(key));
        }
        assert!(!store.hint_tmp_path(7).exists());

        Ok(())
    }

    #[test]
    fn missing_hint_reads_as_absent() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        assert!(read(&store, 1, 10)?.is_none());

        Ok(())
    }

    #[test]
    fn leftover_tmp_file_refuses_the_hint() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        let mut keydir = Keydir::with_capacity(2, 10);
        keydir.set(
            "a".to_owned(),
            IndexEntry {
                segment_id: 2,
                offset: 0,
            },
        );
        write(&store, &keydir)?;

        // a lone tmp file marks the hint as incomplete
        std::fs::write(store.hint_tmp_path(2), "")?;

        assert!(read(&store, 2, 10)?.is_none());

        Ok(())
    }

    #[test]
    fn rewrite_replaces_existing_hint() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        let mut keydir = Keydir::with_capacity(3, 10);
        keydir.set(
            "a".to_owned(),
            IndexEntry {
                segment_id: 3,
                offset: 0,
            },
        );
        write(&store, &keydir)?;

        keydir.set(
            "a".to_owned(),
            IndexEntry {
                segment_id: 3,
                offset: 55,
            },
        );
        keydir.set(
            "b".to_owned(),
            IndexEntry {
                segment_id: 3,
                offset: 70,
            },
        );
        write(&store, &keydir)?;

        let loaded = read(&store, 3, 10)?.unwrap();
        assert_eq!(2, loaded.len());
        assert_eq!(Some(55), loaded.get("a").map(|e| e.offset));

        Ok(())
    }
}
