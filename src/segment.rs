// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::id::{format_segment_id, SegmentId};
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
};

pub(crate) const SEGMENT_FILE_SUFFIX: &str = ".data.txt";
const HINT_FILE_SUFFIX: &str = ".data.hint";
const HINT_TMP_SUFFIX: &str = ".data.hint.tmp";

const SEGMENTS_FOLDER: &str = "segments";
const HINT_FILES_FOLDER: &str = "hint-files";

/// How a segment file is opened
#[derive(Clone, Copy, Debug)]
pub(crate) enum OpenMode {
    /// Create-if-absent, append-only; used by the writer for the active
    /// segment. Durability comes from an explicit fsync after each append.
    Append,

    /// Read-only; used by readers and recovery
    ReadOnly,

    /// Read/write; used by the compactor while migrating a closed segment
    ReadWrite,
}

/// Names, creates, opens, lists and removes the on-disk segment files and
/// their hint files.
#[derive(Debug)]
pub(crate) struct SegmentStore {
    segments_dir: PathBuf,
    hints_dir: PathBuf,
}

impl SegmentStore {
    pub fn new(base: &Path) -> Self {
        Self {
            segments_dir: base.join(SEGMENTS_FOLDER),
            hints_dir: base.join(HINT_FILES_FOLDER),
        }
    }

    /// Creates the segment and hint folders; called once at startup.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs; this is fatal for the
    /// engine.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.segments_dir)?;
        std::fs::create_dir_all(&self.hints_dir)?;
        Ok(())
    }

    pub fn segment_path(&self, id: SegmentId) -> PathBuf {
        self.segments_dir
            .join(format!("{}{SEGMENT_FILE_SUFFIX}", format_segment_id(id)))
    }

    pub fn hint_path(&self, id: SegmentId) -> PathBuf {
        self.hints_dir
            .join(format!("{}{HINT_FILE_SUFFIX}", format_segment_id(id)))
    }

    pub fn hint_tmp_path(&self, id: SegmentId) -> PathBuf {
        self.hints_dir
            .join(format!("{}{HINT_TMP_SUFFIX}", format_segment_id(id)))
    }

    /// Lists the segments currently on disk, ordered by ascending ID.
    ///
    /// Folders and files that do not follow the segment naming scheme are
    /// ignored.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn list(&self) -> crate::Result<Vec<SegmentId>> {
        let mut ids = Vec::new();

        for dirent in std::fs::read_dir(&self.segments_dir)? {
            let dirent = dirent?;

            if !dirent.file_type()?.is_file() {
                continue;
            }

            let name = dirent.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };

            match parse_segment_file_name(name) {
                Some(id) => ids.push(id),
                None => log::trace!("ignoring non-segment file {name:?}"),
            }
        }

        ids.sort_unstable();

        Ok(ids)
    }

    /// Opens the segment file with the given ID.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn open(&self, id: SegmentId, mode: OpenMode) -> std::io::Result<File> {
        let path = self.segment_path(id);

        match mode {
            OpenMode::Append => OpenOptions::new().create(true).append(true).open(path),
            OpenMode::ReadOnly => File::open(path),
            OpenMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path),
        }
    }

    /// Determines the ID of the active segment.
    ///
    /// If no segments exist, the active ID is `1`. Otherwise it is the
    /// highest on-disk ID, incremented iff that segment has already
    /// reached the rotation threshold.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn active_id(&self, max_segment_bytes: u64) -> crate::Result<SegmentId> {
        let ids = self.list()?;

        let Some(&last) = ids.last() else {
            return Ok(1);
        };

        let len = std::fs::metadata(self.segment_path(last))?.len();

        Ok(if len >= max_segment_bytes { last + 1 } else { last })
    }

    /// Deletes a segment file and its hint file.
    ///
    /// Files that are already gone are logged and tolerated.
    ///
    /// # Errors
    ///
    /// Will return `Err` on IO errors other than the files being absent.
    pub fn remove(&self, id: SegmentId) -> crate::Result<()> {
        for path in [self.segment_path(id), self.hint_path(id)] {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() == std::io::ErrorKind::NotFound {
                    log::debug!("{} was already gone", path.display());
                } else {
                    return Err(e.into());
                }
            }
        }

        Ok(())
    }
}

fn parse_segment_file_name(name: &str) -> Option<SegmentId> {
    let stem = name.strip_suffix(SEGMENT_FILE_SUFFIX)?;
    stem.parse::<SegmentId>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn store_in(dir: &Path) -> SegmentStore {
        let store = SegmentStore::new(dir);
        store.create_dirs().unwrap();
        store
    }

    #[test]
    fn list_is_sorted_and_ignores_junk() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        for name in ["10.data.txt", "02.data.txt", "01.data.txt", "notes.txt"] {
            std::fs::write(dir.path().join(SEGMENTS_FOLDER).join(name), "")?;
        }
        std::fs::create_dir(dir.path().join(SEGMENTS_FOLDER).join("03.data.txt.d"))?;

        assert_eq!(vec![1, 2, 10], store.list()?);

        Ok(())
    }

    #[test]
    fn active_id_starts_at_one() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        assert_eq!(1, store.active_id(100)?);

        Ok(())
    }

    #[test]
    fn active_id_increments_once_threshold_is_reached() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        std::fs::write(store.segment_path(3), vec![0u8; 9])?;

        assert_eq!(3, store.active_id(10)?);

        // rotation fires exactly when the size first reaches the threshold
        std::fs::write(store.segment_path(3), vec![0u8; 10])?;

        assert_eq!(4, store.active_id(10)?);

        Ok(())
    }

    #[test]
    fn remove_tolerates_missing_hint() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = store_in(dir.path());

        std::fs::write(store.segment_path(1), "a,\"1\"\n")?;
        store.remove(1)?;

        assert!(!store.segment_path(1).exists());

        // removing again is fine as well
        store.remove(1)?;

        Ok(())
    }
}
