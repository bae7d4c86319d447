// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{path::PathBuf, time::Duration};

/// Engine configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// Base folder; segments live in `<base>/segments`, hint files in
    /// `<base>/hint-files`
    pub(crate) base_dir: PathBuf,

    /// Path of the zero-byte marker file that triggers compaction
    pub(crate) manifest_path: PathBuf,

    /// Rotation threshold for the active segment
    pub(crate) max_segment_bytes: u64,

    /// Initial capacity of each keydir
    pub(crate) keydir_capacity: usize,

    /// Backpressure limit on pending writes
    pub(crate) write_queue_capacity: usize,

    /// Backpressure limit on pending segment deletions
    pub(crate) deletion_queue_capacity: usize,

    /// Writes required between hint-file refreshes
    pub(crate) keydir_persist_threshold: u64,

    /// Polling period of the compactor
    pub(crate) compaction_interval: Duration,

    /// Polling period of the hint persister
    pub(crate) persist_interval: Duration,
}

impl Config {
    /// Creates a new configuration for the given base folder.
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
            manifest_path: PathBuf::from("manifest.txt"),
            max_segment_bytes: 4 * 1_024 * 1_024,
            keydir_capacity: 50,
            write_queue_capacity: 150,
            deletion_queue_capacity: 50,
            keydir_persist_threshold: 100,
            compaction_interval: Duration::from_secs(5),
            persist_interval: Duration::from_secs(5),
        }
    }

    /// Sets the path of the compaction marker file.
    ///
    /// Default = `manifest.txt` in the working directory
    #[must_use]
    pub fn manifest_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.manifest_path = path.into();
        self
    }

    /// Sets the size threshold at which the active segment is rotated.
    ///
    /// This heavily influences space amplification, as
    /// space reclamation works on a per-segment basis.
    ///
    /// Default = 4 MiB
    #[must_use]
    pub fn max_segment_bytes(mut self, bytes: u64) -> Self {
        self.max_segment_bytes = bytes;
        self
    }

    /// Sets the initial bucket capacity of each keydir.
    ///
    /// Default = 50
    #[must_use]
    pub fn keydir_capacity(mut self, capacity: usize) -> Self {
        self.keydir_capacity = capacity;
        self
    }

    /// Sets how many writes may be outstanding before producers block.
    ///
    /// Default = 150
    #[must_use]
    pub fn write_queue_capacity(mut self, capacity: usize) -> Self {
        self.write_queue_capacity = capacity;
        self
    }

    /// Sets how many segment deletions may be outstanding before the
    /// compactor blocks.
    ///
    /// Default = 50
    #[must_use]
    pub fn deletion_queue_capacity(mut self, capacity: usize) -> Self {
        self.deletion_queue_capacity = capacity;
        self
    }

    /// Sets how many writes need to accumulate before the persister
    /// refreshes the active keydir's hint file.
    ///
    /// Default = 100
    #[must_use]
    pub fn keydir_persist_threshold(mut self, writes: u64) -> Self {
        self.keydir_persist_threshold = writes;
        self
    }

    /// Sets the polling period of the compactor.
    ///
    /// Default = 5 s
    #[must_use]
    pub fn compaction_interval(mut self, interval: Duration) -> Self {
        self.compaction_interval = interval;
        self
    }

    /// Sets the polling period of the hint persister.
    ///
    /// Default = 5 s
    #[must_use]
    pub fn persist_interval(mut self, interval: Duration) -> Self {
        self.persist_interval = interval;
        self
    }
}
