// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

#![allow(dead_code)]

use cask_log::Config;
use std::{path::Path, time::Duration};

/// Config for tests: everything scoped inside the given scratch folder,
/// background tasks effectively disabled unless a test opts back in.
pub fn test_config(base: &Path) -> Config {
    Config::new(base)
        .manifest_path(base.join("manifest.txt"))
        .compaction_interval(Duration::from_secs(3_600))
        .persist_interval(Duration::from_secs(3_600))
}

/// Number of segment files currently on disk.
pub fn segment_file_count(base: &Path) -> usize {
    match std::fs::read_dir(base.join("segments")) {
        Ok(read_dir) => read_dir
            .filter_map(std::result::Result::ok)
            .filter(|dirent| {
                dirent
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(".data.txt"))
            })
            .count(),
        Err(_) => 0,
    }
}

/// Number of (complete) hint files currently on disk.
pub fn hint_file_count(base: &Path) -> usize {
    match std::fs::read_dir(base.join("hint-files")) {
        Ok(read_dir) => read_dir
            .filter_map(std::result::Result::ok)
            .filter(|dirent| {
                dirent
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.ends_with(".data.hint"))
            })
            .count(),
        Err(_) => 0,
    }
}

/// Polls `cond` for up to 15 seconds.
///
/// # Panics
///
/// Panics if the condition never becomes true.
pub async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..300 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!("timed out waiting for {what}");
}
