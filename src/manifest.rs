// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::path::PathBuf;

/// The zero-byte manifest marker file.
///
/// Its presence signals "closed segments exist that the compactor should
/// merge". The writer creates it on rotation (and the engine at startup
/// when it recovers more than one segment); only the compactor removes it,
/// when a merge pass completes.
#[derive(Debug)]
pub(crate) struct Marker {
    path: PathBuf,
}

impl Marker {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Creates the marker file unless it already exists.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn create_if_absent(&self) -> std::io::Result<()> {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => {
                log::debug!("created compaction marker at {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Removes the marker file; an already-absent marker is fine.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn remove(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn marker_lifecycle() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;
        let marker = Marker::new(dir.path().join("manifest.txt"));

        assert!(!marker.exists());

        marker.create_if_absent()?;
        assert!(marker.exists());

        // creating twice is a no-op
        marker.create_if_absent()?;
        assert!(marker.exists());

        marker.remove()?;
        assert!(!marker.exists());

        // removing twice is fine as well
        marker.remove()?;

        Ok(())
    }
}
