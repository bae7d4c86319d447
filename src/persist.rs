// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{engine::Shared, hint, id::format_segment_id, shutdown::Shutdown};
use std::sync::{atomic::Ordering, Arc};

/// The hint persister task.
///
/// Wakes periodically; once enough writes have accumulated since the last
/// snapshot, it clones the active keydir and writes it out as a hint file,
/// then resets the write counter. Failures are logged and the counter kept,
/// so the next tick that still meets the threshold tries again.
pub(crate) async fn run(shared: Arc<Shared>, mut shutdown: Shutdown) {
    let interval = shared.config.persist_interval;

    loop {
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = shutdown.recv() => break,
        }

        let writes = shared.write_counter.load(Ordering::Relaxed);
        if writes < shared.config.keydir_persist_threshold {
            continue;
        }

        let Some(keydir) = shared.active_snapshot() else {
            continue;
        };
        let id = keydir.segment_id();

        match hint::write(&shared.store, &keydir) {
            Ok(()) => {
                log::debug!(
                    "persisted keydir for segment {} ({} keys, {writes} writes since last snapshot)",
                    format_segment_id(id),
                    keydir.len()
                );

                shared.write_counter.store(0, Ordering::Relaxed);
            }
            Err(e) => {
                log::error!(
                    "could not persist keydir for segment {}: {e}",
                    format_segment_id(id)
                );
            }
        }
    }

    log::debug!("hint persister exited");
}
