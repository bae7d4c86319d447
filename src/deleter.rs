// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{engine::Shared, id::format_segment_id, id::SegmentId, shutdown::Shutdown};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

/// Grace period between a segment's retirement and the actual unlink, so
/// a reader that sampled an offset just before retirement can finish.
const DELETION_GRACE: Duration = Duration::from_millis(100);

/// The deleter task.
///
/// Consumes retired segment IDs from a bounded queue and removes the
/// segment file plus its hint file. The queue decouples the compactor from
/// filesystem latency; missing files are logged but not fatal.
///
/// On shutdown, the remaining backlog is drained without the grace delay.
pub(crate) async fn run(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<SegmentId>,
    mut shutdown: Shutdown,
) {
    loop {
        tokio::select! {
            id = rx.recv() => match id {
                Some(id) => {
                    tokio::time::sleep(DELETION_GRACE).await;
                    remove(&shared, id);
                }
                None => break,
            },
            () = shutdown.recv() => {
                rx.close();

                while let Some(id) = rx.recv().await {
                    remove(&shared, id);
                }

                break;
            }
        }
    }

    log::debug!("deleter exited");
}

fn remove(shared: &Shared, id: SegmentId) {
    log::debug!("deleting segment {}", format_segment_id(id));

    if let Err(e) = shared.store.remove(id) {
        log::error!("could not delete segment {}: {e}", format_segment_id(id));
    }
}
