// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    engine::Shared,
    error::Error,
    id::{format_segment_id, SegmentId},
    record,
    segment::OpenMode,
    shutdown::Shutdown,
    writer::WriteRequest,
    HashSet,
};
use std::{io::BufReader, sync::Arc};
use tokio::sync::{mpsc, oneshot};

/// The compactor task.
///
/// Wakes periodically; while the manifest marker exists it runs merge
/// passes that migrate live records out of closed segments, retire those
/// segments' keydirs and hand their IDs to the deleter.
pub(crate) async fn run(
    shared: Arc<Shared>,
    write_tx: mpsc::Sender<WriteRequest>,
    deletion_tx: mpsc::Sender<SegmentId>,
    mut shutdown: Shutdown,
) {
    let interval = shared.config.compaction_interval;

    loop {
        tokio::select! {
            () = tokio::time::sleep(interval) => {}
            () = shutdown.recv() => break,
        }

        if !shared.marker.exists() {
            continue;
        }

        match pass(&shared, &write_tx, &deletion_tx).await {
            Ok(retired) => {
                if !retired.is_empty() {
                    log::info!("compaction pass retired segments {retired:?}");
                }
            }
            Err(Error::Closed) => {
                // The write queue is gone, the engine is shutting down
                log::debug!("compaction pass aborted, write queue is closed");
                break;
            }
            Err(e) => {
                // The marker is still in place, so the next tick retries
                log::error!("compaction pass failed, will retry: {e}");
            }
        }
    }

    log::debug!("compactor exited");
}

/// Runs one merge pass.
///
/// Closed keydirs are walked newest-to-oldest. A key is migrated unless a
/// newer version dominates it: either it resolves in a keydir at or above
/// the active floor (the active segment ID snapshotted at pass start), or
/// it was already encountered earlier in this pass — without the latter, a
/// live value below a closed-segment tombstone would come back from the
/// dead. Live values are re-enqueued through the regular write queue, so
/// the writer stays the only owner of the append path; tombstones are
/// dropped silently.
///
/// Before the retired keydirs are removed from the stack, a flush barrier
/// is pushed through the write queue: once it is acknowledged, every
/// rewrite is readable via the active keydir and the old locations can be
/// forgotten and deleted.
async fn pass(
    shared: &Shared,
    write_tx: &mpsc::Sender<WriteRequest>,
    deletion_tx: &mpsc::Sender<SegmentId>,
) -> crate::Result<Vec<SegmentId>> {
    let (closed, active_floor) = shared.closed_snapshot();

    if closed.is_empty() {
        // A marker without closed segments is stale
        shared.marker.remove()?;
        return Ok(Vec::new());
    }

    log::debug!(
        "compaction pass over {} closed segments (active floor {})",
        closed.len(),
        format_segment_id(active_floor)
    );

    let mut retired = Vec::with_capacity(closed.len());
    let mut seen = HashSet::default();

    for keydir in closed.iter().rev() {
        let id = keydir.segment_id();

        let file = match shared.store.open(id, OpenMode::ReadWrite) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted by an earlier, aborted pass; nothing left to migrate
                log::warn!(
                    "closed segment {} is gone, retiring its keydir",
                    format_segment_id(id)
                );
                retired.push(id);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);

        for key in keydir.keys() {
            if shared.resolves_at_or_above(&key, active_floor) {
                continue;
            }

            if !seen.insert(key.clone()) {
                continue;
            }

            let Some(entry) = keydir.get(&key) else {
                continue;
            };

            let Some((record_key, value_json)) = record::read_record(&mut reader, entry.offset)?
            else {
                log::warn!(
                    "no record at {}:{} for key {key:?}",
                    format_segment_id(id),
                    entry.offset
                );
                continue;
            };

            if record_key != key {
                log::warn!(
                    "index for key {key:?} points at a record for {record_key:?}, skipping"
                );
                continue;
            }

            let value: String = match serde_json::from_str(&value_json) {
                Ok(value) => value,
                Err(e) => {
                    log::error!("skipping undecodable record for key {key:?}: {e}");
                    continue;
                }
            };

            // Tombstones are dropped by the merge
            if value.is_empty() {
                continue;
            }

            write_tx
                .send(WriteRequest::Put {
                    key: key.clone(),
                    value,
                })
                .await
                .map_err(|_| Error::Closed)?;
        }

        drop(reader);

        deletion_tx.send(id).await.map_err(|_| Error::Closed)?;
        retired.push(id);
    }

    // Barrier: all rewrites must be applied before the stack forgets the
    // old locations
    let (ack_tx, ack_rx) = oneshot::channel();
    write_tx
        .send(WriteRequest::Flush(ack_tx))
        .await
        .map_err(|_| Error::Closed)?;
    ack_rx.await.map_err(|_| Error::Closed)?;

    shared.retire(&retired);
    shared.marker.remove()?;

    Ok(retired)
}
