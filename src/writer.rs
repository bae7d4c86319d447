// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    engine::Shared,
    handle::IndexEntry,
    id::{format_segment_id, SegmentId},
    keydir::Keydir,
    record,
    segment::OpenMode,
    shutdown::Shutdown,
};
use std::{fs::File, sync::atomic::Ordering, sync::Arc};
use tokio::sync::{mpsc, oneshot};

/// A request consumed by the writer task
pub(crate) enum WriteRequest {
    /// Append one record; an empty value writes a tombstone
    Put {
        key: String,
        value: String,
    },

    /// Barrier: fsync the active segment and acknowledge once every
    /// request enqueued earlier has been applied
    Flush(oneshot::Sender<()>),
}

/// The single writer task.
///
/// It is the exclusive owner of the active segment's file handle and the
/// only mutator of the active keydir. Requests are applied strictly in
/// queue order, so enqueue order equals on-disk append order.
///
/// On shutdown it stops accepting new requests, drains what is already
/// buffered and closes the file.
///
/// # Errors
///
/// Returns `Err` on the fatal conditions (failing to stat the active
/// segment, failing to open a fresh one on rotation); everything else is
/// logged and the request dropped.
pub(crate) async fn run(
    shared: Arc<Shared>,
    mut active: File,
    mut active_id: SegmentId,
    mut rx: mpsc::Receiver<WriteRequest>,
    mut shutdown: Shutdown,
) -> crate::Result<()> {
    loop {
        let request = tokio::select! {
            request = rx.recv() => match request {
                Some(request) => request,
                None => break,
            },
            () = shutdown.recv() => {
                rx.close();

                while let Some(request) = rx.recv().await {
                    apply(&shared, &mut active, &mut active_id, request)?;
                }

                break;
            }
        };

        apply(&shared, &mut active, &mut active_id, request)?;
    }

    if let Err(e) = active.sync_all() {
        log::warn!("could not sync active segment on shutdown: {e}");
    }

    log::debug!("writer exited");

    Ok(())
}

fn apply(
    shared: &Shared,
    active: &mut File,
    active_id: &mut SegmentId,
    request: WriteRequest,
) -> crate::Result<()> {
    match request {
        WriteRequest::Put { key, value } => {
            // Rotation check; stat failures are fatal
            let size = active.metadata()?.len();

            if size >= shared.config.max_segment_bytes {
                rotate(shared, active, active_id)?;
            }

            match record::append(active, &key, &value) {
                Ok(offset) => match active.sync_data() {
                    Ok(()) => {
                        shared.set_active_entry(
                            key,
                            IndexEntry {
                                segment_id: *active_id,
                                offset,
                            },
                        );

                        shared.write_counter.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        // The bytes may not be durable, so the record is
                        // never exposed through the index
                        log::error!("sync failed after append, dropping request for key {key:?}: {e}");
                    }
                },
                Err(e) => {
                    // Best-effort: the request is dropped, the engine keeps going
                    log::error!("write failed, dropping request for key {key:?}: {e}");
                }
            }
        }
        WriteRequest::Flush(ack) => {
            if let Err(e) = active.sync_data() {
                log::error!("sync failed on flush: {e}");
            }

            // The receiver may have given up; that is fine
            let _ = ack.send(());
        }
    }

    Ok(())
}

fn rotate(shared: &Shared, active: &mut File, active_id: &mut SegmentId) -> crate::Result<()> {
    *active_id += 1;

    log::debug!(
        "rotating active segment to {}",
        format_segment_id(*active_id)
    );

    *active = shared.store.open(*active_id, OpenMode::Append)?;

    shared.push_keydir(Keydir::with_capacity(
        *active_id,
        shared.config.keydir_capacity,
    ));

    // A closed segment now exists; flag it for the compactor
    if let Err(e) = shared.marker.create_if_absent() {
        log::error!("unable to create compaction marker: {e}");
    }

    Ok(())
}
