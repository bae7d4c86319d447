// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    compactor,
    config::Config,
    deleter,
    error::Error,
    handle::IndexEntry,
    id::SegmentId,
    keydir::Keydir,
    manifest::Marker,
    persist, reader, recovery,
    segment::{OpenMode, SegmentStore},
    shutdown::Shutdown,
    writer::{self, WriteRequest},
};
use path_absolutize::Absolutize;
use std::sync::{
    atomic::AtomicU64,
    Arc, Mutex, RwLock,
};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};

/// State shared between the engine handle and its background tasks
pub(crate) struct Shared {
    pub config: Config,
    pub store: SegmentStore,
    pub marker: Marker,

    /// Applied writes since the last hint-file snapshot
    pub write_counter: AtomicU64,

    /// One keydir per extant segment, ordered by ascending segment ID;
    /// the last element is the active keydir
    stack: RwLock<Vec<Keydir>>,
}

impl Shared {
    fn read_stack(&self) -> std::sync::RwLockReadGuard<'_, Vec<Keydir>> {
        self.stack.read().expect("lock is poisoned")
    }

    fn write_stack(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Keydir>> {
        self.stack.write().expect("lock is poisoned")
    }

    /// All index entries for a key, newest keydir first.
    pub fn lookup(&self, key: &str) -> Vec<IndexEntry> {
        self.read_stack()
            .iter()
            .rev()
            .filter_map(|keydir| keydir.get(key))
            .collect()
    }

    /// Whether any keydir with a segment ID at or above `floor` knows the
    /// key.
    pub fn resolves_at_or_above(&self, key: &str, floor: SegmentId) -> bool {
        self.read_stack()
            .iter()
            .rev()
            .take_while(|keydir| keydir.segment_id() >= floor)
            .any(|keydir| keydir.contains(key))
    }

    /// Pushes a fresh active keydir; called by the writer on rotation.
    pub fn push_keydir(&self, keydir: Keydir) {
        self.write_stack().push(keydir);
    }

    /// Updates the active keydir; called only by the writer.
    pub fn set_active_entry(&self, key: String, entry: IndexEntry) {
        if let Some(active) = self.write_stack().last_mut() {
            active.set(key, entry);
        }
    }

    /// Clone of the active keydir, for the hint persister.
    pub fn active_snapshot(&self) -> Option<Keydir> {
        self.read_stack().last().cloned()
    }

    /// Clones of all closed keydirs plus the active segment ID at the time
    /// of the snapshot.
    pub fn closed_snapshot(&self) -> (Vec<Keydir>, SegmentId) {
        let stack = self.read_stack();

        let active_id = stack.last().map_or(1, Keydir::segment_id);
        let closed = stack
            .split_last()
            .map(|(_, closed)| closed.to_vec())
            .unwrap_or_default();

        (closed, active_id)
    }

    /// Atomically drops the given keydirs from the stack.
    pub fn retire(&self, ids: &[SegmentId]) {
        if ids.is_empty() {
            return;
        }

        self.write_stack()
            .retain(|keydir| !ids.contains(&keydir.segment_id()));
    }
}

struct Tasks {
    writer: JoinHandle<()>,
    compactor: JoinHandle<()>,
    persister: JoinHandle<()>,
    deleter: JoinHandle<()>,
}

struct EngineInner {
    shared: Arc<Shared>,
    write_tx: mpsc::Sender<WriteRequest>,
    notify_shutdown: broadcast::Sender<()>,
    tasks: Mutex<Option<Tasks>>,
}

/// A disk-resident key-value store.
///
/// Cloning the engine is cheap and yields another handle onto the same
/// store; handles can be shared freely between tasks. Reads are served
/// directly from the calling task, writes are enqueued to the single
/// writer task.
///
/// Call [`Engine::shutdown`] for an orderly exit; simply dropping the last
/// handle also signals the background tasks to stop, but does not wait for
/// them.
#[derive(Clone)]
pub struct Engine(Arc<EngineInner>);

impl Engine {
    /// Creates or recovers a store in the configured base folder and
    /// spawns the background tasks (writer, compactor, hint persister,
    /// deleter).
    ///
    /// # Errors
    ///
    /// Will return `Err` if the directories cannot be bootstrapped, if
    /// recovery hits an IO error, or if the active segment cannot be
    /// opened. All of these are fatal; partial recovery is not attempted.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn open(config: Config) -> crate::Result<Self> {
        let base = config.base_dir.absolutize()?.into_owned();
        log::info!("opening key-value store at {}", base.display());

        let store = SegmentStore::new(&base);
        store.create_dirs()?;

        let marker = Marker::new(config.manifest_path.clone());

        let mut stack = recovery::rebuild(&store, config.keydir_capacity)?;

        // Count what is actually on disk before the active keydir below
        // is appended; it may belong to a segment that does not exist yet
        let recovered = stack.len();

        let active_id = store.active_id(config.max_segment_bytes)?;
        if stack.last().map(Keydir::segment_id) != Some(active_id) {
            stack.push(Keydir::with_capacity(active_id, config.keydir_capacity));
        }

        // More than one on-disk segment means a backlog of closed
        // segments the compactor should merge
        if recovered > 1 {
            marker.create_if_absent()?;
        }

        let active = store.open(active_id, OpenMode::Append)?;

        let shared = Arc::new(Shared {
            config,
            store,
            marker,
            write_counter: AtomicU64::new(0),
            stack: RwLock::new(stack),
        });

        let (notify_shutdown, _) = broadcast::channel(1);
        let (write_tx, write_rx) = mpsc::channel(shared.config.write_queue_capacity);
        let (deletion_tx, deletion_rx) = mpsc::channel(shared.config.deletion_queue_capacity);

        let writer = {
            let shared = shared.clone();
            let notify = notify_shutdown.clone();
            let shutdown = Shutdown::new(notify_shutdown.subscribe());

            tokio::spawn(async move {
                if let Err(e) = writer::run(shared, active, active_id, write_rx, shutdown).await {
                    log::error!("writer failed, shutting the engine down: {e}");
                    let _ = notify.send(());
                }
            })
        };

        let compactor = tokio::spawn(compactor::run(
            shared.clone(),
            write_tx.clone(),
            deletion_tx,
            Shutdown::new(notify_shutdown.subscribe()),
        ));

        let persister = tokio::spawn(persist::run(
            shared.clone(),
            Shutdown::new(notify_shutdown.subscribe()),
        ));

        let deleter = tokio::spawn(deleter::run(
            shared.clone(),
            deletion_rx,
            Shutdown::new(notify_shutdown.subscribe()),
        ));

        Ok(Self(Arc::new(EngineInner {
            shared,
            write_tx,
            notify_shutdown,
            tasks: Mutex::new(Some(Tasks {
                writer,
                compactor,
                persister,
                deleter,
            })),
        })))
    }

    /// Looks up a key.
    ///
    /// Returns `None` if the key has never been written or its latest
    /// record is a tombstone.
    ///
    /// # Errors
    ///
    /// Will return `Err` if an IO error occurs.
    pub fn get(&self, key: &str) -> crate::Result<Option<String>> {
        reader::get(&self.0.shared, key)
    }

    /// Enqueues a write.
    ///
    /// Returns as soon as the request is accepted by the (bounded) write
    /// queue; use [`Engine::flush`] when durability has to be observed.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the key is invalid or the engine is shutting
    /// down.
    pub async fn set(&self, key: &str, value: &str) -> crate::Result<()> {
        validate_key(key)?;

        self.0
            .write_tx
            .send(WriteRequest::Put {
                key: key.to_owned(),
                value: value.to_owned(),
            })
            .await
            .map_err(|_| Error::Closed)
    }

    /// Enqueues a deletion (a tombstone write).
    ///
    /// # Errors
    ///
    /// Will return `Err` if the key is invalid or the engine is shutting
    /// down.
    pub async fn delete(&self, key: &str) -> crate::Result<()> {
        validate_key(key)?;

        self.0
            .write_tx
            .send(WriteRequest::Put {
                key: key.to_owned(),
                value: String::new(),
            })
            .await
            .map_err(|_| Error::Closed)
    }

    /// Waits until every write enqueued before this call has been applied
    /// and the active segment has been fsynced.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the engine is shutting down.
    pub async fn flush(&self) -> crate::Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();

        self.0
            .write_tx
            .send(WriteRequest::Flush(ack_tx))
            .await
            .map_err(|_| Error::Closed)?;

        ack_rx.await.map_err(|_| Error::Closed)
    }

    /// Subscribes to the engine's shutdown signal.
    pub(crate) fn subscribe(&self) -> Shutdown {
        Shutdown::new(self.0.notify_shutdown.subscribe())
    }

    /// Shuts the engine down and waits for its background tasks.
    ///
    /// The writer stops accepting new requests and drains what is already
    /// queued, the compactor and persister stop at their next suspension
    /// point, and the deleter drains its backlog. Subsequent calls are
    /// no-ops.
    pub async fn shutdown(&self) {
        let tasks = { self.0.tasks.lock().expect("lock is poisoned").take() };

        let Some(tasks) = tasks else {
            return;
        };

        log::info!("shutting down engine");

        let _ = self.0.notify_shutdown.send(());

        for (name, handle) in [
            ("writer", tasks.writer),
            ("compactor", tasks.compactor),
            ("persister", tasks.persister),
            ("deleter", tasks.deleter),
        ] {
            if let Err(e) = handle.await {
                log::error!("{name} task did not exit cleanly: {e}");
            }
        }

        log::info!("engine shut down");
    }
}

fn validate_key(key: &str) -> crate::Result<()> {
    if key.is_empty() || key.contains(',') || key.contains('\n') {
        return Err(Error::InvalidKey);
    }

    Ok(())
}
