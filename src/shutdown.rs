// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use tokio::sync::broadcast;

/// Listens for the shutdown signal.
///
/// Shutdown is signalled by sending on a broadcast channel, or implicitly
/// by dropping its sender; both wake every subscribed task. Once a signal
/// has been observed, `recv` resolves immediately forever after.
pub(crate) struct Shutdown {
    is_shutdown: bool,
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    pub fn new(notify: broadcast::Receiver<()>) -> Self {
        Self {
            is_shutdown: false,
            notify,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown
    }

    /// Waits for the shutdown signal.
    pub async fn recv(&mut self) {
        if self.is_shutdown {
            return;
        }

        // A message and a closed channel both mean shutdown
        let _ = self.notify.recv().await;

        self.is_shutdown = true;
    }
}
