// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Line-oriented TCP front-end for the storage engine.
//!
//! Commands are one per line (`\r\n` tolerated, backspace characters
//! stripped):
//!
//! - `set KEY VALUE` enqueues a write and sends no response body
//! - `get KEY` answers the value, or `no record found`
//! - `delete KEY` enqueues a tombstone and answers `deleted record`
//!
//! Anything else is answered with `no valid commands provided`.

use crate::{shutdown::Shutdown, Engine};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    sync::{broadcast, mpsc, Semaphore},
    time,
};

/// Max number of concurrent connections served at a time.
const MAX_CONNECTIONS: usize = 128;

/// Max number of seconds to wait between retries when accepting fails.
const MAX_BACKOFF: u64 = 64;

/// Serves the wire protocol until `shutdown` completes or the engine
/// signals shutdown (e.g. after a fatal writer error), then waits for all
/// connection tasks to finish.
pub async fn run<S: Future>(engine: Engine, listener: TcpListener, shutdown: S) {
    // Connection tasks subscribe to this channel; dropping the sender
    // tells them to stop
    let (notify_shutdown, _) = broadcast::channel(1);

    // Every connection task holds a clone of the sender half; once all of
    // them are gone, the receiver unblocks and draining is complete
    let (conn_done_tx, mut conn_done_rx) = mpsc::channel::<()>(1);

    let mut engine_shutdown = engine.subscribe();

    let mut ctx = Context {
        engine,
        listener,
        limit_connections: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
        notify_shutdown,
        conn_done_tx,
    };

    tokio::select! {
        res = ctx.listen() => {
            if let Err(e) = res {
                log::error!("failed to accept: {e}");
            }
        }
        _ = shutdown => {
            log::info!("shutting down server");
        }
        () = engine_shutdown.recv() => {
            log::info!("engine stopped, shutting down server");
        }
    }

    let Context {
        notify_shutdown,
        conn_done_tx,
        ..
    } = ctx;

    drop(notify_shutdown);
    drop(conn_done_tx);

    let _ = conn_done_rx.recv().await;
}

struct Context {
    engine: Engine,
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    conn_done_tx: mpsc::Sender<()>,
}

impl Context {
    async fn listen(&mut self) -> std::io::Result<()> {
        log::info!("listening for connections");

        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore closed");

            let socket = self.accept().await?;

            let mut handler = Handler {
                engine: self.engine.clone(),
                shutdown: Shutdown::new(self.notify_shutdown.subscribe()),
                _done: self.conn_done_tx.clone(),
            };

            tokio::spawn(async move {
                let _permit = permit;

                if let Err(e) = handler.run(socket).await {
                    log::error!("connection error: {e}");
                }
            });
        }
    }

    /// Accepts a new connection, retrying with exponential backoff.
    async fn accept(&mut self) -> std::io::Result<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(e) => {
                    if backoff > MAX_BACKOFF {
                        return Err(e);
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff <<= 1;
        }
    }
}

struct Handler {
    engine: Engine,
    shutdown: Shutdown,

    // Dropped when the handler finishes, which counts towards draining
    _done: mpsc::Sender<()>,
}

impl Handler {
    async fn run(&mut self, socket: TcpStream) -> crate::Result<()> {
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half);

        write_half.write_all(b"Connected\r\n").await?;

        let mut line = String::new();

        while !self.shutdown.is_shutdown() {
            line.clear();

            let read = tokio::select! {
                res = lines.read_line(&mut line) => res?,
                () = self.shutdown.recv() => return Ok(()),
            };

            // Zero bytes read means the client hung up
            if read == 0 {
                return Ok(());
            }

            self.dispatch(&line, &mut write_half).await?;
        }

        Ok(())
    }

    async fn dispatch(&self, line: &str, out: &mut OwnedWriteHalf) -> crate::Result<()> {
        let line = line.trim_end_matches(['\n', '\r']).replace('\u{8}', "");

        let mut parts = line.splitn(3, ' ');

        let response = match (parts.next(), parts.next(), parts.next()) {
            (Some("get"), Some(key), None) => Some(match self.engine.get(key) {
                Ok(Some(value)) => format!("{value}\r\n"),
                Ok(None) => "no record found\r\n".to_owned(),
                Err(e) => format!("{e}\r\n"),
            }),

            (Some("set"), Some(key), Some(value)) => match self.engine.set(key, value).await {
                // `set` acknowledges on enqueue and sends no body
                Ok(()) => None,
                Err(e) => Some(format!("{e}\r\n")),
            },

            (Some("delete"), Some(key), None) => Some(match self.engine.delete(key).await {
                Ok(()) => "deleted record\r\n".to_owned(),
                Err(e) => format!("{e}\r\n"),
            }),

            _ => Some("no valid commands provided\r\n".to_owned()),
        };

        if let Some(response) = response {
            out.write_all(response.as_bytes()).await?;
        }

        Ok(())
    }
}
