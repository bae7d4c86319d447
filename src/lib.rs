// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Bitcask-style log-structured key-value store.
//!
//! Writes are appended to the *active* segment file; once it reaches a
//! size threshold it is closed and a fresh one takes over. Reads are
//! served through an in-memory index (one *keydir* per segment) that maps
//! each key to the byte offset of its latest record:
//!
//! [k0, v0][k1, v1][k0, v2][k2, v3]
//!
//! A lookup walks the keydirs from the newest segment to the oldest, so
//! the most recent version always wins; a record holding the empty string
//! is a tombstone and masks everything older. A background compactor
//! merges closed segments back into the active tail, dropping obsolete
//! versions and tombstones, and a deleter reclaims the merged files.
//! Keydirs are periodically persisted as *hint files*, which recovery
//! prefers over rescanning whole segments.
//!
//! All writes funnel through one writer task via a bounded queue; readers
//! open their own file handles and never block the writer. The engine is
//! exposed behind a cloneable [`Engine`] handle, and [`server`] puts a
//! line-oriented TCP protocol in front of it.
//!
//! # Example usage
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> cask_log::Result<()> {
//! use cask_log::{Config, Engine};
//!
//! // Open or recover the store from disk
//! let engine = Engine::open(Config::new("data"))?;
//!
//! engine.set("a", "hello").await?;
//!
//! // Writes are acknowledged on enqueue; flush() waits until they are
//! // applied and fsynced
//! engine.flush().await?;
//!
//! assert_eq!(Some("hello".to_owned()), engine.get("a")?);
//!
//! engine.delete("a").await?;
//!
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]

mod compactor;
mod config;
mod deleter;
mod engine;
mod error;
mod handle;
mod hint;
mod id;
mod keydir;
mod manifest;
mod persist;
mod reader;
mod record;
mod recovery;
mod segment;

pub mod server;

mod shutdown;
mod writer;

pub(crate) type HashMap<K, V> = std::collections::HashMap<K, V, xxhash_rust::xxh3::Xxh3Builder>;
pub(crate) type HashSet<T> = std::collections::HashSet<T, xxhash_rust::xxh3::Xxh3Builder>;

pub use {
    config::Config,
    engine::Engine,
    error::{Error, Result},
    handle::IndexEntry,
    id::SegmentId,
};
