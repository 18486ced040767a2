//! Vigil Storage - namespaced key-value persistence.
//!
//! The [`KvStore`] trait provides byte-level `get`/`set`/`delete` plus an
//! all-or-nothing [`write_batch`](KvStore::write_batch). Two backends ship
//! with the crate:
//!
//! - [`MemoryKvStore`]: tests and ephemeral chains
//! - [`FileKvStore`]: one file per key, atomic rename on write, a write-ahead
//!   intent file for batches, and an exclusive writer lock
//!
//! [`ScopedKvStore`] pre-binds a namespace and adds JSON helpers.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod error;
pub mod file;
pub mod kv;

pub use error::{StorageError, StorageResult};
pub use file::FileKvStore;
pub use kv::{KvStore, KvWrite, MemoryKvStore, ScopedKvStore};
