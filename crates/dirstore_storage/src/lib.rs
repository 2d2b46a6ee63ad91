//! # dirstore Storage
//!
//! Ordered key-value engine contract for the dirstore directory backend.
//!
//! The directory backend is layered on an embedded, transactional B+tree
//! style engine. This crate captures exactly the surface the backend
//! consumes from such an engine: named tables (optionally holding sorted
//! duplicate values), nested transactions, point lookups, and cursors.
//!
//! ## Design Principles
//!
//! - Engines store opaque bytes; they never interpret keys or values
//! - A miss is `None`, not an error
//! - Top-level writers are serialized; readers work on snapshots
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Available Engines
//!
//! - [`InMemoryEngine`] - Snapshot-isolated engine for tests and embedding
//!
//! ## Example
//!
//! ```rust
//! use dirstore_storage::{AccessMode, CursorOp, InMemoryEngine, KvEngine, PutFlags, TableFlags};
//!
//! let engine = InMemoryEngine::new();
//! let table = engine.open_table("names", TableFlags::UNIQUE).unwrap();
//! let txn = engine.txn_begin(None, AccessMode::ReadWrite).unwrap();
//! engine.put(txn, table, b"alice", b"1", PutFlags::NONE).unwrap();
//! engine.put(txn, table, b"bob", b"2", PutFlags::NONE).unwrap();
//!
//! let cursor = engine.cursor_open(txn, table).unwrap();
//! let (key, _) = engine.cursor_get(cursor, Some(b"b"), CursorOp::SetRange).unwrap().unwrap();
//! assert_eq!(key, b"bob");
//! engine.cursor_close(cursor);
//! engine.txn_commit(txn).unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod memory;
mod types;

pub use engine::KvEngine;
pub use error::{StorageError, StorageResult};
pub use memory::InMemoryEngine;
pub use types::{
    AccessMode, CursorHandle, CursorOp, DupOrder, PutFlags, TableFlags, TableHandle, TxnHandle,
};
