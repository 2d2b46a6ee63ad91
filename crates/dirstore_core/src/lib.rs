//! # dirstore Core
//!
//! Storage core of an LDAP directory backend, layered on an ordered
//! key-value engine.
//!
//! This crate provides:
//! - Entry ID encoding for B+tree keys
//! - Per-thread transaction contexts and the transaction state machine for
//!   the main and log databases, including multi-operation user
//!   transactions
//! - Index scans turning filter components into candidate sets
//! - DN and objectGUID resolution
//! - The [`Backend`] interface and its engine-backed [`MdbBackend`]
//!
//! ## Example
//!
//! ```rust
//! use dirstore_core::{
//!     Backend, BackendConfig, FilterComponent, IndexDescriptor, IndexKind, MdbBackend,
//!     MemoryIndexCatalog, NewEntry, WriteTxnCounter,
//! };
//! use dirstore_core::EntryId;
//! use dirstore_storage::InMemoryEngine;
//! use std::sync::Arc;
//!
//! let catalog = MemoryIndexCatalog::with_indexes([IndexDescriptor::new("sn", &[IndexKind::Equality])]);
//! let backend = MdbBackend::open(
//!     BackendConfig::default(),
//!     Arc::new(InMemoryEngine::new()),
//!     Arc::new(InMemoryEngine::new()),
//!     Arc::new(catalog),
//!     Arc::new(WriteTxnCounter::new()),
//! )
//! .unwrap();
//!
//! let mut ctx = backend.new_context();
//! backend.add_entry(&mut ctx, NewEntry::new("dc=example")).unwrap();
//! let eid = backend
//!     .add_entry(&mut ctx, NewEntry::new("cn=ann,dc=example").attribute("sn", ["Smith"]))
//!     .unwrap();
//!
//! let outcome = backend
//!     .get_candidates(&ctx, &FilterComponent::equality("sn", "smith"), EntryId::NONE)
//!     .unwrap();
//! assert_eq!(outcome.candidates().unwrap().as_slice(), &[eid]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod codec;
mod config;
pub mod dn;
mod entry;
mod error;
pub mod index;
mod stats;
pub mod transaction;
mod types;

pub use backend::{Backend, BackendContext, EntryBlobIterator, IndexIterator, MdbBackend};
pub use config::BackendConfig;
pub use entry::{Entry, ModOp, Modification, NewEntry};
pub use error::{CoreError, CoreResult, ResultCode};
pub use index::{
    CandidateSet, FilterChoice, FilterComponent, IndexAccess, IndexCatalog, IndexDescriptor,
    IndexKey, IndexKind, IndexScanEngine, IndexStatus, MemoryIndexCatalog, NotIndexedReason,
    ScanOutcome, SubstringPattern,
};
pub use stats::{BackendStats, StatsSnapshot};
pub use transaction::{
    ChangeKind, ChangeLogRecord, ThreadTxnState, TransactionContext, TransactionManager,
    TxnMode, TxnState, WriteTxnCounter,
};
pub use types::{BackendId, Database, EntryId, Usn};
