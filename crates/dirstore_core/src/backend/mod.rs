//! The backend interface exposed to the rest of the directory server.
//!
//! Every call takes the caller's [`BackendContext`], which carries the
//! connection thread's transaction state. Reads run inside the context's
//! open transaction when there is one and inside a call-scoped read
//! transaction otherwise. Writes join the context's transaction, or open
//! (and end) one of their own.

mod mdb;

pub use mdb::{EntryBlobIterator, IndexIterator, MdbBackend};

use crate::entry::{Entry, Modification, NewEntry};
use crate::error::CoreResult;
use crate::index::{FilterComponent, IndexDescriptor, ScanOutcome};
use crate::transaction::{ThreadTxnState, TxnMode};
use crate::types::{Database, EntryId, Usn};
use std::sync::Arc;
use uuid::Uuid;

/// Per-connection state handed into every backend call.
///
/// Owns the thread's transaction contexts, so it stays on the thread that
/// created it.
#[derive(Debug, Default)]
pub struct BackendContext {
    txns: ThreadTxnState,
    client_txn_id: Option<String>,
    max_scan_for_size_limit: usize,
}

impl BackendContext {
    /// Creates a context with no transaction and the given size-limit scan
    /// cap (0 = unlimited).
    #[must_use]
    pub fn new(max_scan_for_size_limit: usize) -> Self {
        Self {
            max_scan_for_size_limit,
            ..Self::default()
        }
    }

    /// Returns the transaction contexts.
    #[must_use]
    pub const fn txns(&self) -> &ThreadTxnState {
        &self.txns
    }

    /// Returns the transaction contexts mutably.
    pub fn txns_mut(&mut self) -> &mut ThreadTxnState {
        &mut self.txns
    }

    /// Returns the client transaction id operations are issued under.
    #[must_use]
    pub fn client_txn_id(&self) -> Option<&str> {
        self.client_txn_id.as_deref()
    }

    /// Sets (or clears) the client transaction id for following operations.
    pub fn set_client_txn_id(&mut self, id: Option<String>) {
        self.client_txn_id = id;
    }

    /// Returns the size-limit scan cap.
    #[must_use]
    pub const fn max_scan_for_size_limit(&self) -> usize {
        self.max_scan_for_size_limit
    }

    /// Sets the size-limit scan cap for following searches.
    pub fn set_max_scan_for_size_limit(&mut self, max: usize) {
        self.max_scan_for_size_limit = max;
    }
}

/// Operations a directory storage backend provides.
pub trait Backend: Send + Sync {
    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begins (or joins) a transaction on `database`.
    ///
    /// Returns `true` when a new engine transaction was opened; only then
    /// must the caller end it with [`Backend::txn_commit`] or
    /// [`Backend::txn_abort`].
    ///
    /// # Errors
    ///
    /// Returns `Unwilling` for rule violations and engine errors otherwise.
    fn txn_begin(&self, ctx: &mut BackendContext, database: Database, mode: TxnMode)
        -> CoreResult<bool>;

    /// Commits the transaction open on `database`.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is open or the engine commit fails.
    fn txn_commit(&self, ctx: &mut BackendContext, database: Database) -> CoreResult<()>;

    /// Aborts the transaction open on `database`.
    fn txn_abort(&self, ctx: &mut BackendContext, database: Database);

    /// Declares user transaction `id`; operations carry it until it ends.
    ///
    /// # Errors
    ///
    /// Returns `Unwilling` if a transaction is already in progress.
    fn begin_user_txn(&self, ctx: &mut BackendContext, id: &str) -> CoreResult<()>;

    /// Commits the context's user transaction.
    ///
    /// # Errors
    ///
    /// Returns `Unwilling` if no user transaction is open or it expired.
    fn commit_user_txn(&self, ctx: &mut BackendContext) -> CoreResult<()>;

    /// Aborts the context's user transaction.
    ///
    /// # Errors
    ///
    /// Returns `Unwilling` if no user transaction is open.
    fn abort_user_txn(&self, ctx: &mut BackendContext) -> CoreResult<()>;

    /// Aborts everything the context has open, on both databases.
    fn abort_all(&self, ctx: &mut BackendContext);

    // ========================================================================
    // Search support
    // ========================================================================

    /// Collects candidate entry IDs at or above `floor` for one filter
    /// component.
    ///
    /// # Errors
    ///
    /// Returns engine errors; "not indexed" is an outcome, not an error.
    fn get_candidates(
        &self,
        ctx: &BackendContext,
        filter: &FilterComponent,
        floor: EntryId,
    ) -> CoreResult<ScanOutcome>;

    /// Resolves a DN to its entry ID.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` when no entry has the DN.
    fn dn_to_entry_id(&self, ctx: &BackendContext, dn: &str) -> CoreResult<EntryId>;

    /// Resolves an objectGUID to its entry ID.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` when no entry has the GUID.
    fn object_guid_to_entry_id(&self, ctx: &BackendContext, guid: &Uuid) -> CoreResult<EntryId>;

    // ========================================================================
    // Entries
    // ========================================================================

    /// Reads an entry by ID.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` when no entry has the ID.
    fn id_to_entry(&self, ctx: &BackendContext, eid: EntryId) -> CoreResult<Entry>;

    /// Reads an entry by DN.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` when no entry has the DN.
    fn dn_to_entry(&self, ctx: &BackendContext, dn: &str) -> CoreResult<Entry>;

    /// Adds an entry, returning its new ID.
    ///
    /// # Errors
    ///
    /// Returns `EntryExists`, `ParentNotFound` or `Constraint` when the
    /// entry cannot be placed.
    fn add_entry(&self, ctx: &mut BackendContext, entry: NewEntry) -> CoreResult<EntryId>;

    /// Applies modifications to the entry at `dn`.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound`, `Unwilling` for operational attributes, or
    /// `Constraint`.
    fn modify_entry(
        &self,
        ctx: &mut BackendContext,
        dn: &str,
        modifications: &[Modification],
    ) -> CoreResult<()>;

    /// Deletes the leaf entry at `dn`.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` or `NotAllowedOnNonLeaf`.
    fn delete_entry(&self, ctx: &mut BackendContext, dn: &str) -> CoreResult<()>;

    /// Returns whether the entry has no children.
    ///
    /// # Errors
    ///
    /// Returns engine errors.
    fn is_leaf(&self, ctx: &BackendContext, eid: EntryId) -> CoreResult<bool>;

    /// Returns the highest entry ID handed out, if any.
    ///
    /// # Errors
    ///
    /// Returns engine errors.
    fn max_entry_id(&self, ctx: &BackendContext) -> CoreResult<Option<EntryId>>;

    /// Hands out the next update sequence number.
    ///
    /// # Errors
    ///
    /// Returns transaction and engine errors.
    fn next_usn(&self, ctx: &mut BackendContext) -> CoreResult<Usn>;

    // ========================================================================
    // Indexes
    // ========================================================================

    /// Opens the table behind `descriptor` and registers it.
    ///
    /// # Errors
    ///
    /// Returns engine errors.
    fn index_open(&self, descriptor: IndexDescriptor) -> CoreResult<Arc<IndexDescriptor>>;

    /// Returns whether an index exists for `attr`.
    fn index_exists(&self, attr: &str) -> bool;

    /// Removes the index for `attr` and its contents.
    ///
    /// # Errors
    ///
    /// Returns `Unwilling` for built-in or in-use indexes.
    fn index_delete(&self, ctx: &mut BackendContext, attr: &str) -> CoreResult<()>;

    /// Builds index keys for up to `batch` existing entries from `start`.
    ///
    /// Returns where the next batch should start, or `None` when done.
    ///
    /// # Errors
    ///
    /// Returns transaction and engine errors.
    fn index_populate(
        &self,
        ctx: &mut BackendContext,
        attrs: &[&str],
        start: EntryId,
        batch: usize,
    ) -> CoreResult<Option<EntryId>>;

    // ========================================================================
    // Generic keys
    // ========================================================================

    /// Reads a value from the generic unique-key table.
    ///
    /// # Errors
    ///
    /// Returns engine errors.
    fn unique_key_get(&self, ctx: &BackendContext, key: &[u8]) -> CoreResult<Option<Vec<u8>>>;

    /// Stores a value in the generic unique-key table, replacing any other.
    ///
    /// # Errors
    ///
    /// Returns transaction and engine errors.
    fn unique_key_set(&self, ctx: &mut BackendContext, key: &[u8], value: &[u8]) -> CoreResult<()>;

    /// Reads every value under a key of the generic duplicate-key table.
    ///
    /// # Errors
    ///
    /// Returns engine errors.
    fn dup_key_get(&self, ctx: &BackendContext, key: &[u8]) -> CoreResult<Vec<Vec<u8>>>;

    /// Adds a value under a key of the generic duplicate-key table.
    ///
    /// # Errors
    ///
    /// Returns transaction and engine errors.
    fn dup_key_set(&self, ctx: &mut BackendContext, key: &[u8], value: &[u8]) -> CoreResult<()>;

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Enables or disables flushing on commit.
    fn configure_fsync(&self, enabled: bool);

    /// Refuses all further work.
    fn shutdown(&self);
}
