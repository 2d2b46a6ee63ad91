//! Ordered key-value engine trait definition.

use crate::error::StorageResult;
use crate::types::{AccessMode, CursorHandle, CursorOp, PutFlags, TableFlags, TableHandle, TxnHandle};

/// An embedded, transactional, ordered key-value engine.
///
/// The engine stores opaque byte keys and values in named tables. It knows
/// nothing about entries, indexes, or directory semantics; the backend
/// layered on top owns every key and value format.
///
/// # Invariants
///
/// - Keys within a table iterate in byte-lexicographic order
/// - A transaction sees the state committed before it began, plus its own writes
/// - Top-level write transactions are serialized: a second writer blocks until
///   the first commits or aborts
/// - A child transaction's writes become visible to its parent on child commit
///   and to other transactions only when the top-level parent commits
/// - A transaction with an open child may not be used until the child ends
/// - Lookups and cursor moves report a miss as `None`, never as an error
///
/// # Implementors
///
/// - [`super::InMemoryEngine`] - Snapshot-based engine for tests and embedding
pub trait KvEngine: Send + Sync {
    /// Opens (creating if needed) the named table.
    ///
    /// Reopening an existing table returns the same handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is closed.
    fn open_table(&self, name: &str, flags: TableFlags) -> StorageResult<TableHandle>;

    /// Returns whether a table with this name has been opened.
    fn table_exists(&self, name: &str) -> bool;

    /// Removes every key from a table within `txn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is unusable or read-only.
    fn drop_table(&self, txn: TxnHandle, table: TableHandle) -> StorageResult<()>;

    /// Begins a transaction, nested under `parent` when supplied.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent is unusable or read-only, or the
    /// engine is closed.
    fn txn_begin(&self, parent: Option<TxnHandle>, mode: AccessMode) -> StorageResult<TxnHandle>;

    /// Commits a transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown or still has an open child;
    /// the transaction stays open in the latter case.
    fn txn_commit(&self, txn: TxnHandle) -> StorageResult<()>;

    /// Aborts a transaction and any open child. Unknown handles are ignored.
    fn txn_abort(&self, txn: TxnHandle);

    /// Returns the first value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction or table is unusable.
    fn get(&self, txn: TxnHandle, table: TableHandle, key: &[u8]) -> StorageResult<Option<Vec<u8>>>;

    /// Stores `value` under `key`.
    ///
    /// On duplicate-sorted tables the value is added to the key's set;
    /// on other tables it replaces the existing value.
    ///
    /// # Errors
    ///
    /// Returns `KeyExists` for a no-overwrite put on a present key.
    fn put(
        &self,
        txn: TxnHandle,
        table: TableHandle,
        key: &[u8],
        value: &[u8],
        flags: PutFlags,
    ) -> StorageResult<()>;

    /// Deletes `key`, or only the matching duplicate when `value` is given.
    ///
    /// Returns whether anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction is unusable or read-only.
    fn delete(
        &self,
        txn: TxnHandle,
        table: TableHandle,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> StorageResult<bool>;

    /// Opens a cursor over `table` inside `txn`.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction or table is unusable.
    fn cursor_open(&self, txn: TxnHandle, table: TableHandle) -> StorageResult<CursorHandle>;

    /// Moves the cursor and returns the key/value pair it lands on.
    ///
    /// `key` is required by [`CursorOp::Set`] and [`CursorOp::SetRange`]
    /// and ignored otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the cursor is closed, its transaction has ended,
    /// or a required key is missing.
    fn cursor_get(
        &self,
        cursor: CursorHandle,
        key: Option<&[u8]>,
        op: CursorOp,
    ) -> StorageResult<Option<(Vec<u8>, Vec<u8>)>>;

    /// Closes a cursor. Unknown handles are ignored.
    fn cursor_close(&self, cursor: CursorHandle);

    /// Enables or disables flushing to durable media on commit.
    fn set_sync(&self, enabled: bool);
}
