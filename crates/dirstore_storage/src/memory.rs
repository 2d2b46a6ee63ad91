//! In-memory engine for tests and embedding.

use crate::engine::KvEngine;
use crate::error::{StorageError, StorageResult};
use crate::types::{AccessMode, CursorHandle, CursorOp, PutFlags, TableFlags, TableHandle, TxnHandle};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

type Rows = BTreeMap<Vec<u8>, Vec<Vec<u8>>>;

#[derive(Debug, Clone, Default)]
struct Table {
    rows: Rows,
}

static EMPTY_TABLE: Table = Table {
    rows: BTreeMap::new(),
};

/// Copy-on-write view of every table. Cloning shares the table maps.
#[derive(Debug, Clone, Default)]
struct Snapshot {
    tables: Vec<Arc<Table>>,
}

impl Snapshot {
    /// Tables opened after this snapshot was taken read as empty.
    fn table(&self, handle: TableHandle) -> &Table {
        self.tables
            .get(handle.0 as usize)
            .map_or(&EMPTY_TABLE, Arc::as_ref)
    }

    fn table_mut(&mut self, handle: TableHandle) -> &mut Table {
        let idx = handle.0 as usize;
        if self.tables.len() <= idx {
            self.tables.resize_with(idx + 1, Default::default);
        }
        Arc::make_mut(&mut self.tables[idx])
    }

    fn clear_table(&mut self, handle: TableHandle) {
        let idx = handle.0 as usize;
        if idx < self.tables.len() {
            self.tables[idx] = Arc::default();
        }
    }
}

#[derive(Debug)]
struct TableMeta {
    name: String,
    flags: TableFlags,
}

#[derive(Debug)]
struct TxnSlot {
    parent: Option<TxnHandle>,
    child: Option<TxnHandle>,
    mode: AccessMode,
    view: Snapshot,
}

#[derive(Debug)]
struct CursorSlot {
    txn: TxnHandle,
    table: TableHandle,
    /// Current key and duplicate index.
    position: Option<(Vec<u8>, usize)>,
}

#[derive(Debug, Default)]
struct Registry {
    next_txn: u64,
    next_cursor: u64,
    txns: HashMap<TxnHandle, TxnSlot>,
    cursors: HashMap<CursorHandle, CursorSlot>,
}

impl Registry {
    fn allocate_txn(&mut self) -> TxnHandle {
        self.next_txn += 1;
        TxnHandle(self.next_txn)
    }

    fn usable(&self, txn: TxnHandle) -> StorageResult<&TxnSlot> {
        let slot = self
            .txns
            .get(&txn)
            .ok_or_else(|| StorageError::bad_transaction(format!("{txn} is not active")))?;
        if slot.child.is_some() {
            return Err(StorageError::bad_transaction(format!(
                "{txn} has an open child"
            )));
        }
        Ok(slot)
    }

    fn writable(&mut self, txn: TxnHandle) -> StorageResult<&mut TxnSlot> {
        self.usable(txn)?;
        let slot = self
            .txns
            .get_mut(&txn)
            .ok_or_else(|| StorageError::bad_transaction(format!("{txn} is not active")))?;
        if !slot.mode.is_write() {
            return Err(StorageError::ReadOnly);
        }
        Ok(slot)
    }

    fn close_cursors_of(&mut self, txn: TxnHandle) {
        self.cursors.retain(|_, cursor| cursor.txn != txn);
    }

    /// Removes `txn` and its open descendants, detaching it from its parent.
    fn abort_tree(&mut self, txn: TxnHandle) -> Option<TxnSlot> {
        let slot = self.txns.remove(&txn)?;
        if let Some(child) = slot.child {
            self.abort_tree(child);
        }
        self.close_cursors_of(txn);
        if let Some(parent) = slot.parent {
            if let Some(parent_slot) = self.txns.get_mut(&parent) {
                parent_slot.child = None;
            }
        }
        Some(slot)
    }
}

/// A snapshot-isolated, single-writer engine held entirely in memory.
///
/// Each table is a sorted map from key to a sorted list of values. Readers
/// clone the committed snapshot when they begin, so they never block the
/// writer and never see its uncommitted changes.
///
/// # Thread Safety
///
/// The engine is `Send + Sync`. Top-level write transactions are serialized:
/// a second writer blocks in [`KvEngine::txn_begin`] until the first one ends.
/// Beginning a second top-level writer on the thread that already holds one
/// therefore blocks forever.
///
/// # Example
///
/// ```rust
/// use dirstore_storage::{AccessMode, InMemoryEngine, KvEngine, PutFlags, TableFlags};
///
/// let engine = InMemoryEngine::new();
/// let table = engine.open_table("entries", TableFlags::UNIQUE).unwrap();
/// let txn = engine.txn_begin(None, AccessMode::ReadWrite).unwrap();
/// engine.put(txn, table, b"k", b"v", PutFlags::NONE).unwrap();
/// engine.txn_commit(txn).unwrap();
///
/// let read = engine.txn_begin(None, AccessMode::ReadOnly).unwrap();
/// assert_eq!(engine.get(read, table, b"k").unwrap(), Some(b"v".to_vec()));
/// engine.txn_abort(read);
/// ```
pub struct InMemoryEngine {
    tables: RwLock<Vec<TableMeta>>,
    committed: RwLock<Snapshot>,
    registry: Mutex<Registry>,
    writer: Mutex<Option<TxnHandle>>,
    writer_done: Condvar,
    sync: AtomicBool,
    closed: AtomicBool,
}

impl InMemoryEngine {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Vec::new()),
            committed: RwLock::new(Snapshot::default()),
            registry: Mutex::new(Registry::default()),
            writer: Mutex::new(None),
            writer_done: Condvar::new(),
            sync: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns whether commits are flushed to durable media.
    ///
    /// Informational only for an in-memory engine.
    #[must_use]
    pub fn sync_enabled(&self) -> bool {
        self.sync.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions currently open.
    #[must_use]
    pub fn open_transactions(&self) -> usize {
        self.registry.lock().txns.len()
    }

    /// Returns the number of cursors currently open.
    #[must_use]
    pub fn open_cursors(&self) -> usize {
        self.registry.lock().cursors.len()
    }

    /// Closes the engine. New tables and transactions are refused.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn flags(&self, table: TableHandle) -> StorageResult<TableFlags> {
        self.tables
            .read()
            .get(table.0 as usize)
            .map(|meta| meta.flags)
            .ok_or_else(|| StorageError::TableNotFound(table.to_string()))
    }

    fn release_writer(&self, txn: TxnHandle) {
        let mut writer = self.writer.lock();
        if *writer == Some(txn) {
            *writer = None;
            self.writer_done.notify_all();
        }
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryEngine")
            .field("tables", &self.tables.read().len())
            .field("sync", &self.sync_enabled())
            .finish_non_exhaustive()
    }
}

fn step_forward<'a>(rows: &'a Rows, cur: &[u8], idx: usize) -> Option<(&'a Vec<u8>, usize)> {
    if let Some((key, dups)) = rows.get_key_value(cur) {
        if idx + 1 < dups.len() {
            return Some((key, idx + 1));
        }
    }
    rows.range::<[u8], _>((Bound::Excluded(cur), Bound::Unbounded))
        .next()
        .map(|(key, _)| (key, 0))
}

fn step_back<'a>(rows: &'a Rows, cur: &[u8], idx: usize) -> Option<(&'a Vec<u8>, usize)> {
    if idx > 0 {
        if let Some((key, dups)) = rows.get_key_value(cur) {
            return Some((key, (idx - 1).min(dups.len() - 1)));
        }
    }
    rows.range::<[u8], _>((Bound::Unbounded, Bound::Excluded(cur)))
        .next_back()
        .map(|(key, dups)| (key, dups.len() - 1))
}

fn required_key(key: Option<&[u8]>, op: CursorOp) -> StorageResult<&[u8]> {
    key.ok_or_else(|| StorageError::InvalidArgument(format!("{op:?} requires a key")))
}

impl KvEngine for InMemoryEngine {
    fn open_table(&self, name: &str, flags: TableFlags) -> StorageResult<TableHandle> {
        self.ensure_open()?;
        let mut tables = self.tables.write();
        if let Some(idx) = tables.iter().position(|meta| meta.name == name) {
            return Ok(TableHandle(idx as u32));
        }
        tables.push(TableMeta {
            name: name.to_string(),
            flags,
        });
        let handle = TableHandle((tables.len() - 1) as u32);
        debug!(table = name, %handle, dup_sort = flags.dup_sort, "opened table");
        Ok(handle)
    }

    fn table_exists(&self, name: &str) -> bool {
        self.tables.read().iter().any(|meta| meta.name == name)
    }

    fn drop_table(&self, txn: TxnHandle, table: TableHandle) -> StorageResult<()> {
        self.flags(table)?;
        let mut registry = self.registry.lock();
        registry.writable(txn)?.view.clear_table(table);
        Ok(())
    }

    fn txn_begin(&self, parent: Option<TxnHandle>, mode: AccessMode) -> StorageResult<TxnHandle> {
        self.ensure_open()?;
        match parent {
            Some(parent) => {
                let mut registry = self.registry.lock();
                let parent_slot = registry.usable(parent)?;
                if !parent_slot.mode.is_write() {
                    return Err(StorageError::bad_transaction(format!(
                        "{parent} is read-only and cannot have children"
                    )));
                }
                let view = parent_slot.view.clone();
                let handle = registry.allocate_txn();
                registry.txns.insert(
                    handle,
                    TxnSlot {
                        parent: Some(parent),
                        child: None,
                        mode,
                        view,
                    },
                );
                if let Some(parent_slot) = registry.txns.get_mut(&parent) {
                    parent_slot.child = Some(handle);
                }
                trace!(%handle, %parent, "began child transaction");
                Ok(handle)
            }
            None => {
                let mut writer = self.writer.lock();
                if mode.is_write() {
                    while writer.is_some() {
                        self.writer_done.wait(&mut writer);
                    }
                }
                let mut registry = self.registry.lock();
                let handle = registry.allocate_txn();
                let view = self.committed.read().clone();
                registry.txns.insert(
                    handle,
                    TxnSlot {
                        parent: None,
                        child: None,
                        mode,
                        view,
                    },
                );
                if mode.is_write() {
                    *writer = Some(handle);
                }
                trace!(%handle, ?mode, "began transaction");
                Ok(handle)
            }
        }
    }

    fn txn_commit(&self, txn: TxnHandle) -> StorageResult<()> {
        let release = {
            let mut registry = self.registry.lock();
            registry.usable(txn)?;
            let Some(slot) = registry.txns.remove(&txn) else {
                return Err(StorageError::bad_transaction(format!("{txn} is not active")));
            };
            registry.close_cursors_of(txn);
            match slot.parent {
                Some(parent) => {
                    let parent_slot = registry.txns.get_mut(&parent).ok_or_else(|| {
                        StorageError::bad_transaction(format!("parent {parent} is gone"))
                    })?;
                    if slot.mode.is_write() {
                        parent_slot.view = slot.view;
                    }
                    parent_slot.child = None;
                    false
                }
                None if slot.mode.is_write() => {
                    *self.committed.write() = slot.view;
                    true
                }
                None => false,
            }
        };
        if release {
            self.release_writer(txn);
        }
        trace!(%txn, "committed transaction");
        Ok(())
    }

    fn txn_abort(&self, txn: TxnHandle) {
        let aborted = self.registry.lock().abort_tree(txn);
        if let Some(slot) = aborted {
            if slot.parent.is_none() && slot.mode.is_write() {
                self.release_writer(txn);
            }
            trace!(%txn, "aborted transaction");
        }
    }

    fn get(&self, txn: TxnHandle, table: TableHandle, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.flags(table)?;
        let registry = self.registry.lock();
        let slot = registry.usable(txn)?;
        Ok(slot
            .view
            .table(table)
            .rows
            .get(key)
            .and_then(|dups| dups.first())
            .cloned())
    }

    fn put(
        &self,
        txn: TxnHandle,
        table: TableHandle,
        key: &[u8],
        value: &[u8],
        flags: PutFlags,
    ) -> StorageResult<()> {
        let table_flags = self.flags(table)?;
        let mut registry = self.registry.lock();
        let slot = registry.writable(txn)?;
        if flags.no_overwrite && slot.view.table(table).rows.contains_key(key) {
            return Err(StorageError::KeyExists);
        }
        let dups = slot
            .view
            .table_mut(table)
            .rows
            .entry(key.to_vec())
            .or_default();
        if table_flags.dup_sort {
            let order = table_flags.dup_order;
            if let Err(pos) = dups.binary_search_by(|probe| order.compare(probe, value)) {
                dups.insert(pos, value.to_vec());
            }
        } else {
            dups.clear();
            dups.push(value.to_vec());
        }
        Ok(())
    }

    fn delete(
        &self,
        txn: TxnHandle,
        table: TableHandle,
        key: &[u8],
        value: Option<&[u8]>,
    ) -> StorageResult<bool> {
        self.flags(table)?;
        let mut registry = self.registry.lock();
        let slot = registry.writable(txn)?;
        if !slot.view.table(table).rows.contains_key(key) {
            return Ok(false);
        }
        let rows = &mut slot.view.table_mut(table).rows;
        let Some(value) = value else {
            return Ok(rows.remove(key).is_some());
        };
        let Some(dups) = rows.get_mut(key) else {
            return Ok(false);
        };
        let Some(pos) = dups.iter().position(|dup| dup.as_slice() == value) else {
            return Ok(false);
        };
        dups.remove(pos);
        if dups.is_empty() {
            rows.remove(key);
        }
        Ok(true)
    }

    fn cursor_open(&self, txn: TxnHandle, table: TableHandle) -> StorageResult<CursorHandle> {
        self.flags(table)?;
        let mut registry = self.registry.lock();
        registry.usable(txn)?;
        registry.next_cursor += 1;
        let handle = CursorHandle(registry.next_cursor);
        registry.cursors.insert(
            handle,
            CursorSlot {
                txn,
                table,
                position: None,
            },
        );
        Ok(handle)
    }

    fn cursor_get(
        &self,
        cursor: CursorHandle,
        key: Option<&[u8]>,
        op: CursorOp,
    ) -> StorageResult<Option<(Vec<u8>, Vec<u8>)>> {
        let mut registry = self.registry.lock();
        let Registry { txns, cursors, .. } = &mut *registry;
        let slot = cursors
            .get_mut(&cursor)
            .ok_or(StorageError::BadCursor(cursor.0))?;
        let txn_slot = txns
            .get(&slot.txn)
            .ok_or_else(|| StorageError::bad_transaction(format!("{} is not active", slot.txn)))?;
        let rows = &txn_slot.view.table(slot.table).rows;
        let position = slot.position.as_ref();

        let landed = match op {
            CursorOp::First => rows.iter().next().map(|(k, _)| (k, 0)),
            CursorOp::Last => rows.iter().next_back().map(|(k, dups)| (k, dups.len() - 1)),
            CursorOp::Set => {
                let key = required_key(key, op)?;
                rows.get_key_value(key).map(|(k, _)| (k, 0))
            }
            CursorOp::SetRange => {
                let key = required_key(key, op)?;
                rows.range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
                    .next()
                    .map(|(k, _)| (k, 0))
            }
            CursorOp::Next => match position {
                None => rows.iter().next().map(|(k, _)| (k, 0)),
                Some((cur, idx)) => step_forward(rows, cur, *idx),
            },
            CursorOp::NextDup => position.and_then(|(cur, idx)| {
                rows.get_key_value(cur.as_slice())
                    .filter(|(_, dups)| idx + 1 < dups.len())
                    .map(|(k, _)| (k, idx + 1))
            }),
            CursorOp::Prev => match position {
                None => rows.iter().next_back().map(|(k, dups)| (k, dups.len() - 1)),
                Some((cur, idx)) => step_back(rows, cur, *idx),
            },
        };

        let found = landed.and_then(|(k, idx)| {
            rows.get(k)
                .and_then(|dups| dups.get(idx))
                .map(|value| (k.clone(), idx, value.clone()))
        });
        match found {
            Some((k, idx, value)) => {
                slot.position = Some((k.clone(), idx));
                Ok(Some((k, value)))
            }
            None => {
                if matches!(
                    op,
                    CursorOp::First | CursorOp::Last | CursorOp::Set | CursorOp::SetRange
                ) {
                    slot.position = None;
                }
                Ok(None)
            }
        }
    }

    fn cursor_close(&self, cursor: CursorHandle) {
        self.registry.lock().cursors.remove(&cursor);
    }

    fn set_sync(&self, enabled: bool) {
        self.sync.store(enabled, Ordering::Relaxed);
        debug!(enabled, "engine sync on commit changed");
    }
}
