//! Backend over an ordered key-value engine.
//!
//! ## Tables (main database)
//!
//! | Table        | Key                    | Value                        |
//! |--------------|------------------------|------------------------------|
//! | `entry`      | encoded entry ID       | CBOR entry blob              |
//! | `seq`        | sequence name          | encoded next value           |
//! | `uniqkey`    | caller key             | caller value                 |
//! | `dupkey`     | caller key             | caller values (duplicates)   |
//! | `idx.<attr>` | index key              | encoded entry ID(s)          |
//! | `journal`    | encoded sequence       | CBOR change-log record       |
//!
//! The log database holds only its journal.

use super::{Backend, BackendContext};
use crate::codec;
use crate::config::BackendConfig;
use crate::dn;
use crate::entry::{Entry, Modification, NewEntry};
use crate::error::{CoreError, CoreResult};
use crate::index::{
    guid_value, unique_lookup, FilterComponent, IndexAccess, IndexCatalog, IndexDescriptor,
    IndexKey, IndexKind, IndexScanEngine, ScanOutcome, ATTR_ENTRY_DN, ATTR_OBJECT_GUID,
    ATTR_PARENT_ID, FORWARD_TAG,
};
use crate::stats::{BackendStats, StatsSnapshot};
use crate::transaction::{
    with_read_txn, ChangeKind, ChangeLogRecord, TransactionContext, TransactionManager, TxnMode,
    TxnState, WriteTxnCounter,
};
use crate::types::{BackendId, Database, EntryId, Usn};
use dirstore_storage::{
    AccessMode, CursorHandle, CursorOp, DupOrder, KvEngine, PutFlags, StorageError, TableFlags,
    TableHandle, TxnHandle,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const ENTRY_TABLE: &str = "entry";
const SEQUENCE_TABLE: &str = "seq";
const UNIQUE_KEY_TABLE: &str = "uniqkey";
const DUP_KEY_TABLE: &str = "dupkey";

const ENTRY_ID_SEQUENCE: &[u8] = b"entryid";
const USN_SEQUENCE: &[u8] = b"usn";

/// Indexes every backend maintains; they cannot be deleted.
const BUILTIN_INDEXES: [&str; 3] = [ATTR_ENTRY_DN, ATTR_OBJECT_GUID, ATTR_PARENT_ID];

fn builtin_descriptors() -> [IndexDescriptor; 3] {
    [
        IndexDescriptor::new(ATTR_ENTRY_DN, &[IndexKind::Equality]).unique(),
        IndexDescriptor::new(ATTR_OBJECT_GUID, &[IndexKind::Equality]).unique(),
        IndexDescriptor::new(ATTR_PARENT_ID, &[IndexKind::OneLevelScope]),
    ]
}

struct Tables {
    entry: TableHandle,
    sequence: TableHandle,
    unique_key: TableHandle,
    dup_key: TableHandle,
}

/// Directory backend over a main and a log [`KvEngine`].
pub struct MdbBackend {
    id: BackendId,
    config: BackendConfig,
    engine: Arc<dyn KvEngine>,
    catalog: Arc<dyn IndexCatalog>,
    txns: TransactionManager,
    scanner: IndexScanEngine,
    stats: Arc<BackendStats>,
    tables: Tables,
    is_open: RwLock<bool>,
}

impl MdbBackend {
    /// Opens a backend over the main and log engines.
    ///
    /// Opens the backend's tables, registers the built-in indexes in
    /// `catalog` (keeping descriptors already there), binds every catalog
    /// index to its table, and seeds the entry ID and USN sequences of a
    /// fresh database.
    ///
    /// `counter` is shared with everything else that tracks outstanding
    /// write transactions.
    ///
    /// # Errors
    ///
    /// Returns an error if a table cannot be opened or seeded.
    pub fn open(
        config: BackendConfig,
        main: Arc<dyn KvEngine>,
        log: Arc<dyn KvEngine>,
        catalog: Arc<dyn IndexCatalog>,
        counter: Arc<WriteTxnCounter>,
    ) -> CoreResult<Self> {
        let id = BackendId::allocate();
        let stats = Arc::new(BackendStats::new());
        let txns = TransactionManager::new(
            id,
            Arc::clone(&main),
            Arc::clone(&log),
            counter,
            Arc::clone(&stats),
            config.max_user_txn_duration,
        )?;

        let tables = Tables {
            entry: main.open_table(ENTRY_TABLE, TableFlags::UNIQUE)?,
            sequence: main.open_table(SEQUENCE_TABLE, TableFlags::UNIQUE)?,
            unique_key: main.open_table(UNIQUE_KEY_TABLE, TableFlags::UNIQUE)?,
            dup_key: main.open_table(DUP_KEY_TABLE, TableFlags::dup_sort(DupOrder::Lexicographic))?,
        };

        for descriptor in builtin_descriptors() {
            if catalog.lookup(descriptor.attr()).is_none() {
                catalog.register(Arc::new(descriptor));
            }
        }
        for descriptor in catalog.descriptors() {
            bind_index(main.as_ref(), &descriptor)?;
        }

        main.set_sync(config.sync_on_commit);
        log.set_sync(config.sync_on_commit);

        let scanner = IndexScanEngine::new(
            Arc::clone(&main),
            Arc::clone(&catalog),
            Arc::clone(&stats),
            config.bounded_range_walk,
        );
        let backend = Self {
            id,
            config,
            engine: main,
            catalog,
            txns,
            scanner,
            stats,
            tables,
            is_open: RwLock::new(true),
        };
        backend.seed_sequences()?;

        info!(
            backend = %id,
            indexes = backend.catalog.descriptors().len(),
            "backend opened"
        );
        Ok(backend)
    }

    fn seed_sequences(&self) -> CoreResult<()> {
        let mut ctx = BackendContext::default();
        self.in_write_txn(&mut ctx, |txn, _| {
            for (key, initial) in [
                (ENTRY_ID_SEQUENCE, self.config.initial_entry_id),
                (USN_SEQUENCE, self.config.initial_usn),
            ] {
                if self.engine.get(txn, self.tables.sequence, key)?.is_none() {
                    self.engine
                        .put(txn, self.tables.sequence, key, &codec::encode(initial), PutFlags::NONE)?;
                }
            }
            Ok(())
        })
    }

    /// Creates a context for a new connection, using the configured
    /// size-limit scan cap.
    #[must_use]
    pub fn new_context(&self) -> BackendContext {
        BackendContext::new(self.config.max_scan_for_size_limit)
    }

    /// Returns this backend's identity.
    #[must_use]
    pub const fn id(&self) -> BackendId {
        self.id
    }

    /// Returns the configuration the backend was opened with.
    #[must_use]
    pub const fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Returns the transaction manager.
    #[must_use]
    pub const fn transactions(&self) -> &TransactionManager {
        &self.txns
    }

    /// Returns a snapshot of the backend counters.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns whether the backend accepts work.
    #[must_use]
    pub fn is_open(&self) -> bool {
        *self.is_open.read()
    }

    /// Reads the committed change log of a database.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read.
    pub fn read_journal(&self, database: Database) -> CoreResult<Vec<(u64, ChangeLogRecord)>> {
        self.ensure_open()?;
        self.txns.read_journal(database)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if *self.is_open.read() {
            Ok(())
        } else {
            Err(CoreError::BackendClosed)
        }
    }

    // ========================================================================
    // Transaction plumbing
    // ========================================================================

    fn in_read_txn<T>(
        &self,
        ctx: &BackendContext,
        op: impl FnOnce(TxnHandle) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.ensure_open()?;
        with_read_txn(self.engine.as_ref(), ctx.txns().main().active_handle(), op)
    }

    /// Begins on one database with the context's client transaction id. A
    /// refusal that discards the user transaction also clears that id.
    fn begin_in(
        &self,
        ctx: &mut BackendContext,
        database: Database,
        mode: TxnMode,
    ) -> CoreResult<bool> {
        let client_txn_id = ctx.client_txn_id.clone();
        let result = self
            .txns
            .begin(ctx.txns.context_mut(database), mode, client_txn_id.as_deref());
        if result.is_err()
            && database == Database::Main
            && ctx.txns.main().state() == TxnState::None
        {
            ctx.client_txn_id = None;
        }
        result
    }

    /// Runs `op` inside the context's write transaction, opening one (and
    /// ending it with the result) when the context has none.
    fn in_write_txn<T>(
        &self,
        ctx: &mut BackendContext,
        op: impl FnOnce(TxnHandle, &mut TransactionContext) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.ensure_open()?;
        let began = self.begin_in(ctx, Database::Main, TxnMode::Write)?;
        let txn_ctx = ctx.txns.context_mut(Database::Main);
        let Some(txn) = txn_ctx.active_handle() else {
            if began {
                self.txns.abort(txn_ctx);
            }
            return Err(CoreError::invalid_operation("no write transaction is open"));
        };

        let result = op(txn, txn_ctx);
        if began {
            match &result {
                Ok(_) => self.txns.commit(txn_ctx)?,
                Err(_) => self.txns.abort(txn_ctx),
            }
        }
        result
    }

    fn read_sequence(&self, txn: TxnHandle, name: &[u8]) -> CoreResult<u64> {
        let bytes = self
            .engine
            .get(txn, self.tables.sequence, name)?
            .ok_or_else(|| {
                CoreError::invalid_format(format!(
                    "sequence {} is missing",
                    String::from_utf8_lossy(name)
                ))
            })?;
        codec::decode(&bytes)
    }

    /// Returns the sequence's current value and stores the next one.
    fn advance_sequence(&self, txn: TxnHandle, name: &[u8]) -> CoreResult<u64> {
        let current = self.read_sequence(txn, name)?;
        self.engine.put(
            txn,
            self.tables.sequence,
            name,
            &codec::encode(current + 1),
            PutFlags::NONE,
        )?;
        Ok(current)
    }

    // ========================================================================
    // Entry storage
    // ========================================================================

    fn try_load_entry(&self, txn: TxnHandle, eid: EntryId) -> CoreResult<Option<Entry>> {
        self.engine
            .get(txn, self.tables.entry, &eid.to_key())?
            .map(|blob| Entry::decode(&blob))
            .transpose()
    }

    fn load_entry(&self, txn: TxnHandle, eid: EntryId) -> CoreResult<Entry> {
        self.try_load_entry(txn, eid)?
            .ok_or_else(|| CoreError::entry_not_found(eid.to_string()))
    }

    fn resolve_dn(&self, txn: TxnHandle, normalized_dn: &str) -> CoreResult<EntryId> {
        unique_lookup(
            self.engine.as_ref(),
            self.catalog.as_ref(),
            txn,
            ATTR_ENTRY_DN,
            normalized_dn.as_bytes(),
        )?
        .ok_or_else(|| CoreError::entry_not_found(format!("dn \"{normalized_dn}\"")))
    }

    fn has_children(&self, txn: TxnHandle, eid: EntryId) -> CoreResult<bool> {
        let children = self.catalog.lookup(ATTR_PARENT_ID).ok_or_else(|| {
            CoreError::invalid_operation(format!("index {ATTR_PARENT_ID} is not available"))
        })?;
        Ok(self.engine.get(txn, children.table()?, &eid.to_key())?.is_some())
    }

    // ========================================================================
    // Index maintenance
    // ========================================================================

    fn writable_indexes(&self) -> Vec<Arc<IndexDescriptor>> {
        self.catalog
            .descriptors()
            .into_iter()
            .filter(|descriptor| descriptor.permits(IndexAccess::Write))
            .collect()
    }

    fn insert_keys<'k>(
        &self,
        txn: TxnHandle,
        descriptor: &IndexDescriptor,
        keys: impl IntoIterator<Item = &'k Vec<u8>>,
        entry: &Entry,
    ) -> CoreResult<()> {
        let table = descriptor.table()?;
        let eid = entry.eid.to_key();
        let flags = if descriptor.is_unique() {
            PutFlags::NO_OVERWRITE
        } else {
            PutFlags::NONE
        };
        for key in keys {
            match self.engine.put(txn, table, key, &eid, flags) {
                Ok(()) => {}
                Err(StorageError::KeyExists) => {
                    if self.engine.get(txn, table, key)?.as_deref() == Some(eid.as_slice()) {
                        continue;
                    }
                    return Err(if descriptor.attr() == ATTR_ENTRY_DN {
                        CoreError::EntryExists {
                            dn: entry.normalized_dn.clone(),
                        }
                    } else {
                        CoreError::constraint(format!(
                            "{} value is already used by another entry",
                            descriptor.attr()
                        ))
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn remove_keys<'k>(
        &self,
        txn: TxnHandle,
        descriptor: &IndexDescriptor,
        keys: impl IntoIterator<Item = &'k Vec<u8>>,
        eid: EntryId,
    ) -> CoreResult<()> {
        let table = descriptor.table()?;
        let eid = eid.to_key();
        for key in keys {
            self.engine.delete(txn, table, key, Some(&eid))?;
        }
        Ok(())
    }

    // ========================================================================
    // Iterators
    // ========================================================================

    /// Iterates the forward keys of an index from `initial_value` on,
    /// yielding each value with one entry ID.
    ///
    /// The iterator reads the state committed when it was created.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` if the index is not readable or has no
    /// forward keys.
    pub fn index_iterator(&self, attr: &str, initial_value: &str) -> CoreResult<IndexIterator> {
        self.ensure_open()?;
        let descriptor = self
            .catalog
            .acquire(attr, IndexAccess::Read)
            .ok_or_else(|| CoreError::invalid_operation(format!("index {attr} is not readable")))?;
        if !has_forward_keys(&descriptor) {
            return Err(CoreError::invalid_operation(format!(
                "index {attr} has no value keys"
            )));
        }
        let table = descriptor.table()?;
        let txn = self.engine.txn_begin(None, AccessMode::ReadOnly)?;
        let cursor = match self.engine.cursor_open(txn, table) {
            Ok(cursor) => cursor,
            Err(e) => {
                self.engine.txn_abort(txn);
                return Err(e.into());
            }
        };
        Ok(IndexIterator {
            engine: Arc::clone(&self.engine),
            txn,
            cursor,
            start: Some(IndexKey::forward(initial_value).to_bytes()),
            done: false,
        })
    }

    /// Iterates stored entry blobs in entry ID order from `start` on.
    ///
    /// The iterator reads the state committed when it was created.
    ///
    /// # Errors
    ///
    /// Returns an error if the read transaction cannot be opened.
    pub fn entry_blob_iterator(&self, start: EntryId) -> CoreResult<EntryBlobIterator> {
        self.ensure_open()?;
        let txn = self.engine.txn_begin(None, AccessMode::ReadOnly)?;
        let end = match self.read_sequence(txn, ENTRY_ID_SEQUENCE) {
            Ok(end) => end,
            Err(e) => {
                self.engine.txn_abort(txn);
                return Err(e);
            }
        };
        Ok(EntryBlobIterator {
            engine: Arc::clone(&self.engine),
            table: self.tables.entry,
            txn,
            next: start.as_u64(),
            end,
        })
    }
}

fn bind_index(engine: &dyn KvEngine, descriptor: &IndexDescriptor) -> CoreResult<()> {
    let table = engine.open_table(&descriptor.table_name(), descriptor.table_flags())?;
    descriptor.bind_table(table);
    Ok(())
}

fn has_forward_keys(descriptor: &IndexDescriptor) -> bool {
    [IndexKind::Equality, IndexKind::Range, IndexKind::Substring]
        .into_iter()
        .any(|kind| descriptor.supports(kind))
}

/// Values an index stores for an entry, normalized.
fn index_values(attr: &str, entry: &Entry) -> Vec<String> {
    match attr {
        ATTR_ENTRY_DN => vec![entry.normalized_dn.clone()],
        ATTR_OBJECT_GUID => vec![guid_value(&entry.object_guid)],
        _ => entry.values(attr).iter().map(|value| value.to_lowercase()).collect(),
    }
}

/// Keys an index holds for an entry.
fn index_keys(descriptor: &IndexDescriptor, entry: &Entry) -> BTreeSet<Vec<u8>> {
    let mut keys = BTreeSet::new();
    if descriptor.attr() == ATTR_PARENT_ID {
        if entry.parent_id != EntryId::NONE {
            keys.insert(entry.parent_id.to_key());
        }
        return keys;
    }
    let forward = has_forward_keys(descriptor);
    let reverse = descriptor.supports(IndexKind::Substring);
    for value in index_values(descriptor.attr(), entry) {
        if forward {
            keys.insert(IndexKey::forward(&value).to_bytes());
        }
        if reverse {
            keys.insert(IndexKey::reverse(&value).to_bytes());
        }
    }
    keys
}

fn is_operational(attr: &str) -> bool {
    BUILTIN_INDEXES.contains(&attr.to_ascii_lowercase().as_str())
}

/// Lowercases attribute names, drops duplicate values and empty attributes.
fn normalize_attributes(
    attributes: BTreeMap<String, Vec<String>>,
) -> CoreResult<BTreeMap<String, Vec<String>>> {
    let mut normalized: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (attr, values) in attributes {
        if is_operational(&attr) {
            return Err(CoreError::unwilling(format!(
                "{attr} is maintained by the backend"
            )));
        }
        let current = normalized.entry(attr.to_ascii_lowercase()).or_default();
        for value in values {
            if !current.contains(&value) {
                current.push(value);
            }
        }
    }
    normalized.retain(|_, values| !values.is_empty());
    Ok(normalized)
}

impl Backend for MdbBackend {
    fn txn_begin(
        &self,
        ctx: &mut BackendContext,
        database: Database,
        mode: TxnMode,
    ) -> CoreResult<bool> {
        self.ensure_open()?;
        self.begin_in(ctx, database, mode)
    }

    fn txn_commit(&self, ctx: &mut BackendContext, database: Database) -> CoreResult<()> {
        self.txns.commit(ctx.txns.context_mut(database))
    }

    fn txn_abort(&self, ctx: &mut BackendContext, database: Database) {
        self.txns.abort(ctx.txns.context_mut(database));
    }

    fn begin_user_txn(&self, ctx: &mut BackendContext, id: &str) -> CoreResult<()> {
        self.ensure_open()?;
        self.txns
            .declare_user_txn(ctx.txns.context_mut(Database::Main), id)?;
        ctx.client_txn_id = Some(id.to_string());
        Ok(())
    }

    fn commit_user_txn(&self, ctx: &mut BackendContext) -> CoreResult<()> {
        let id = ctx
            .client_txn_id
            .clone()
            .ok_or_else(|| CoreError::unwilling("no user transaction in progress"))?;
        let result = self
            .txns
            .commit_user_txn(ctx.txns.context_mut(Database::Main), &id);
        if ctx.txns.main().state() == TxnState::None {
            ctx.client_txn_id = None;
        }
        result
    }

    fn abort_user_txn(&self, ctx: &mut BackendContext) -> CoreResult<()> {
        let id = ctx
            .client_txn_id
            .take()
            .ok_or_else(|| CoreError::unwilling("no user transaction in progress"))?;
        self.txns
            .abort_user_txn(ctx.txns.context_mut(Database::Main), &id)
    }

    fn abort_all(&self, ctx: &mut BackendContext) {
        self.txns.abort_all(&mut ctx.txns);
        ctx.client_txn_id = None;
    }

    fn get_candidates(
        &self,
        ctx: &BackendContext,
        filter: &FilterComponent,
        floor: EntryId,
    ) -> CoreResult<ScanOutcome> {
        self.ensure_open()?;
        self.scanner.get_candidates(
            ctx.txns().main().active_handle(),
            filter,
            floor,
            ctx.max_scan_for_size_limit(),
        )
    }

    fn dn_to_entry_id(&self, ctx: &BackendContext, dn: &str) -> CoreResult<EntryId> {
        self.ensure_open()?;
        self.scanner
            .dn_to_entry_id(ctx.txns().main().active_handle(), &dn::normalize(dn))
    }

    fn object_guid_to_entry_id(&self, ctx: &BackendContext, guid: &Uuid) -> CoreResult<EntryId> {
        self.ensure_open()?;
        self.scanner
            .object_guid_to_entry_id(ctx.txns().main().active_handle(), guid)
    }

    fn id_to_entry(&self, ctx: &BackendContext, eid: EntryId) -> CoreResult<Entry> {
        self.in_read_txn(ctx, |txn| self.load_entry(txn, eid))
    }

    fn dn_to_entry(&self, ctx: &BackendContext, dn: &str) -> CoreResult<Entry> {
        let normalized = dn::normalize(dn);
        self.in_read_txn(ctx, |txn| {
            let eid = self.scanner.dn_to_entry_id(Some(txn), &normalized)?;
            self.load_entry(txn, eid)
        })
    }

    fn add_entry(&self, ctx: &mut BackendContext, entry: NewEntry) -> CoreResult<EntryId> {
        let normalized = dn::normalize(&entry.dn);
        let attributes = normalize_attributes(entry.attributes)?;
        let display_dn = entry.dn.trim().to_string();
        let object_guid = entry.object_guid.unwrap_or_else(Uuid::new_v4);

        let eid = self.in_write_txn(ctx, |txn, txn_ctx| {
            if unique_lookup(
                self.engine.as_ref(),
                self.catalog.as_ref(),
                txn,
                ATTR_ENTRY_DN,
                normalized.as_bytes(),
            )?
            .is_some()
            {
                return Err(CoreError::EntryExists {
                    dn: normalized.clone(),
                });
            }

            let (eid, parent_id) = match dn::parent(&normalized) {
                None => (EntryId::DSE_ROOT, EntryId::NONE),
                Some(parent_dn) => {
                    // entries directly under the root DSE need no stored parent
                    let parent_id = if parent_dn.is_empty() {
                        EntryId::DSE_ROOT
                    } else {
                        match self.resolve_dn(txn, parent_dn) {
                            Ok(parent_id) => parent_id,
                            Err(e) if e.is_not_found() => {
                                return Err(CoreError::ParentNotFound {
                                    dn: normalized.clone(),
                                })
                            }
                            Err(e) => return Err(e),
                        }
                    };
                    let eid = EntryId::new(self.advance_sequence(txn, ENTRY_ID_SEQUENCE)?);
                    (eid, parent_id)
                }
            };
            let usn = Usn::new(self.advance_sequence(txn, USN_SEQUENCE)?);

            let entry = Entry {
                eid,
                dn: display_dn,
                normalized_dn: normalized.clone(),
                parent_id,
                object_guid,
                usn_created: usn,
                usn_changed: usn,
                attributes,
            };
            match self.engine.put(
                txn,
                self.tables.entry,
                &eid.to_key(),
                &entry.encode()?,
                PutFlags::NO_OVERWRITE,
            ) {
                Ok(()) => {}
                Err(StorageError::KeyExists) => {
                    return Err(CoreError::EntryExists {
                        dn: normalized.clone(),
                    })
                }
                Err(e) => return Err(e.into()),
            }
            for descriptor in self.writable_indexes() {
                let keys = index_keys(&descriptor, &entry);
                self.insert_keys(txn, &descriptor, &keys, &entry)?;
            }

            txn_ctx.queue_change(ChangeLogRecord::new(usn, eid, ChangeKind::Add, normalized.clone()));
            Ok(eid)
        })?;

        self.stats.record_entry_added();
        debug!(%eid, dn = %normalized, "added entry");
        Ok(eid)
    }

    fn modify_entry(
        &self,
        ctx: &mut BackendContext,
        dn: &str,
        modifications: &[Modification],
    ) -> CoreResult<()> {
        if let Some(modification) = modifications.iter().find(|m| is_operational(&m.attr)) {
            return Err(CoreError::unwilling(format!(
                "{} is maintained by the backend",
                modification.attr
            )));
        }
        let normalized = dn::normalize(dn);
        let touched: BTreeSet<String> = modifications
            .iter()
            .map(|m| m.attr.to_ascii_lowercase())
            .collect();

        let eid = self.in_write_txn(ctx, |txn, txn_ctx| {
            let eid = self.resolve_dn(txn, &normalized)?;
            let before = self.load_entry(txn, eid)?;
            let mut entry = before.clone();
            for modification in modifications {
                let mut modification = modification.clone();
                modification.attr.make_ascii_lowercase();
                modification.apply(&mut entry.attributes);
            }
            let usn = Usn::new(self.advance_sequence(txn, USN_SEQUENCE)?);
            entry.usn_changed = usn;

            for descriptor in self.writable_indexes() {
                if !touched.contains(descriptor.attr()) {
                    continue;
                }
                let old = index_keys(&descriptor, &before);
                let new = index_keys(&descriptor, &entry);
                self.remove_keys(txn, &descriptor, old.difference(&new), eid)?;
                self.insert_keys(txn, &descriptor, new.difference(&old), &entry)?;
            }
            self.engine.put(
                txn,
                self.tables.entry,
                &eid.to_key(),
                &entry.encode()?,
                PutFlags::NONE,
            )?;

            txn_ctx.queue_change(ChangeLogRecord::new(usn, eid, ChangeKind::Modify, normalized.clone()));
            Ok(eid)
        })?;

        self.stats.record_entry_modified();
        debug!(%eid, dn = %normalized, count = modifications.len(), "modified entry");
        Ok(())
    }

    fn delete_entry(&self, ctx: &mut BackendContext, dn: &str) -> CoreResult<()> {
        let normalized = dn::normalize(dn);
        let eid = self.in_write_txn(ctx, |txn, txn_ctx| {
            let eid = self.resolve_dn(txn, &normalized)?;
            if self.has_children(txn, eid)? {
                return Err(CoreError::NotAllowedOnNonLeaf {
                    dn: normalized.clone(),
                });
            }
            let entry = self.load_entry(txn, eid)?;
            for descriptor in self.writable_indexes() {
                let keys = index_keys(&descriptor, &entry);
                self.remove_keys(txn, &descriptor, &keys, eid)?;
            }
            self.engine.delete(txn, self.tables.entry, &eid.to_key(), None)?;
            let usn = Usn::new(self.advance_sequence(txn, USN_SEQUENCE)?);

            txn_ctx.queue_change(ChangeLogRecord::new(usn, eid, ChangeKind::Delete, normalized.clone()));
            Ok(eid)
        })?;

        self.stats.record_entry_deleted();
        debug!(%eid, dn = %normalized, "deleted entry");
        Ok(())
    }

    fn is_leaf(&self, ctx: &BackendContext, eid: EntryId) -> CoreResult<bool> {
        self.in_read_txn(ctx, |txn| Ok(!self.has_children(txn, eid)?))
    }

    fn max_entry_id(&self, ctx: &BackendContext) -> CoreResult<Option<EntryId>> {
        self.in_read_txn(ctx, |txn| {
            let next = self.read_sequence(txn, ENTRY_ID_SEQUENCE)?;
            Ok((next > self.config.initial_entry_id).then(|| EntryId::new(next - 1)))
        })
    }

    fn next_usn(&self, ctx: &mut BackendContext) -> CoreResult<Usn> {
        self.in_write_txn(ctx, |txn, _| {
            self.advance_sequence(txn, USN_SEQUENCE).map(Usn::new)
        })
    }

    fn index_open(&self, descriptor: IndexDescriptor) -> CoreResult<Arc<IndexDescriptor>> {
        self.ensure_open()?;
        if let Some(existing) = self.catalog.lookup(descriptor.attr()) {
            debug!(attr = existing.attr(), "index already open");
            return Ok(existing);
        }
        bind_index(self.engine.as_ref(), &descriptor)?;
        let descriptor = Arc::new(descriptor);
        self.catalog.register(Arc::clone(&descriptor));
        info!(
            attr = descriptor.attr(),
            kinds = ?descriptor.kinds(),
            status = ?descriptor.status(),
            "opened index"
        );
        Ok(descriptor)
    }

    fn index_exists(&self, attr: &str) -> bool {
        self.catalog.lookup(attr).is_some()
    }

    fn index_delete(&self, ctx: &mut BackendContext, attr: &str) -> CoreResult<()> {
        let attr = attr.to_ascii_lowercase();
        if BUILTIN_INDEXES.contains(&attr.as_str()) {
            return Err(CoreError::unwilling(format!("index {attr} is built in")));
        }
        let descriptor = self
            .catalog
            .lookup(&attr)
            .ok_or_else(|| CoreError::entry_not_found(format!("index {attr}")))?;
        // one reference held by the catalog, one by this call
        if Arc::strong_count(&descriptor) > 2 {
            warn!(attr = %attr, "refusing to delete an index in use");
            return Err(CoreError::unwilling(format!("index {attr} is in use")));
        }
        let table = descriptor.table()?;
        self.in_write_txn(ctx, |txn, _| Ok(self.engine.drop_table(txn, table)?))?;
        self.catalog.remove(&attr);
        info!(attr = %attr, "deleted index");
        Ok(())
    }

    fn index_populate(
        &self,
        ctx: &mut BackendContext,
        attrs: &[&str],
        start: EntryId,
        batch: usize,
    ) -> CoreResult<Option<EntryId>> {
        let descriptors = attrs
            .iter()
            .map(|attr| {
                self.catalog
                    .acquire(attr, IndexAccess::Write)
                    .ok_or_else(|| CoreError::invalid_operation(format!("index {attr} is not writable")))
            })
            .collect::<CoreResult<Vec<_>>>()?;

        self.in_write_txn(ctx, |txn, _| {
            let end = self.read_sequence(txn, ENTRY_ID_SEQUENCE)?;
            let mut next = start.as_u64().max(EntryId::DSE_ROOT.as_u64());
            let mut indexed = 0usize;
            while next < end && (batch == 0 || indexed < batch) {
                if let Some(entry) = self.try_load_entry(txn, EntryId::new(next))? {
                    for descriptor in &descriptors {
                        let keys = index_keys(descriptor, &entry);
                        self.insert_keys(txn, descriptor, &keys, &entry)?;
                    }
                    indexed += 1;
                }
                next += 1;
            }
            debug!(attrs = ?attrs, indexed, next, "populated index batch");
            Ok((next < end).then(|| EntryId::new(next)))
        })
    }

    fn unique_key_get(&self, ctx: &BackendContext, key: &[u8]) -> CoreResult<Option<Vec<u8>>> {
        self.in_read_txn(ctx, |txn| Ok(self.engine.get(txn, self.tables.unique_key, key)?))
    }

    fn unique_key_set(&self, ctx: &mut BackendContext, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.in_write_txn(ctx, |txn, _| {
            Ok(self
                .engine
                .put(txn, self.tables.unique_key, key, value, PutFlags::NONE)?)
        })
    }

    fn dup_key_get(&self, ctx: &BackendContext, key: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
        self.in_read_txn(ctx, |txn| {
            let cursor = self.engine.cursor_open(txn, self.tables.dup_key)?;
            let result = collect_duplicates(self.engine.as_ref(), cursor, key);
            self.engine.cursor_close(cursor);
            result
        })
    }

    fn dup_key_set(&self, ctx: &mut BackendContext, key: &[u8], value: &[u8]) -> CoreResult<()> {
        self.in_write_txn(ctx, |txn, _| {
            Ok(self
                .engine
                .put(txn, self.tables.dup_key, key, value, PutFlags::NONE)?)
        })
    }

    fn configure_fsync(&self, enabled: bool) {
        self.txns.engine(Database::Main).set_sync(enabled);
        self.txns.engine(Database::Log).set_sync(enabled);
        info!(backend = %self.id, enabled, "configured fsync");
    }

    fn shutdown(&self) {
        let mut is_open = self.is_open.write();
        if *is_open {
            *is_open = false;
            info!(
                backend = %self.id,
                outstanding_writes = self.txns.counter().outstanding(),
                "backend shut down"
            );
        }
    }
}

fn collect_duplicates(
    engine: &dyn KvEngine,
    cursor: CursorHandle,
    key: &[u8],
) -> CoreResult<Vec<Vec<u8>>> {
    let mut values = Vec::new();
    let mut next = engine.cursor_get(cursor, Some(key), CursorOp::Set)?;
    while let Some((_, value)) = next {
        values.push(value);
        next = engine.cursor_get(cursor, None, CursorOp::NextDup)?;
    }
    Ok(values)
}

impl fmt::Debug for MdbBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdbBackend")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("is_open", &self.is_open())
            .finish_non_exhaustive()
    }
}

/// Walks the forward keys of one index. See [`MdbBackend::index_iterator`].
pub struct IndexIterator {
    engine: Arc<dyn KvEngine>,
    txn: TxnHandle,
    cursor: CursorHandle,
    start: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for IndexIterator {
    type Item = CoreResult<(String, EntryId)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = match self.start.take() {
            Some(key) => self.engine.cursor_get(self.cursor, Some(&key), CursorOp::SetRange),
            None => self.engine.cursor_get(self.cursor, None, CursorOp::Next),
        };
        match step {
            Ok(Some((key, eid))) if key.first() == Some(&FORWARD_TAG) => {
                let value = String::from_utf8_lossy(&key[1..]).into_owned();
                Some(EntryId::from_key(&eid).map(|eid| (value, eid)))
            }
            Ok(_) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

impl Drop for IndexIterator {
    fn drop(&mut self) {
        self.engine.cursor_close(self.cursor);
        self.engine.txn_abort(self.txn);
    }
}

impl fmt::Debug for IndexIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexIterator")
            .field("txn", &self.txn)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// Walks stored entry blobs. See [`MdbBackend::entry_blob_iterator`].
pub struct EntryBlobIterator {
    engine: Arc<dyn KvEngine>,
    table: TableHandle,
    txn: TxnHandle,
    next: u64,
    end: u64,
}

impl Iterator for EntryBlobIterator {
    type Item = CoreResult<(EntryId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.end {
            let eid = EntryId::new(self.next);
            self.next += 1;
            match self.engine.get(self.txn, self.table, &eid.to_key()) {
                Ok(Some(blob)) => return Some(Ok((eid, blob))),
                Ok(None) => {}
                Err(e) => {
                    self.next = self.end;
                    return Some(Err(e.into()));
                }
            }
        }
        None
    }
}

impl Drop for EntryBlobIterator {
    fn drop(&mut self) {
        self.engine.txn_abort(self.txn);
    }
}

impl fmt::Debug for EntryBlobIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryBlobIterator")
            .field("next", &self.next)
            .field("end", &self.end)
            .finish_non_exhaustive()
    }
}
