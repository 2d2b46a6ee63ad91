//! Transaction manager.

use crate::error::{CoreError, CoreResult};
use crate::stats::BackendStats;
use crate::transaction::context::{ThreadTxnState, TransactionContext, TxnMode, TxnState};
use crate::transaction::counter::WriteTxnCounter;
use crate::transaction::journal::{self, ChangeLogRecord, JOURNAL_TABLE};
use crate::transaction::local::with_read_txn;
use crate::types::{BackendId, Database};
use dirstore_storage::{AccessMode, KvEngine, TableFlags, TableHandle, TxnHandle};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

struct DatabaseHandles {
    engine: Arc<dyn KvEngine>,
    journal: TableHandle,
}

impl DatabaseHandles {
    fn open(engine: Arc<dyn KvEngine>) -> CoreResult<Self> {
        let journal = engine.open_table(JOURNAL_TABLE, TableFlags::UNIQUE)?;
        Ok(Self { engine, journal })
    }
}

/// Drives [`TransactionContext`]s through the transaction state machine
/// for the main and log databases.
///
/// ## Main database
///
/// - `None` + Begin without a client transaction id opens a standalone
///   operation transaction (`OpInProgress`).
/// - `None`/`PendingStart` + Begin with a client transaction id opens a
///   read-write parent plus an operation child (`UserInProgress`).
/// - `UserInProgress` + Begin opens a fresh child if none is open.
/// - `OpInProgress` + Begin passes through; a read-to-write upgrade is
///   refused.
/// - Commit and Abort end the child when one is open, otherwise the
///   top-level transaction.
///
/// ## Log database
///
/// Only `None` and `OpInProgress`: one top-level transaction per operation.
///
/// Every top-level write begin, commit, and abort runs with the shared
/// [`WriteTxnCounter`] raised.
pub struct TransactionManager {
    backend: BackendId,
    main: DatabaseHandles,
    log: DatabaseHandles,
    counter: Arc<WriteTxnCounter>,
    stats: Arc<BackendStats>,
    max_user_txn_duration: Duration,
}

impl TransactionManager {
    /// Creates a manager over the two engines, opening their journal tables.
    ///
    /// # Errors
    ///
    /// Returns an error if a journal table cannot be opened.
    pub fn new(
        backend: BackendId,
        main: Arc<dyn KvEngine>,
        log: Arc<dyn KvEngine>,
        counter: Arc<WriteTxnCounter>,
        stats: Arc<BackendStats>,
        max_user_txn_duration: Duration,
    ) -> CoreResult<Self> {
        Ok(Self {
            backend,
            main: DatabaseHandles::open(main)?,
            log: DatabaseHandles::open(log)?,
            counter,
            stats,
            max_user_txn_duration,
        })
    }

    /// Returns the identity recorded on transactions this manager opens.
    #[must_use]
    pub const fn backend_id(&self) -> BackendId {
        self.backend
    }

    /// Returns the shared write-transaction counter.
    #[must_use]
    pub fn counter(&self) -> &Arc<WriteTxnCounter> {
        &self.counter
    }

    /// Returns the engine behind a database.
    #[must_use]
    pub fn engine(&self, database: Database) -> &Arc<dyn KvEngine> {
        &self.handles(database).engine
    }

    fn handles(&self, database: Database) -> &DatabaseHandles {
        match database {
            Database::Main => &self.main,
            Database::Log => &self.log,
        }
    }

    /// Begins (or joins) a transaction on the context's database.
    ///
    /// Returns `true` when this call opened a new engine transaction; only
    /// then should the caller commit or abort it.
    ///
    /// # Errors
    ///
    /// - `Unwilling` on a read-to-write upgrade or a client transaction id
    ///   mismatch. Everything the context had open is aborted and the
    ///   context is left in `None`.
    /// - `Unwilling` on an expired user transaction or a context owned by
    ///   another backend. The context is left as it was; an expired user
    ///   transaction still has to be aborted by the caller.
    /// - Engine errors. Handles opened by this call are aborted first, and
    ///   a context that had nothing open is left in `None`.
    pub fn begin(
        &self,
        ctx: &mut TransactionContext,
        mode: TxnMode,
        client_txn_id: Option<&str>,
    ) -> CoreResult<bool> {
        let result = self.check_owner(ctx).and_then(|()| match ctx.database() {
            Database::Main => self.begin_main(ctx, mode, client_txn_id),
            Database::Log => self.begin_log(ctx, mode),
        });
        if let Err(e) = &result {
            if e.is_unwilling() {
                self.stats.record_unwilling();
                warn!(database = %ctx.database(), state = ?ctx.state(), error = %e, "refused transaction begin");
            }
        }
        result
    }

    fn begin_main(
        &self,
        ctx: &mut TransactionContext,
        mode: TxnMode,
        client_txn_id: Option<&str>,
    ) -> CoreResult<bool> {
        match ctx.state {
            TxnState::None => {
                match client_txn_id {
                    None => self.open_operation(ctx, mode)?,
                    Some(id) => self.open_user(ctx, id.to_string(), Instant::now())?,
                }
                Ok(true)
            }
            TxnState::PendingStart => {
                if let Err(e) = Self::check_client_txn_id(ctx, client_txn_id) {
                    return Err(self.discard(ctx, e));
                }
                self.check_expiry(ctx)?;
                let id = ctx.client_txn_id.clone().unwrap_or_default();
                let started = ctx.started_at.unwrap_or_else(Instant::now);
                self.open_user(ctx, id, started)?;
                Ok(true)
            }
            TxnState::UserInProgress => {
                if let Err(e) = Self::check_client_txn_id(ctx, client_txn_id) {
                    return Err(self.discard(ctx, e));
                }
                self.check_expiry(ctx)?;
                if ctx.child.is_some() {
                    return Ok(false);
                }
                let parent = ctx
                    .parent
                    .ok_or_else(|| CoreError::invalid_operation("user transaction has no parent"))?;
                let child = self
                    .main
                    .engine
                    .txn_begin(Some(parent), AccessMode::ReadWrite)?;
                self.stats.record_transaction_start();
                ctx.child = Some(child);
                debug!(%parent, %child, "began operation inside user transaction");
                Ok(true)
            }
            TxnState::OpInProgress => {
                if let Some(id) = client_txn_id {
                    let e = CoreError::unwilling(format!(
                        "client transaction {id} does not match the operation transaction in progress"
                    ));
                    return Err(self.discard(ctx, e));
                }
                if let Err(e) = Self::check_upgrade(ctx, mode) {
                    return Err(self.discard(ctx, e));
                }
                Ok(false)
            }
        }
    }

    fn begin_log(&self, ctx: &mut TransactionContext, mode: TxnMode) -> CoreResult<bool> {
        match ctx.state {
            TxnState::None => {
                self.open_operation(ctx, mode)?;
                Ok(true)
            }
            TxnState::OpInProgress => {
                if let Err(e) = Self::check_upgrade(ctx, mode) {
                    return Err(self.discard(ctx, e));
                }
                Ok(false)
            }
            state => Err(CoreError::invalid_operation(format!(
                "log database context cannot be in {state:?}"
            ))),
        }
    }

    fn check_owner(&self, ctx: &TransactionContext) -> CoreResult<()> {
        match ctx.owner {
            Some(owner) if owner != self.backend => Err(CoreError::unwilling(format!(
                "transaction context belongs to {owner}, not {}",
                self.backend
            ))),
            _ => Ok(()),
        }
    }

    fn check_client_txn_id(ctx: &TransactionContext, supplied: Option<&str>) -> CoreResult<()> {
        match supplied {
            None => Ok(()),
            Some(id) if ctx.client_txn_id.as_deref() == Some(id) => Ok(()),
            Some(id) => Err(CoreError::unwilling(format!(
                "client transaction {id} does not match user transaction {}",
                ctx.client_txn_id.as_deref().unwrap_or("<none>")
            ))),
        }
    }

    fn check_upgrade(ctx: &TransactionContext, mode: TxnMode) -> CoreResult<()> {
        if mode == TxnMode::Write && ctx.mode == TxnMode::Read {
            return Err(CoreError::unwilling(
                "cannot upgrade a read transaction to write",
            ));
        }
        Ok(())
    }

    fn check_expiry(&self, ctx: &TransactionContext) -> CoreResult<()> {
        if self.max_user_txn_duration.is_zero() {
            return Ok(());
        }
        match ctx.elapsed() {
            Some(elapsed) if elapsed > self.max_user_txn_duration => {
                Err(CoreError::unwilling(format!(
                    "user transaction {} exceeded the {:?} limit",
                    ctx.client_txn_id.as_deref().unwrap_or("<none>"),
                    self.max_user_txn_duration
                )))
            }
            _ => Ok(()),
        }
    }

    fn open_operation(&self, ctx: &mut TransactionContext, mode: TxnMode) -> CoreResult<()> {
        let database = ctx.database();
        let handle = self.begin_top_level(database, mode)?;
        ctx.state = TxnState::OpInProgress;
        ctx.owner = Some(self.backend);
        ctx.parent = Some(handle);
        ctx.mode = mode;
        ctx.started_at = Some(Instant::now());
        debug!(%database, %handle, ?mode, "began operation transaction");
        Ok(())
    }

    fn open_user(&self, ctx: &mut TransactionContext, id: String, started: Instant) -> CoreResult<()> {
        let parent = match self.begin_top_level(Database::Main, TxnMode::Write) {
            Ok(parent) => parent,
            Err(e) => {
                ctx.reset();
                return Err(e);
            }
        };
        let child = match self.main.engine.txn_begin(Some(parent), AccessMode::ReadWrite) {
            Ok(child) => child,
            Err(e) => {
                error!(%parent, error = %e, "failed to open first operation of user transaction");
                self.abort_handle(Database::Main, parent, Some(TxnMode::Write));
                ctx.reset();
                return Err(e.into());
            }
        };
        self.stats.record_transaction_start();
        info!(client_txn_id = %id, %parent, "user transaction started");
        ctx.state = TxnState::UserInProgress;
        ctx.owner = Some(self.backend);
        ctx.parent = Some(parent);
        ctx.child = Some(child);
        ctx.client_txn_id = Some(id);
        ctx.mode = TxnMode::Write;
        ctx.started_at = Some(started);
        Ok(())
    }

    fn begin_top_level(&self, database: Database, mode: TxnMode) -> CoreResult<TxnHandle> {
        let engine = &self.handles(database).engine;
        let handle = {
            let _outstanding = (mode == TxnMode::Write).then(|| self.counter.enter());
            engine.txn_begin(None, mode.access())?
        };
        self.stats.record_transaction_start();
        Ok(handle)
    }

    /// Commits whichever handle the context has open: the operation child
    /// of a user transaction, else the top-level transaction. Queued
    /// change-log records are journaled inside that handle first.
    ///
    /// # Errors
    ///
    /// - `InvalidOperation` if nothing is open.
    /// - Journal or engine errors; the handle is aborted before returning.
    pub fn commit(&self, ctx: &mut TransactionContext) -> CoreResult<()> {
        let database = ctx.database();
        match ctx.state {
            TxnState::None | TxnState::PendingStart => Err(CoreError::invalid_operation(format!(
                "no {database} transaction to commit"
            ))),
            TxnState::OpInProgress => {
                let handle = ctx.parent.ok_or_else(|| {
                    CoreError::invalid_operation("operation transaction has no handle")
                })?;
                let mode = ctx.mode;
                let pending = std::mem::take(&mut ctx.pending);
                ctx.reset();
                self.flush_and_commit(database, handle, pending, Some(mode))
            }
            TxnState::UserInProgress => match ctx.child.take() {
                Some(child) => {
                    let pending = std::mem::take(&mut ctx.pending);
                    self.flush_and_commit(database, child, pending, None)
                }
                None => {
                    let parent = ctx.parent.ok_or_else(|| {
                        CoreError::invalid_operation("user transaction has no parent")
                    })?;
                    let id = ctx.client_txn_id.take().unwrap_or_default();
                    let pending = std::mem::take(&mut ctx.pending);
                    ctx.reset();
                    self.flush_and_commit(database, parent, pending, Some(TxnMode::Write))?;
                    info!(client_txn_id = %id, "user transaction committed");
                    Ok(())
                }
            },
        }
    }

    fn flush_and_commit(
        &self,
        database: Database,
        handle: TxnHandle,
        pending: VecDeque<ChangeLogRecord>,
        top_level: Option<TxnMode>,
    ) -> CoreResult<()> {
        if !pending.is_empty() {
            let handles = self.handles(database);
            let count = pending.len();
            if let Err(e) = journal::append(handles.engine.as_ref(), handle, handles.journal, pending)
            {
                error!(%database, %handle, error = %e, "journal write failed, aborting");
                self.abort_handle(database, handle, top_level);
                return Err(e);
            }
            debug!(%database, %handle, count, "journaled change-log records");
        }
        self.commit_handle(database, handle, top_level)
    }

    fn commit_handle(
        &self,
        database: Database,
        handle: TxnHandle,
        top_level: Option<TxnMode>,
    ) -> CoreResult<()> {
        let engine = &self.handles(database).engine;
        let _outstanding = (top_level == Some(TxnMode::Write)).then(|| self.counter.enter());
        match engine.txn_commit(handle) {
            Ok(()) => {
                self.stats.record_transaction_commit();
                debug!(%database, %handle, "committed");
                Ok(())
            }
            Err(e) => {
                error!(%database, %handle, error = %e, "commit failed, aborting");
                engine.txn_abort(handle);
                self.stats.record_transaction_abort();
                Err(e.into())
            }
        }
    }

    fn abort_handle(&self, database: Database, handle: TxnHandle, top_level: Option<TxnMode>) {
        let engine = &self.handles(database).engine;
        let _outstanding = (top_level == Some(TxnMode::Write)).then(|| self.counter.enter());
        engine.txn_abort(handle);
        self.stats.record_transaction_abort();
        debug!(%database, %handle, "aborted");
    }

    /// Aborts whichever handle the context has open and discards its queued
    /// change-log records. A context with nothing open is left untouched.
    ///
    /// Aborting the operation child of a user transaction keeps the user
    /// transaction open.
    pub fn abort(&self, ctx: &mut TransactionContext) {
        let database = ctx.database();
        match ctx.state {
            TxnState::None => {}
            TxnState::PendingStart => ctx.reset(),
            TxnState::OpInProgress => {
                if let Some(handle) = ctx.parent {
                    self.abort_handle(database, handle, Some(ctx.mode));
                }
                ctx.reset();
            }
            TxnState::UserInProgress => match ctx.child.take() {
                Some(child) => {
                    self.abort_handle(database, child, None);
                    ctx.pending.clear();
                }
                None => {
                    if let Some(parent) = ctx.parent {
                        self.abort_handle(database, parent, Some(TxnMode::Write));
                    }
                    info!(client_txn_id = ?ctx.client_txn_id, "user transaction aborted");
                    ctx.reset();
                }
            },
        }
    }

    /// Aborts everything open on both databases, regardless of state.
    ///
    /// Called when a connection goes away mid-transaction. A context owned
    /// by another backend holds handles of that backend's engine and is
    /// left for that backend's `abort_all`.
    pub fn abort_all(&self, state: &mut ThreadTxnState) {
        for database in [Database::Main, Database::Log] {
            let ctx = state.context_mut(database);
            if ctx.state == TxnState::None {
                continue;
            }
            if ctx.owner.is_some_and(|owner| owner != self.backend) {
                debug!(%database, owner = ?ctx.owner, "skipping context owned by another backend");
                continue;
            }
            warn!(%database, state = ?ctx.state, client_txn_id = ?ctx.client_txn_id, "aborting abandoned transaction");
            self.abort_everything(ctx);
        }
    }

    /// Aborts a context after a refused begin and hands back the refusal.
    fn discard(&self, ctx: &mut TransactionContext, refusal: CoreError) -> CoreError {
        warn!(database = %ctx.database(), state = ?ctx.state, client_txn_id = ?ctx.client_txn_id, error = %refusal, "discarding transaction after refused begin");
        self.abort_everything(ctx);
        refusal
    }

    /// Aborts the child, then the parent, and resets the context to `None`.
    fn abort_everything(&self, ctx: &mut TransactionContext) {
        let database = ctx.database();
        if let Some(child) = ctx.child.take() {
            self.abort_handle(database, child, None);
        }
        if let Some(parent) = ctx.parent {
            let mode = if ctx.state == TxnState::UserInProgress {
                TxnMode::Write
            } else {
                ctx.mode
            };
            self.abort_handle(database, parent, Some(mode));
        }
        ctx.reset();
    }

    /// Declares a user transaction before its first operation arrives.
    ///
    /// # Errors
    ///
    /// Returns `Unwilling` if the context already has a transaction, and
    /// `InvalidOperation` for a log database context.
    pub fn declare_user_txn(&self, ctx: &mut TransactionContext, id: &str) -> CoreResult<()> {
        if ctx.database() != Database::Main {
            return Err(CoreError::invalid_operation(
                "user transactions exist only on the main database",
            ));
        }
        if ctx.state != TxnState::None {
            self.stats.record_unwilling();
            return Err(CoreError::unwilling(format!(
                "cannot start user transaction {id}: a transaction is already in progress"
            )));
        }
        ctx.state = TxnState::PendingStart;
        ctx.owner = Some(self.backend);
        ctx.client_txn_id = Some(id.to_string());
        ctx.started_at = Some(Instant::now());
        debug!(client_txn_id = id, "user transaction declared");
        Ok(())
    }

    /// Commits the user transaction `id`.
    ///
    /// # Errors
    ///
    /// Returns `Unwilling` if `id` is not the context's user transaction,
    /// an operation is still open inside it, or it has expired (abort it
    /// instead). Engine errors abort the user transaction.
    pub fn commit_user_txn(&self, ctx: &mut TransactionContext, id: &str) -> CoreResult<()> {
        self.check_user_txn(ctx, id)?;
        self.check_expiry(ctx)?;
        match ctx.state {
            TxnState::PendingStart => {
                ctx.reset();
                Ok(())
            }
            _ if ctx.child.is_some() => Err(CoreError::unwilling(format!(
                "user transaction {id} still has an operation in progress"
            ))),
            _ => self.commit(ctx),
        }
    }

    /// Aborts the user transaction `id`, including any open operation.
    ///
    /// # Errors
    ///
    /// Returns `Unwilling` if `id` is not the context's user transaction.
    pub fn abort_user_txn(&self, ctx: &mut TransactionContext, id: &str) -> CoreResult<()> {
        self.check_user_txn(ctx, id)?;
        if let Some(child) = ctx.child.take() {
            self.abort_handle(Database::Main, child, None);
        }
        if let Some(parent) = ctx.parent {
            self.abort_handle(Database::Main, parent, Some(TxnMode::Write));
        }
        info!(client_txn_id = id, "user transaction aborted");
        ctx.reset();
        Ok(())
    }

    /// Returns whether `id` names the context's declared or running user
    /// transaction and it has not expired.
    #[must_use]
    pub fn is_valid_user_txn(&self, ctx: &TransactionContext, id: &str) -> bool {
        self.check_user_txn(ctx, id).is_ok() && self.check_expiry(ctx).is_ok()
    }

    fn check_user_txn(&self, ctx: &TransactionContext, id: &str) -> CoreResult<()> {
        self.check_owner(ctx)?;
        if !matches!(ctx.state, TxnState::PendingStart | TxnState::UserInProgress) {
            return Err(CoreError::unwilling(format!(
                "no user transaction {id} in progress"
            )));
        }
        Self::check_client_txn_id(ctx, Some(id))
    }

    /// Reads every committed change-log record of a database, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or decoded.
    pub fn read_journal(&self, database: Database) -> CoreResult<Vec<(u64, ChangeLogRecord)>> {
        let handles = self.handles(database);
        with_read_txn(handles.engine.as_ref(), None, |txn| {
            journal::read_all(handles.engine.as_ref(), txn, handles.journal)
        })
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("backend", &self.backend)
            .field("outstanding_writes", &self.counter.outstanding())
            .field("max_user_txn_duration", &self.max_user_txn_duration)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::journal::ChangeKind;
    use crate::types::{EntryId, Usn};
    use dirstore_storage::InMemoryEngine;

    fn setup(limit: Duration) -> (TransactionManager, Arc<InMemoryEngine>) {
        let main = Arc::new(InMemoryEngine::new());
        let log = Arc::new(InMemoryEngine::new());
        let manager = TransactionManager::new(
            BackendId::allocate(),
            main.clone(),
            log,
            Arc::new(WriteTxnCounter::new()),
            Arc::new(BackendStats::new()),
            limit,
        )
        .unwrap();
        (manager, main)
    }

    fn change(n: u64) -> ChangeLogRecord {
        ChangeLogRecord::new(Usn::new(n), EntryId::new(n), ChangeKind::Add, "dc=example")
    }

    #[test]
    fn operation_transaction_lifecycle() {
        let (manager, main) = setup(Duration::ZERO);
        let mut state = ThreadTxnState::new();
        let ctx = state.context_mut(Database::Main);

        assert!(manager.begin(ctx, TxnMode::Write, None).unwrap());
        assert_eq!(ctx.state(), TxnState::OpInProgress);
        assert_eq!(ctx.owner(), Some(manager.backend_id()));
        assert!(!manager.begin(ctx, TxnMode::Read, None).unwrap());
        assert_eq!(ctx.state(), TxnState::OpInProgress);
        assert_eq!(ctx.mode(), TxnMode::Write);

        manager.commit(ctx).unwrap();
        assert_eq!(ctx.state(), TxnState::None);
        assert_eq!(main.open_transactions(), 0);
        assert_eq!(manager.counter().outstanding(), 0);
    }

    #[test]
    fn read_to_write_upgrade_discards_the_transaction() {
        let (manager, main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Main);
        manager.begin(&mut ctx, TxnMode::Read, None).unwrap();
        ctx.queue_change(change(1));

        let err = manager.begin(&mut ctx, TxnMode::Write, None).unwrap_err();
        assert!(err.is_unwilling());
        assert_eq!(ctx.state(), TxnState::None);
        assert_eq!(ctx.parent(), None);
        assert_eq!(ctx.pending_changes(), 0);
        assert_eq!(main.open_transactions(), 0);

        assert!(manager.begin(&mut ctx, TxnMode::Write, None).unwrap());
        manager.abort(&mut ctx);
        assert_eq!(manager.counter().outstanding(), 0);
    }

    #[test]
    fn log_upgrade_discards_the_transaction() {
        let (manager, _main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Log);
        manager.begin(&mut ctx, TxnMode::Read, None).unwrap();

        assert!(manager.begin(&mut ctx, TxnMode::Write, None).unwrap_err().is_unwilling());
        assert_eq!(ctx.state(), TxnState::None);
        assert_eq!(ctx.parent(), None);
    }

    #[test]
    fn user_transaction_spans_operations() {
        let (manager, main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Main);

        assert!(manager.begin(&mut ctx, TxnMode::Write, Some("T1")).unwrap());
        assert_eq!(ctx.state(), TxnState::UserInProgress);
        let parent = ctx.parent();
        assert!(ctx.child().is_some());

        manager.commit(&mut ctx).unwrap();
        assert_eq!(ctx.state(), TxnState::UserInProgress);
        assert_eq!(ctx.child(), None);

        assert!(manager.begin(&mut ctx, TxnMode::Write, None).unwrap());
        assert_eq!(ctx.parent(), parent);
        manager.commit(&mut ctx).unwrap();

        manager.commit_user_txn(&mut ctx, "T1").unwrap();
        assert_eq!(ctx.state(), TxnState::None);
        assert_eq!(main.open_transactions(), 0);
    }

    #[test]
    fn mismatched_client_id_discards_user_transaction() {
        let (manager, main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Main);
        manager.begin(&mut ctx, TxnMode::Write, Some("T1")).unwrap();
        manager.commit(&mut ctx).unwrap();

        let err = manager.begin(&mut ctx, TxnMode::Write, Some("T2")).unwrap_err();
        assert!(err.is_unwilling());
        assert_eq!(ctx.state(), TxnState::None);
        assert_eq!(ctx.client_txn_id(), None);
        assert_eq!(main.open_transactions(), 0);
        assert_eq!(manager.counter().outstanding(), 0);
        assert!(manager.abort_user_txn(&mut ctx, "T1").unwrap_err().is_unwilling());
    }

    #[test]
    fn mismatched_client_id_discards_open_operation_child() {
        let (manager, main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Main);
        manager.begin(&mut ctx, TxnMode::Write, Some("T1")).unwrap();
        assert!(ctx.child().is_some());

        assert!(manager.begin(&mut ctx, TxnMode::Write, Some("T2")).unwrap_err().is_unwilling());
        assert_eq!(ctx.state(), TxnState::None);
        assert_eq!(ctx.child(), None);
        assert_eq!(main.open_transactions(), 0);
    }

    #[test]
    fn mismatched_client_id_discards_declared_user_transaction() {
        let (manager, main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Main);
        manager.declare_user_txn(&mut ctx, "T1").unwrap();

        assert!(manager.begin(&mut ctx, TxnMode::Write, Some("T2")).unwrap_err().is_unwilling());
        assert_eq!(ctx.state(), TxnState::None);
        assert_eq!(main.open_transactions(), 0);
    }

    #[test]
    fn client_id_during_operation_transaction_is_refused() {
        let (manager, main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Main);
        manager.begin(&mut ctx, TxnMode::Read, None).unwrap();
        assert!(manager
            .begin(&mut ctx, TxnMode::Read, Some("T1"))
            .unwrap_err()
            .is_unwilling());
        assert_eq!(ctx.state(), TxnState::None);
        assert_eq!(main.open_transactions(), 0);
    }

    #[test]
    fn declared_user_transaction_starts_on_first_begin() {
        let (manager, _main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Main);
        manager.declare_user_txn(&mut ctx, "T1").unwrap();
        assert_eq!(ctx.state(), TxnState::PendingStart);
        assert!(manager.is_valid_user_txn(&ctx, "T1"));
        assert!(!manager.is_valid_user_txn(&ctx, "T2"));

        assert!(manager.begin(&mut ctx, TxnMode::Read, None).unwrap());
        assert_eq!(ctx.state(), TxnState::UserInProgress);
        assert_eq!(ctx.mode(), TxnMode::Write);
        manager.abort(&mut ctx);
        assert_eq!(ctx.state(), TxnState::UserInProgress);
        manager.abort_user_txn(&mut ctx, "T1").unwrap();
    }

    #[test]
    fn declare_requires_idle_main_context() {
        let (manager, _main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Main);
        manager.begin(&mut ctx, TxnMode::Read, None).unwrap();
        assert!(manager.declare_user_txn(&mut ctx, "T1").unwrap_err().is_unwilling());
        manager.abort(&mut ctx);

        let mut log = TransactionContext::new(Database::Log);
        assert!(manager.declare_user_txn(&mut log, "T1").is_err());
    }

    #[test]
    fn expired_user_transaction_refuses_work_but_aborts() {
        let (manager, main) = setup(Duration::from_millis(1));
        let mut ctx = TransactionContext::new(Database::Main);
        manager.begin(&mut ctx, TxnMode::Write, Some("T1")).unwrap();
        manager.commit(&mut ctx).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert!(manager.begin(&mut ctx, TxnMode::Write, None).unwrap_err().is_unwilling());
        assert!(!manager.is_valid_user_txn(&ctx, "T1"));
        assert!(manager.commit_user_txn(&mut ctx, "T1").unwrap_err().is_unwilling());
        manager.abort_user_txn(&mut ctx, "T1").unwrap();
        assert_eq!(main.open_transactions(), 0);
    }

    #[test]
    fn log_database_ignores_client_id() {
        let (manager, _main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Log);
        assert!(manager.begin(&mut ctx, TxnMode::Write, Some("T1")).unwrap());
        assert_eq!(ctx.state(), TxnState::OpInProgress);
        assert_eq!(ctx.client_txn_id(), None);
        manager.commit(&mut ctx).unwrap();
    }

    #[test]
    fn foreign_context_is_refused() {
        let (manager, _main) = setup(Duration::ZERO);
        let (other, other_main) = setup(Duration::ZERO);
        let mut state = ThreadTxnState::new();
        other
            .begin(state.context_mut(Database::Main), TxnMode::Read, None)
            .unwrap();

        let err = manager
            .begin(state.context_mut(Database::Main), TxnMode::Write, None)
            .unwrap_err();
        assert!(err.is_unwilling());
        assert_eq!(state.main().state(), TxnState::OpInProgress);
        assert_eq!(state.main().owner(), Some(other.backend_id()));

        manager.abort_all(&mut state);
        assert_eq!(state.main().state(), TxnState::OpInProgress);
        assert_eq!(other_main.open_transactions(), 1);
        other.abort_all(&mut state);
        assert_eq!(state.main().state(), TxnState::None);
        assert_eq!(other_main.open_transactions(), 0);
    }

    #[test]
    fn journal_is_written_on_commit_only() {
        let (manager, _main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Main);

        manager.begin(&mut ctx, TxnMode::Write, None).unwrap();
        ctx.queue_change(change(1));
        manager.abort(&mut ctx);

        manager.begin(&mut ctx, TxnMode::Write, None).unwrap();
        ctx.queue_change(change(2));
        ctx.queue_change(change(3));
        manager.commit(&mut ctx).unwrap();

        let journal = manager.read_journal(Database::Main).unwrap();
        let usns: Vec<u64> = journal.iter().map(|(_, r)| r.usn.as_u64()).collect();
        assert_eq!(usns, vec![2, 3]);
        assert_eq!(journal[0].0, 1);
        assert!(manager.read_journal(Database::Log).unwrap().is_empty());
    }

    #[test]
    fn abort_all_releases_everything() {
        let (manager, main) = setup(Duration::ZERO);
        let mut state = ThreadTxnState::new();
        manager
            .begin(state.context_mut(Database::Main), TxnMode::Write, Some("T1"))
            .unwrap();
        manager
            .begin(state.context_mut(Database::Log), TxnMode::Write, None)
            .unwrap();

        manager.abort_all(&mut state);
        assert_eq!(state.main().state(), TxnState::None);
        assert_eq!(state.log().state(), TxnState::None);
        assert_eq!(main.open_transactions(), 0);
        assert_eq!(manager.counter().outstanding(), 0);
    }

    #[test]
    fn commit_without_transaction_is_an_error() {
        let (manager, _main) = setup(Duration::ZERO);
        let mut ctx = TransactionContext::new(Database::Main);
        assert!(matches!(
            manager.commit(&mut ctx),
            Err(CoreError::InvalidOperation { .. })
        ));
        manager.abort(&mut ctx);
        assert_eq!(ctx.state(), TxnState::None);
    }
}
