//! Per-thread transaction contexts.
//!
//! A [`TransactionContext`] records where one thread stands in the
//! transaction state machine of one database. Contexts are deliberately
//! neither `Send` nor `Sync`: each connection thread owns its
//! [`ThreadTxnState`] and passes it explicitly into every backend call.

use crate::transaction::journal::ChangeLogRecord;
use crate::types::{BackendId, Database};
use dirstore_storage::{AccessMode, TxnHandle};
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::time::{Duration, Instant};

/// Transaction lifecycle state of one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnState {
    /// No outstanding transaction.
    None,
    /// A client declared a user transaction; nothing is open in the engine yet.
    PendingStart,
    /// A user transaction's parent is open, with or without an operation child.
    UserInProgress,
    /// A standalone transaction is open for one operation.
    OpInProgress,
}

/// Requested transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TxnMode {
    /// Read-only.
    Read,
    /// Read-write.
    Write,
}

impl TxnMode {
    /// Returns the engine access mode.
    #[must_use]
    pub const fn access(self) -> AccessMode {
        match self {
            Self::Read => AccessMode::ReadOnly,
            Self::Write => AccessMode::ReadWrite,
        }
    }
}

/// Transaction state of one thread against one database.
pub struct TransactionContext {
    database: Database,
    pub(crate) state: TxnState,
    pub(crate) owner: Option<BackendId>,
    pub(crate) parent: Option<TxnHandle>,
    pub(crate) child: Option<TxnHandle>,
    pub(crate) client_txn_id: Option<String>,
    pub(crate) mode: TxnMode,
    pub(crate) started_at: Option<Instant>,
    pub(crate) pending: VecDeque<ChangeLogRecord>,
    _thread_bound: PhantomData<*const ()>,
}

impl TransactionContext {
    /// Creates an idle context for `database`.
    #[must_use]
    pub fn new(database: Database) -> Self {
        Self {
            database,
            state: TxnState::None,
            owner: None,
            parent: None,
            child: None,
            client_txn_id: None,
            mode: TxnMode::Read,
            started_at: None,
            pending: VecDeque::new(),
            _thread_bound: PhantomData,
        }
    }

    /// Returns the database this context drives.
    #[must_use]
    pub const fn database(&self) -> Database {
        self.database
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> TxnState {
        self.state
    }

    /// Returns the backend that opened the current transaction.
    #[must_use]
    pub const fn owner(&self) -> Option<BackendId> {
        self.owner
    }

    /// Returns the top-level (or user parent) transaction handle.
    #[must_use]
    pub const fn parent(&self) -> Option<TxnHandle> {
        self.parent
    }

    /// Returns the operation child of a user transaction.
    #[must_use]
    pub const fn child(&self) -> Option<TxnHandle> {
        self.child
    }

    /// Returns the handle operations should read and write through.
    #[must_use]
    pub fn active_handle(&self) -> Option<TxnHandle> {
        self.child.or(self.parent)
    }

    /// Returns the client transaction id of a declared or running user
    /// transaction.
    #[must_use]
    pub fn client_txn_id(&self) -> Option<&str> {
        self.client_txn_id.as_deref()
    }

    /// Returns the mode of the open transaction.
    #[must_use]
    pub const fn mode(&self) -> TxnMode {
        self.mode
    }

    /// Returns how long the current transaction has been running.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| start.elapsed())
    }

    /// Returns the number of change-log records waiting for commit.
    #[must_use]
    pub fn pending_changes(&self) -> usize {
        self.pending.len()
    }

    /// Queues a change-log record for the next commit.
    pub fn queue_change(&mut self, record: ChangeLogRecord) {
        self.pending.push_back(record);
    }

    /// Returns to [`TxnState::None`], forgetting handles and queued records.
    pub(crate) fn reset(&mut self) {
        self.state = TxnState::None;
        self.owner = None;
        self.parent = None;
        self.child = None;
        self.client_txn_id = None;
        self.mode = TxnMode::Read;
        self.started_at = None;
        self.pending.clear();
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("database", &self.database)
            .field("state", &self.state)
            .field("parent", &self.parent)
            .field("child", &self.child)
            .field("client_txn_id", &self.client_txn_id)
            .field("mode", &self.mode)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// The main and log contexts of one thread.
#[derive(Debug)]
pub struct ThreadTxnState {
    main: TransactionContext,
    log: TransactionContext,
}

impl ThreadTxnState {
    /// Creates idle contexts for both databases.
    #[must_use]
    pub fn new() -> Self {
        Self {
            main: TransactionContext::new(Database::Main),
            log: TransactionContext::new(Database::Log),
        }
    }

    /// Returns the context for `database`.
    #[must_use]
    pub const fn context(&self, database: Database) -> &TransactionContext {
        match database {
            Database::Main => &self.main,
            Database::Log => &self.log,
        }
    }

    /// Returns the context for `database` mutably.
    pub fn context_mut(&mut self, database: Database) -> &mut TransactionContext {
        match database {
            Database::Main => &mut self.main,
            Database::Log => &mut self.log,
        }
    }

    /// Returns the main database context.
    #[must_use]
    pub const fn main(&self) -> &TransactionContext {
        &self.main
    }

    /// Returns the log database context.
    #[must_use]
    pub const fn log(&self) -> &TransactionContext {
        &self.log
    }
}

impl Default for ThreadTxnState {
    fn default() -> Self {
        Self::new()
    }
}
