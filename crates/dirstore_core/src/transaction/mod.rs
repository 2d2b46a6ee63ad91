//! Transaction management.
//!
//! Each connection thread owns a [`ThreadTxnState`] holding one
//! [`TransactionContext`] per database. The [`TransactionManager`] moves
//! those contexts between states, opening and ending engine transactions
//! as it goes, and journals the change-log records queued on a context
//! when its transaction commits.

mod context;
mod counter;
mod journal;
mod local;
mod manager;

pub use context::{ThreadTxnState, TransactionContext, TxnMode, TxnState};
pub use counter::{WriteTxnCounter, WriteTxnGuard};
pub use journal::{ChangeKind, ChangeLogRecord, JOURNAL_TABLE};
pub use manager::TransactionManager;

pub(crate) use local::with_read_txn;
