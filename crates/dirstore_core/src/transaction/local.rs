//! Call-scoped read transactions.

use crate::error::CoreResult;
use dirstore_storage::{AccessMode, KvEngine, TxnHandle};
use tracing::trace;

/// Runs `op` inside `ambient` when one is supplied, otherwise inside a
/// read transaction opened for this call alone.
///
/// A locally opened transaction is committed when `op` succeeds or misses
/// with `EntryNotFound`, and aborted on any other error, so the caller never
/// has to clean up a transaction it did not open.
pub(crate) fn with_read_txn<T>(
    engine: &dyn KvEngine,
    ambient: Option<TxnHandle>,
    op: impl FnOnce(TxnHandle) -> CoreResult<T>,
) -> CoreResult<T> {
    if let Some(txn) = ambient {
        return op(txn);
    }
    let txn = engine.txn_begin(None, AccessMode::ReadOnly)?;
    trace!(%txn, "opened call-scoped read transaction");
    let result = op(txn);
    match &result {
        Ok(_) => engine.txn_commit(txn)?,
        Err(e) if e.is_not_found() => engine.txn_commit(txn)?,
        Err(_) => engine.txn_abort(txn),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use dirstore_storage::InMemoryEngine;

    #[test]
    fn local_transaction_is_closed_on_every_path() {
        let engine = InMemoryEngine::new();
        assert_eq!(with_read_txn(&engine, None, |_| Ok(5)).unwrap(), 5);
        assert!(with_read_txn(&engine, None, |_| -> CoreResult<()> {
            Err(CoreError::entry_not_found("x"))
        })
        .is_err());
        assert!(with_read_txn(&engine, None, |_| -> CoreResult<()> {
            Err(CoreError::invalid_format("bad"))
        })
        .is_err());
        assert_eq!(engine.open_transactions(), 0);
    }

    #[test]
    fn ambient_transaction_is_left_open() {
        let engine = InMemoryEngine::new();
        let txn = engine.txn_begin(None, AccessMode::ReadOnly).unwrap();
        let seen = with_read_txn(&engine, Some(txn), Ok).unwrap();
        assert_eq!(seen, txn);
        assert_eq!(engine.open_transactions(), 1);
        engine.txn_abort(txn);
    }
}
