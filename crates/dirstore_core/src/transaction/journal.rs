//! Change-log records and the journal table they are committed to.
//!
//! Records are queued on a transaction context while an operation runs and
//! written into the journal table of the same database right before the
//! owning engine transaction commits. An abort drops the queue.

use crate::codec;
use crate::error::{CoreError, CoreResult};
use crate::types::{EntryId, Usn};
use dirstore_storage::{CursorHandle, CursorOp, KvEngine, PutFlags, TableHandle, TxnHandle};
use serde::{Deserialize, Serialize};

/// Name of the journal table in each database.
pub const JOURNAL_TABLE: &str = "journal";

/// Journal key holding the next sequence number. No encoded sequence is empty.
const NEXT_SEQUENCE_KEY: &[u8] = b"";

/// What happened to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Entry was added.
    Add,
    /// Entry was modified.
    Modify,
    /// Entry was deleted.
    Delete,
}

/// One change-log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeLogRecord {
    /// USN stamped on the change.
    pub usn: Usn,
    /// Entry affected.
    pub eid: EntryId,
    /// Kind of change.
    pub kind: ChangeKind,
    /// Normalized DN of the entry.
    pub dn: String,
}

impl ChangeLogRecord {
    /// Creates a record.
    pub fn new(usn: Usn, eid: EntryId, kind: ChangeKind, dn: impl Into<String>) -> Self {
        Self {
            usn,
            eid,
            kind,
            dn: dn.into(),
        }
    }

    fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes).map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> CoreResult<Self> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::codec(e.to_string()))
    }
}

/// Appends records to the journal inside `txn`, returning the sequence
/// numbers assigned.
pub(crate) fn append(
    engine: &dyn KvEngine,
    txn: TxnHandle,
    table: TableHandle,
    records: impl IntoIterator<Item = ChangeLogRecord>,
) -> CoreResult<Vec<u64>> {
    let mut next = match engine.get(txn, table, NEXT_SEQUENCE_KEY)? {
        Some(bytes) => codec::decode(&bytes)?,
        None => 1,
    };
    let mut assigned = Vec::new();
    for record in records {
        engine.put(txn, table, &codec::encode(next), &record.encode()?, PutFlags::NO_OVERWRITE)?;
        assigned.push(next);
        next += 1;
    }
    if !assigned.is_empty() {
        engine.put(txn, table, NEXT_SEQUENCE_KEY, &codec::encode(next), PutFlags::NONE)?;
    }
    Ok(assigned)
}

/// Reads every committed record visible to `txn`, in sequence order.
pub(crate) fn read_all(
    engine: &dyn KvEngine,
    txn: TxnHandle,
    table: TableHandle,
) -> CoreResult<Vec<(u64, ChangeLogRecord)>> {
    let cursor = engine.cursor_open(txn, table)?;
    let result = walk(engine, cursor);
    engine.cursor_close(cursor);
    result
}

fn walk(engine: &dyn KvEngine, cursor: CursorHandle) -> CoreResult<Vec<(u64, ChangeLogRecord)>> {
    let mut records = Vec::new();
    let mut next = engine.cursor_get(cursor, None, CursorOp::First)?;
    while let Some((key, value)) = next {
        if key != NEXT_SEQUENCE_KEY {
            records.push((codec::decode(&key)?, ChangeLogRecord::decode(&value)?));
        }
        next = engine.cursor_get(cursor, None, CursorOp::Next)?;
    }
    // minimal keys of different lengths do not sort numerically
    records.sort_by_key(|(seq, _)| *seq);
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirstore_storage::{AccessMode, InMemoryEngine, TableFlags};

    fn record(usn: u64) -> ChangeLogRecord {
        ChangeLogRecord::new(Usn::new(usn), EntryId::new(usn), ChangeKind::Add, "dc=com")
    }

    #[test]
    fn sequences_continue_across_transactions_and_sort_numerically() {
        let engine = InMemoryEngine::new();
        let table = engine.open_table(JOURNAL_TABLE, TableFlags::UNIQUE).unwrap();

        let txn = engine.txn_begin(None, AccessMode::ReadWrite).unwrap();
        let records: Vec<_> = (1..=255).map(record).collect();
        assert_eq!(append(&engine, txn, table, records).unwrap().len(), 255);
        engine.txn_commit(txn).unwrap();

        let txn = engine.txn_begin(None, AccessMode::ReadWrite).unwrap();
        assert_eq!(append(&engine, txn, table, [record(256)]).unwrap(), vec![256]);
        engine.txn_commit(txn).unwrap();

        let txn = engine.txn_begin(None, AccessMode::ReadOnly).unwrap();
        let all = read_all(&engine, txn, table).unwrap();
        engine.txn_abort(txn);
        assert_eq!(all.len(), 256);
        assert_eq!(all.first().unwrap().0, 1);
        assert_eq!(all.last().unwrap(), &(256, record(256)));
    }

    #[test]
    fn empty_append_writes_nothing() {
        let engine = InMemoryEngine::new();
        let table = engine.open_table(JOURNAL_TABLE, TableFlags::UNIQUE).unwrap();
        let txn = engine.txn_begin(None, AccessMode::ReadWrite).unwrap();
        assert!(append(&engine, txn, table, Vec::new()).unwrap().is_empty());
        assert_eq!(engine.get(txn, table, NEXT_SEQUENCE_KEY).unwrap(), None);
        engine.txn_abort(txn);
    }
}
