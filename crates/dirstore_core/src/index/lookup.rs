//! DN and objectGUID resolution.

use crate::error::{CoreError, CoreResult};
use crate::index::catalog::{IndexAccess, IndexCatalog, ATTR_ENTRY_DN, ATTR_OBJECT_GUID};
use crate::index::key::IndexKey;
use crate::types::EntryId;
use dirstore_storage::{KvEngine, TxnHandle};
use uuid::Uuid;

/// Resolves a normalized DN to its entry ID.
///
/// The empty DN names the root DSE and resolves without touching the index.
pub(crate) fn dn_to_entry_id(
    engine: &dyn KvEngine,
    catalog: &dyn IndexCatalog,
    txn: TxnHandle,
    normalized_dn: &str,
) -> CoreResult<EntryId> {
    if normalized_dn.is_empty() {
        return Ok(EntryId::DSE_ROOT);
    }
    unique_lookup(engine, catalog, txn, ATTR_ENTRY_DN, normalized_dn.as_bytes())?
        .ok_or_else(|| CoreError::entry_not_found(format!("dn \"{normalized_dn}\"")))
}

/// Resolves an objectGUID to its entry ID.
pub(crate) fn object_guid_to_entry_id(
    engine: &dyn KvEngine,
    catalog: &dyn IndexCatalog,
    txn: TxnHandle,
    guid: &Uuid,
) -> CoreResult<EntryId> {
    let value = guid_value(guid);
    unique_lookup(engine, catalog, txn, ATTR_OBJECT_GUID, value.as_bytes())?
        .ok_or_else(|| CoreError::entry_not_found(format!("objectGUID {guid}")))
}

/// Returns the normalized index value of an objectGUID.
pub(crate) fn guid_value(guid: &Uuid) -> String {
    guid.hyphenated().to_string()
}

/// Point lookup of a forward key in a unique index.
pub(crate) fn unique_lookup(
    engine: &dyn KvEngine,
    catalog: &dyn IndexCatalog,
    txn: TxnHandle,
    attr: &str,
    value: &[u8],
) -> CoreResult<Option<EntryId>> {
    let descriptor = catalog
        .acquire(attr, IndexAccess::Read)
        .ok_or_else(|| CoreError::invalid_operation(format!("index {attr} is not available")))?;
    let key = IndexKey::forward(value).to_bytes();
    engine
        .get(txn, descriptor.table()?, &key)?
        .map(|bytes| EntryId::from_key(&bytes))
        .transpose()
}
