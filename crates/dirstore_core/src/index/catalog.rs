//! Index descriptors and the catalog that hands them out.
//!
//! The catalog is owned by the schema layer. The backend only acquires
//! descriptors for the duration of one call; the returned `Arc` is the
//! reference-counted handle, and dropping it releases the descriptor.

use crate::error::{CoreError, CoreResult};
use dirstore_storage::{DupOrder, TableFlags, TableHandle};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Attribute holding the normalized DN of every entry.
pub const ATTR_ENTRY_DN: &str = "entrydn";

/// Attribute holding the GUID of every entry.
pub const ATTR_OBJECT_GUID: &str = "objectguid";

/// Attribute mapping a parent identifier to its children.
pub const ATTR_PARENT_ID: &str = "parentid";

/// Kind of lookup an index serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IndexKind {
    /// Equality on forward keys.
    Equality = 0,
    /// Initial substrings on forward keys and final substrings on reverse keys.
    Substring = 1,
    /// Parent identifier to child identifiers.
    OneLevelScope = 2,
    /// Ordered walks over forward keys.
    Range = 3,
}

impl TryFrom<u8> for IndexKind {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Equality),
            1 => Ok(Self::Substring),
            2 => Ok(Self::OneLevelScope),
            3 => Ok(Self::Range),
            _ => Err(CoreError::invalid_format(format!(
                "unknown index kind: {value}"
            ))),
        }
    }
}

/// Lifecycle status of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexStatus {
    /// Being populated: maintained on writes, not yet used by searches.
    Building,
    /// Fully populated and in use.
    Enabled,
    /// Neither maintained nor used.
    Disabled,
}

/// Purpose for which a descriptor is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexAccess {
    /// Searches and lookups.
    Read,
    /// Index maintenance on entry writes.
    Write,
}

/// Describes one attribute index and the table backing it.
pub struct IndexDescriptor {
    attr: String,
    kinds: Vec<IndexKind>,
    unique: bool,
    status: RwLock<IndexStatus>,
    table: OnceLock<TableHandle>,
}

impl IndexDescriptor {
    /// Creates an enabled, non-unique descriptor.
    pub fn new(attr: impl Into<String>, kinds: &[IndexKind]) -> Self {
        Self {
            attr: attr.into().to_ascii_lowercase(),
            kinds: kinds.to_vec(),
            unique: false,
            status: RwLock::new(IndexStatus::Enabled),
            table: OnceLock::new(),
        }
    }

    /// Makes the index globally unique: one entry per key.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the initial status.
    #[must_use]
    pub fn with_status(self, status: IndexStatus) -> Self {
        *self.status.write() = status;
        self
    }

    /// Returns the lowercased attribute name.
    #[must_use]
    pub fn attr(&self) -> &str {
        &self.attr
    }

    /// Returns the lookup kinds served.
    #[must_use]
    pub fn kinds(&self) -> &[IndexKind] {
        &self.kinds
    }

    /// Returns whether the index serves `kind`.
    #[must_use]
    pub fn supports(&self, kind: IndexKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Returns whether the index is globally unique.
    #[must_use]
    pub const fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> IndexStatus {
        *self.status.read()
    }

    /// Changes the status, e.g. to enable an index once populated.
    pub fn set_status(&self, status: IndexStatus) {
        *self.status.write() = status;
    }

    /// Returns the name of the backing table.
    #[must_use]
    pub fn table_name(&self) -> String {
        format!("idx.{}", self.attr)
    }

    /// Returns the flags the backing table is opened with.
    ///
    /// Non-unique indexes keep their entry identifiers as length-first
    /// sorted duplicates so a duplicate walk visits them in numeric order.
    #[must_use]
    pub const fn table_flags(&self) -> TableFlags {
        if self.unique {
            TableFlags::UNIQUE
        } else {
            TableFlags::dup_sort(DupOrder::LengthThenLexicographic)
        }
    }

    /// Returns the backing table.
    ///
    /// # Errors
    ///
    /// Returns an error if the index has not been opened by a backend.
    pub fn table(&self) -> CoreResult<TableHandle> {
        self.table.get().copied().ok_or_else(|| {
            CoreError::invalid_operation(format!("index {} is not open", self.attr))
        })
    }

    /// Binds the backing table. Later binds are ignored.
    pub(crate) fn bind_table(&self, table: TableHandle) {
        let _ = self.table.set(table);
    }

    pub(crate) fn permits(&self, access: IndexAccess) -> bool {
        match (self.status(), access) {
            (IndexStatus::Enabled, _) => true,
            (IndexStatus::Building, IndexAccess::Write) => true,
            _ => false,
        }
    }
}

impl fmt::Debug for IndexDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexDescriptor")
            .field("attr", &self.attr)
            .field("kinds", &self.kinds)
            .field("unique", &self.unique)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Source of index descriptors, keyed by attribute name.
///
/// Attribute names are matched case-insensitively.
pub trait IndexCatalog: Send + Sync {
    /// Acquires the descriptor of an attribute for the given purpose.
    ///
    /// Returns `None` if the attribute is not indexed, or its index status
    /// does not permit the access.
    fn acquire(&self, attr: &str, access: IndexAccess) -> Option<Arc<IndexDescriptor>>;

    /// Returns the descriptor regardless of status.
    fn lookup(&self, attr: &str) -> Option<Arc<IndexDescriptor>>;

    /// Registers a descriptor, replacing any previous one for the attribute.
    fn register(&self, descriptor: Arc<IndexDescriptor>);

    /// Removes and returns the descriptor of an attribute.
    fn remove(&self, attr: &str) -> Option<Arc<IndexDescriptor>>;

    /// Returns every registered descriptor.
    fn descriptors(&self) -> Vec<Arc<IndexDescriptor>>;
}

/// A catalog held in process memory.
#[derive(Debug, Default)]
pub struct MemoryIndexCatalog {
    indexes: RwLock<HashMap<String, Arc<IndexDescriptor>>>,
}

impl MemoryIndexCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog holding the given descriptors.
    #[must_use]
    pub fn with_indexes(descriptors: impl IntoIterator<Item = IndexDescriptor>) -> Self {
        let catalog = Self::new();
        for descriptor in descriptors {
            catalog.register(Arc::new(descriptor));
        }
        catalog
    }
}

impl IndexCatalog for MemoryIndexCatalog {
    fn acquire(&self, attr: &str, access: IndexAccess) -> Option<Arc<IndexDescriptor>> {
        self.lookup(attr)
            .filter(|descriptor| descriptor.permits(access))
    }

    fn lookup(&self, attr: &str) -> Option<Arc<IndexDescriptor>> {
        self.indexes.read().get(&attr.to_ascii_lowercase()).cloned()
    }

    fn register(&self, descriptor: Arc<IndexDescriptor>) {
        self.indexes
            .write()
            .insert(descriptor.attr().to_string(), descriptor);
    }

    fn remove(&self, attr: &str) -> Option<Arc<IndexDescriptor>> {
        self.indexes.write().remove(&attr.to_ascii_lowercase())
    }

    fn descriptors(&self) -> Vec<Arc<IndexDescriptor>> {
        self.indexes.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_case_insensitive() {
        let catalog =
            MemoryIndexCatalog::with_indexes([IndexDescriptor::new("sn", &[IndexKind::Equality])]);
        assert!(catalog.acquire("SN", IndexAccess::Read).is_some());
        assert!(catalog.acquire("cn", IndexAccess::Read).is_none());
    }

    #[test]
    fn building_index_is_write_only() {
        let catalog = MemoryIndexCatalog::with_indexes([IndexDescriptor::new(
            "mail",
            &[IndexKind::Equality],
        )
        .with_status(IndexStatus::Building)]);
        assert!(catalog.acquire("mail", IndexAccess::Read).is_none());
        let descriptor = catalog.acquire("mail", IndexAccess::Write).unwrap();

        descriptor.set_status(IndexStatus::Enabled);
        assert!(catalog.acquire("mail", IndexAccess::Read).is_some());

        descriptor.set_status(IndexStatus::Disabled);
        assert!(catalog.acquire("mail", IndexAccess::Write).is_none());
        assert!(catalog.lookup("mail").is_some());
    }

    #[test]
    fn dropping_handle_releases_it() {
        let catalog =
            MemoryIndexCatalog::with_indexes([IndexDescriptor::new("sn", &[IndexKind::Equality])]);
        let handle = catalog.acquire("sn", IndexAccess::Read).unwrap();
        assert_eq!(Arc::strong_count(&handle), 2);
        drop(handle);
        let handle = catalog.lookup("sn").unwrap();
        assert_eq!(Arc::strong_count(&handle), 2);
    }

    #[test]
    fn unbound_descriptor_has_no_table() {
        let descriptor = IndexDescriptor::new("sn", &[IndexKind::Equality]);
        assert!(descriptor.table().is_err());
        descriptor.bind_table(TableHandle(3));
        descriptor.bind_table(TableHandle(4));
        assert_eq!(descriptor.table().unwrap(), TableHandle(3));
        assert_eq!(descriptor.table_name(), "idx.sn");
    }

    #[test]
    fn unique_index_uses_plain_table() {
        let unique = IndexDescriptor::new("entrydn", &[IndexKind::Equality]).unique();
        assert!(!unique.table_flags().dup_sort);
        let dup = IndexDescriptor::new("sn", &[IndexKind::Equality]);
        assert_eq!(dup.table_flags().dup_order, DupOrder::LengthThenLexicographic);
    }

    #[test]
    fn index_kind_from_u8() {
        assert_eq!(IndexKind::try_from(2).unwrap(), IndexKind::OneLevelScope);
        assert!(IndexKind::try_from(9).is_err());
    }
}
