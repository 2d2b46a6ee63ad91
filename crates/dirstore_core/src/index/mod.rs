//! Attribute indexes.
//!
//! - [`catalog`]: index descriptors and the catalog that hands them out
//! - [`key`]: forward and reverse index keys
//! - [`filter`]: filter components the scan engine answers
//! - [`candidates`]: ordered entry ID sets
//! - [`scan`]: the scan engine and DN/GUID resolution

pub mod candidates;
pub mod catalog;
pub mod filter;
pub mod key;
mod lookup;
pub mod scan;

pub use candidates::{CandidateSet, INITIAL_CAPACITY};
pub use catalog::{
    IndexAccess, IndexCatalog, IndexDescriptor, IndexKind, IndexStatus, MemoryIndexCatalog,
    ATTR_ENTRY_DN, ATTR_OBJECT_GUID, ATTR_PARENT_ID,
};
pub use filter::{FilterChoice, FilterComponent, SubstringPattern};
pub use key::{IndexKey, FORWARD_TAG, REVERSE_TAG};
pub use scan::{IndexScanEngine, NotIndexedReason, ScanOutcome};

pub(crate) use lookup::{guid_value, unique_lookup};
