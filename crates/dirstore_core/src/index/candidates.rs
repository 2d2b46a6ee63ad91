//! Ordered candidate sets of entry identifiers.

use crate::types::EntryId;

/// Initial capacity of a fresh candidate set.
pub const INITIAL_CAPACITY: usize = 10;

/// An ordered, duplicate-free set of entry identifiers produced by an index
/// scan.
///
/// Members are believed to match a filter component and are verified
/// against the entry later. The set grows geometrically from
/// [`INITIAL_CAPACITY`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateSet {
    eids: Vec<EntryId>,
    exact: bool,
}

impl CandidateSet {
    /// Creates an empty set.
    ///
    /// `exact` marks a set whose members match without re-checking the
    /// entry.
    #[must_use]
    pub fn new(exact: bool) -> Self {
        Self {
            eids: Vec::with_capacity(INITIAL_CAPACITY),
            exact,
        }
    }

    /// Adds an identifier, keeping the set ordered.
    ///
    /// Returns `false` if it was already present.
    pub fn insert(&mut self, eid: EntryId) -> bool {
        match self.eids.binary_search(&eid) {
            Ok(_) => false,
            Err(pos) => {
                self.eids.insert(pos, eid);
                true
            }
        }
    }

    /// Returns whether the identifier is present.
    #[must_use]
    pub fn contains(&self, eid: EntryId) -> bool {
        self.eids.binary_search(&eid).is_ok()
    }

    /// Returns the number of identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.eids.len()
    }

    /// Returns whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.eids.is_empty()
    }

    /// Returns the allocated capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.eids.capacity()
    }

    /// Returns whether members match without re-checking the entry.
    #[must_use]
    pub const fn is_exact(&self) -> bool {
        self.exact
    }

    /// Returns the identifiers in ascending order.
    #[must_use]
    pub fn as_slice(&self) -> &[EntryId] {
        &self.eids
    }

    /// Iterates the identifiers in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.eids.iter().copied()
    }
}

impl IntoIterator for CandidateSet {
    type Item = EntryId;
    type IntoIter = std::vec::IntoIter<EntryId>;

    fn into_iter(self) -> Self::IntoIter {
        self.eids.into_iter()
    }
}
