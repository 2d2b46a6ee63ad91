//! Index scan engine.
//!
//! Turns one filter component into a [`CandidateSet`] by walking the
//! attribute's index table. The walk depends on the assertion:
//!
//! | Assertion        | Key                        | Walk                               |
//! |------------------|----------------------------|------------------------------------|
//! | equality         | forward value              | `Set`, then `NextDup`              |
//! | one-level        | encoded parent entry ID    | `Set`, then `NextDup`              |
//! | initial substring| forward fragment           | `SetRange`, then `Next` on prefix  |
//! | final substring  | reverse fragment           | `SetRange`, then `Next` on prefix  |
//! | greater-or-equal | forward value              | `SetRange`, then `Next`            |
//! | less-or-equal    | forward value              | `SetRange` or `Last`, then `Prev`  |
//!
//! Unique indexes answer exact assertions with a single point lookup.
//!
//! Range walks are unbounded by default: they run until the table ends or
//! a scan limit trips. `BackendConfig::bounded_range_walk` keeps
//! them inside the forward key namespace and, for less-or-equal, skips
//! keys above the assertion value.

use crate::error::CoreResult;
use crate::index::candidates::CandidateSet;
use crate::index::catalog::{IndexAccess, IndexCatalog, IndexDescriptor};
use crate::index::filter::{FilterChoice, FilterComponent};
use crate::index::key::{IndexKey, FORWARD_TAG};
use crate::index::lookup;
use crate::stats::BackendStats;
use crate::transaction::with_read_txn;
use crate::types::EntryId;
use dirstore_storage::{CursorHandle, CursorOp, KvEngine, TxnHandle};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Why a filter component was not answered from an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotIndexedReason {
    /// The attribute has no readable index of a kind that serves the assertion.
    NoIndex,
    /// A substring assertion with only `any` fragments.
    AnySubstringOnly,
    /// The walk collected more than the component's `max_index_scan`.
    ScanLimitExceeded,
}

/// Result of scanning one filter component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The caller must evaluate this component without an index.
    NotIndexed(NotIndexedReason),
    /// Entry IDs found in the index, ascending, all at or above the floor.
    Indexed {
        /// The candidates.
        candidates: CandidateSet,
        /// Whether the walk stopped at the size-limit scan cap.
        partial: bool,
    },
}

impl ScanOutcome {
    fn complete(candidates: CandidateSet) -> Self {
        Self::Indexed {
            candidates,
            partial: false,
        }
    }

    /// Returns whether the component was answered from an index.
    #[must_use]
    pub const fn is_indexed(&self) -> bool {
        matches!(self, Self::Indexed { .. })
    }

    /// Returns whether the candidates are a truncated prefix of the matches.
    #[must_use]
    pub const fn is_partial(&self) -> bool {
        matches!(self, Self::Indexed { partial: true, .. })
    }

    /// Returns the candidates, if indexed.
    #[must_use]
    pub const fn candidates(&self) -> Option<&CandidateSet> {
        match self {
            Self::Indexed { candidates, .. } => Some(candidates),
            Self::NotIndexed(_) => None,
        }
    }

    /// Consumes the outcome, returning the candidates if indexed.
    #[must_use]
    pub fn into_candidates(self) -> Option<CandidateSet> {
        match self {
            Self::Indexed { candidates, .. } => Some(candidates),
            Self::NotIndexed(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Exact,
    Prefix,
    Ascending,
    Descending,
}

enum Visit {
    Take,
    Skip,
    Stop,
}

enum Taken {
    More,
    Full,
    Overflow,
}

/// Reads attribute indexes on behalf of searches.
pub struct IndexScanEngine {
    engine: Arc<dyn KvEngine>,
    catalog: Arc<dyn IndexCatalog>,
    stats: Arc<BackendStats>,
    bounded_range_walk: bool,
}

impl IndexScanEngine {
    /// Creates a scan engine over an engine and its index catalog.
    pub fn new(
        engine: Arc<dyn KvEngine>,
        catalog: Arc<dyn IndexCatalog>,
        stats: Arc<BackendStats>,
        bounded_range_walk: bool,
    ) -> Self {
        Self {
            engine,
            catalog,
            stats,
            bounded_range_walk,
        }
    }

    /// Collects the entry IDs at or above `floor` that the index lists for
    /// `filter`.
    ///
    /// Runs inside `txn` when supplied, otherwise inside a read transaction
    /// opened and closed by this call. `max_scan_for_size_limit` (0 =
    /// unlimited) truncates the walk and marks the outcome partial.
    ///
    /// # Errors
    ///
    /// Returns engine and decoding errors. A locally opened transaction is
    /// aborted first.
    pub fn get_candidates(
        &self,
        txn: Option<TxnHandle>,
        filter: &FilterComponent,
        floor: EntryId,
        max_scan_for_size_limit: usize,
    ) -> CoreResult<ScanOutcome> {
        let attr = filter.choice.attr();
        let Some(descriptor) = self.catalog.acquire(attr, IndexAccess::Read) else {
            trace!(attr, "attribute is not indexed");
            return Ok(ScanOutcome::NotIndexed(NotIndexedReason::NoIndex));
        };
        if !filter.choice.served_by().iter().any(|kind| descriptor.supports(*kind)) {
            trace!(attr, kinds = ?descriptor.kinds(), "index cannot serve assertion");
            return Ok(ScanOutcome::NotIndexed(NotIndexedReason::NoIndex));
        }
        let (key, walk) = match &filter.choice {
            FilterChoice::Equality { value, .. } => (IndexKey::forward(value).to_bytes(), Walk::Exact),
            FilterChoice::GreaterOrEqual { value, .. } => {
                (IndexKey::forward(value).to_bytes(), Walk::Ascending)
            }
            FilterChoice::LessOrEqual { value, .. } => {
                (IndexKey::forward(value).to_bytes(), Walk::Descending)
            }
            FilterChoice::Substrings { pattern, .. } => {
                match (&pattern.initial, &pattern.final_value) {
                    (Some(initial), _) => (IndexKey::forward(initial).to_bytes(), Walk::Prefix),
                    (None, Some(final_value)) => {
                        (IndexKey::reverse(final_value).to_bytes(), Walk::Prefix)
                    }
                    (None, None) => {
                        return Ok(ScanOutcome::NotIndexed(NotIndexedReason::AnySubstringOnly))
                    }
                }
            }
            // parent key is resolved inside the transaction
            FilterChoice::OneLevel { .. } => (Vec::new(), Walk::Exact),
        };

        with_read_txn(self.engine.as_ref(), txn, |txn| {
            let key = match &filter.choice {
                FilterChoice::OneLevel { parent_dn } => {
                    match lookup::dn_to_entry_id(
                        self.engine.as_ref(),
                        self.catalog.as_ref(),
                        txn,
                        parent_dn,
                    ) {
                        Ok(parent) => parent.to_key(),
                        Err(e) if e.is_not_found() => {
                            debug!(parent_dn, "one-level scope parent does not exist");
                            return Ok(ScanOutcome::complete(CandidateSet::new(true)));
                        }
                        Err(e) => return Err(e),
                    }
                }
                _ => key,
            };
            self.scan(txn, &descriptor, &key, walk, filter, floor, max_scan_for_size_limit)
        })
    }

    /// Resolves a normalized DN to its entry ID.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` when no entry has this DN.
    pub fn dn_to_entry_id(&self, txn: Option<TxnHandle>, normalized_dn: &str) -> CoreResult<EntryId> {
        with_read_txn(self.engine.as_ref(), txn, |txn| {
            lookup::dn_to_entry_id(self.engine.as_ref(), self.catalog.as_ref(), txn, normalized_dn)
        })
    }

    /// Resolves an objectGUID to its entry ID.
    ///
    /// # Errors
    ///
    /// Returns `EntryNotFound` when no entry has this GUID.
    pub fn object_guid_to_entry_id(&self, txn: Option<TxnHandle>, guid: &Uuid) -> CoreResult<EntryId> {
        with_read_txn(self.engine.as_ref(), txn, |txn| {
            lookup::object_guid_to_entry_id(self.engine.as_ref(), self.catalog.as_ref(), txn, guid)
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn scan(
        &self,
        txn: TxnHandle,
        descriptor: &IndexDescriptor,
        key: &[u8],
        walk: Walk,
        filter: &FilterComponent,
        floor: EntryId,
        max_scan_for_size_limit: usize,
    ) -> CoreResult<ScanOutcome> {
        let table = descriptor.table()?;
        let mut candidates = CandidateSet::new(true);

        if walk == Walk::Exact && descriptor.is_unique() {
            self.stats.record_point_lookup();
            if let Some(bytes) = self.engine.get(txn, table, key)? {
                let eid = EntryId::from_key(&bytes)?;
                if eid >= floor {
                    candidates.insert(eid);
                }
            }
            return Ok(ScanOutcome::complete(candidates));
        }

        self.stats.record_index_scan();
        let cursor = self.engine.cursor_open(txn, table)?;
        let result = self.walk(cursor, key, walk, filter, floor, max_scan_for_size_limit, candidates);
        self.engine.cursor_close(cursor);

        if let Ok(outcome) = &result {
            match outcome {
                ScanOutcome::NotIndexed(_) => {
                    self.stats.record_scan_limit_fallback();
                    debug!(
                        attr = descriptor.attr(),
                        max_index_scan = filter.max_index_scan,
                        "index scan exceeded its limit, falling back to unindexed evaluation"
                    );
                }
                ScanOutcome::Indexed { candidates, partial } => {
                    if *partial {
                        self.stats.record_partial_scan();
                        debug!(
                            attr = descriptor.attr(),
                            collected = candidates.len(),
                            max_scan_for_size_limit,
                            "index scan stopped at size-limit cap"
                        );
                    }
                    trace!(attr = descriptor.attr(), count = candidates.len(), "index scan done");
                }
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn walk(
        &self,
        cursor: CursorHandle,
        key: &[u8],
        walk: Walk,
        filter: &FilterComponent,
        floor: EntryId,
        max_scan_for_size_limit: usize,
        mut candidates: CandidateSet,
    ) -> CoreResult<ScanOutcome> {
        let (first, step) = match walk {
            Walk::Exact => (CursorOp::Set, CursorOp::NextDup),
            Walk::Prefix | Walk::Ascending => (CursorOp::SetRange, CursorOp::Next),
            Walk::Descending => (CursorOp::SetRange, CursorOp::Prev),
        };
        let mut next = self.engine.cursor_get(cursor, Some(key), first)?;
        if next.is_none() && walk == Walk::Descending {
            // lookup value sorts after every key
            next = self.engine.cursor_get(cursor, None, CursorOp::Last)?;
        }

        if walk == Walk::Descending
            && self.bounded_range_walk
            && next.as_ref().is_some_and(|(current, _)| current.as_slice() == key)
        {
            // every duplicate of the lookup key, then back from its first one
            while let Some((_, value)) = next {
                match Self::take(&value, filter, floor, max_scan_for_size_limit, &mut candidates)? {
                    Taken::More => {}
                    Taken::Full => return Ok(ScanOutcome::Indexed { candidates, partial: true }),
                    Taken::Overflow => {
                        return Ok(ScanOutcome::NotIndexed(NotIndexedReason::ScanLimitExceeded))
                    }
                }
                next = self.engine.cursor_get(cursor, None, CursorOp::NextDup)?;
            }
            self.engine.cursor_get(cursor, Some(key), CursorOp::SetRange)?;
            next = self.engine.cursor_get(cursor, None, CursorOp::Prev)?;
        }

        let mut partial = false;
        while let Some((current, value)) = next {
            match self.visit(walk, key, &current) {
                Visit::Stop => break,
                Visit::Skip => {}
                Visit::Take => {
                    match Self::take(&value, filter, floor, max_scan_for_size_limit, &mut candidates)? {
                        Taken::More => {}
                        Taken::Full => {
                            partial = true;
                            break;
                        }
                        Taken::Overflow => {
                            return Ok(ScanOutcome::NotIndexed(NotIndexedReason::ScanLimitExceeded))
                        }
                    }
                }
            }
            next = self.engine.cursor_get(cursor, None, step)?;
        }
        Ok(ScanOutcome::Indexed { candidates, partial })
    }

    fn take(
        value: &[u8],
        filter: &FilterComponent,
        floor: EntryId,
        max_scan_for_size_limit: usize,
        candidates: &mut CandidateSet,
    ) -> CoreResult<Taken> {
        let eid = EntryId::from_key(value)?;
        if eid >= floor {
            candidates.insert(eid);
        }
        if filter.max_index_scan > 0 && candidates.len() > filter.max_index_scan {
            return Ok(Taken::Overflow);
        }
        if max_scan_for_size_limit > 0 && candidates.len() > max_scan_for_size_limit {
            return Ok(Taken::Full);
        }
        Ok(Taken::More)
    }

    fn visit(&self, walk: Walk, key: &[u8], current: &[u8]) -> Visit {
        match walk {
            Walk::Exact if current != key => Visit::Stop,
            Walk::Prefix if !current.starts_with(key) => Visit::Stop,
            Walk::Descending if self.bounded_range_walk && current > key => Visit::Skip,
            Walk::Ascending | Walk::Descending
                if self.bounded_range_walk && current.first() != Some(&FORWARD_TAG) =>
            {
                Visit::Stop
            }
            _ => Visit::Take,
        }
    }
}

impl fmt::Debug for IndexScanEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexScanEngine")
            .field("bounded_range_walk", &self.bounded_range_walk)
            .finish_non_exhaustive()
    }
}
