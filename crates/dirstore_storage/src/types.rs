//! Handle and flag types shared by every engine implementation.

use std::cmp::Ordering;
use std::fmt;

/// Opaque handle to an engine transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnHandle(pub u64);

impl TxnHandle {
    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Opaque handle to a named table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableHandle(pub u32);

impl TableHandle {
    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// Opaque handle to a cursor bound to one transaction and one table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CursorHandle(pub u64);

/// Access mode of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Snapshot reads only.
    ReadOnly,
    /// Reads and writes; top-level write transactions are serialized.
    ReadWrite,
}

impl AccessMode {
    /// Returns true for [`AccessMode::ReadWrite`].
    #[must_use]
    pub const fn is_write(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// Cursor positioning operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorOp {
    /// First key, first duplicate.
    First,
    /// Last key, last duplicate.
    Last,
    /// Exactly the supplied key.
    Set,
    /// First key greater than or equal to the supplied key.
    SetRange,
    /// Next duplicate, or the first duplicate of the next key.
    Next,
    /// Next duplicate of the current key only.
    NextDup,
    /// Previous duplicate, or the last duplicate of the previous key.
    Prev,
}

/// Ordering applied to the duplicate values stored under one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DupOrder {
    /// Plain byte-wise comparison.
    #[default]
    Lexicographic,
    /// Shorter values first, then byte-wise.
    ///
    /// Minimal big-endian integers compare numerically under this order.
    LengthThenLexicographic,
}

impl DupOrder {
    /// Compares two duplicate values.
    #[must_use]
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Self::Lexicographic => a.cmp(b),
            Self::LengthThenLexicographic => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
        }
    }
}

/// Flags applied when a table is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TableFlags {
    /// Whether a key may hold several sorted values.
    pub dup_sort: bool,
    /// Ordering of the values under one key.
    pub dup_order: DupOrder,
}

impl TableFlags {
    /// A table with one value per key.
    pub const UNIQUE: Self = Self {
        dup_sort: false,
        dup_order: DupOrder::Lexicographic,
    };

    /// Creates flags for a table with sorted duplicates.
    #[must_use]
    pub const fn dup_sort(order: DupOrder) -> Self {
        Self {
            dup_sort: true,
            dup_order: order,
        }
    }
}

/// Flags applied to a single put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PutFlags {
    /// Fail with `KeyExists` when the key is already present.
    pub no_overwrite: bool,
}

impl PutFlags {
    /// Overwrite (or add a duplicate) freely.
    pub const NONE: Self = Self {
        no_overwrite: false,
    };

    /// Refuse to touch an existing key.
    pub const NO_OVERWRITE: Self = Self { no_overwrite: true };
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn minimal_be(x: u64) -> Vec<u8> {
        let skip = (x.leading_zeros() / 8).min(7) as usize;
        x.to_be_bytes()[skip..].to_vec()
    }

    proptest! {
        #[test]
        fn length_first_order_matches_numeric_order(a: u64, b: u64) {
            prop_assert_eq!(
                DupOrder::LengthThenLexicographic.compare(&minimal_be(a), &minimal_be(b)),
                a.cmp(&b)
            );
        }
    }

    #[test]
    fn length_first_order_sorts_minimal_integers_numerically() {
        let order = DupOrder::LengthThenLexicographic;
        assert_eq!(order.compare(&[9], &[1, 0]), Ordering::Less);
        assert_eq!(order.compare(&[1, 0], &[1, 1]), Ordering::Less);
        assert_eq!(DupOrder::Lexicographic.compare(&[9], &[1, 0]), Ordering::Greater);
    }

    #[test]
    fn access_mode_is_write() {
        assert!(AccessMode::ReadWrite.is_write());
        assert!(!AccessMode::ReadOnly.is_write());
    }
}
