//! Core type definitions for the directory backend.

use crate::codec;
use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Identifier of a directory entry.
///
/// Identifiers are assigned from a monotonically increasing sequence and
/// never reused. Values below the sequence start are reserved.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl EntryId {
    /// Placeholder for "no entry", e.g. the parent of the root DSE.
    pub const NONE: Self = Self(0);

    /// The root DSE, addressed by the empty DN.
    pub const DSE_ROOT: Self = Self(1);

    /// Creates a new entry ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Encodes the ID as a B+tree key.
    #[must_use]
    pub fn to_key(self) -> Vec<u8> {
        codec::encode(self.0)
    }

    /// Decodes an ID stored as a key or value.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are empty or too long.
    pub fn from_key(bytes: &[u8]) -> CoreResult<Self> {
        codec::decode(bytes).map(Self)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eid:{}", self.0)
    }
}

/// Update sequence number stamped on every change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Usn(pub u64);

impl Usn {
    /// Creates a new USN.
    #[must_use]
    pub const fn new(usn: u64) -> Self {
        Self(usn)
    }

    /// Returns the raw USN value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Usn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "usn:{}", self.0)
    }
}

/// Identity of a backend instance, recorded on the transactions it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackendId(pub u32);

static NEXT_BACKEND_ID: AtomicU32 = AtomicU32::new(1);

impl BackendId {
    /// Allocates an identity distinct from every other one in the process.
    #[must_use]
    pub fn allocate() -> Self {
        Self(NEXT_BACKEND_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "backend:{}", self.0)
    }
}

/// The two logical databases a backend drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Database {
    /// The entry store.
    Main,
    /// The internal log/journal store.
    Log,
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => f.write_str("main"),
            Self::Log => f.write_str("log"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_key_round_trip() {
        let eid = EntryId::new(70_000);
        assert_eq!(eid.to_key(), vec![0x01, 0x11, 0x70]);
        assert_eq!(EntryId::from_key(&eid.to_key()).unwrap(), eid);
    }

    #[test]
    fn display_formats() {
        assert_eq!(EntryId::new(7).to_string(), "eid:7");
        assert_eq!(Usn::new(100).to_string(), "usn:100");
        assert_eq!(Database::Log.to_string(), "log");
    }

    #[test]
    fn backend_ids_are_distinct() {
        assert_ne!(BackendId::allocate(), BackendId::allocate());
    }
}
