//! Directory entries and the modifications applied to them.

use crate::error::{CoreError, CoreResult};
use crate::types::{EntryId, Usn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A stored directory entry.
///
/// Entries are persisted as CBOR blobs keyed by their encoded [`EntryId`].
/// Attribute names are kept lowercased; values are stored as supplied and
/// indexed byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Identifier of this entry.
    pub eid: EntryId,
    /// DN as supplied when the entry was added.
    pub dn: String,
    /// Normalized DN.
    pub normalized_dn: String,
    /// Identifier of the parent entry ([`EntryId::NONE`] for the root DSE).
    pub parent_id: EntryId,
    /// Globally unique identifier.
    pub object_guid: Uuid,
    /// USN assigned when the entry was added.
    pub usn_created: Usn,
    /// USN of the latest change.
    pub usn_changed: Usn,
    /// Attribute values keyed by lowercased attribute name.
    pub attributes: BTreeMap<String, Vec<String>>,
}

impl Entry {
    /// Returns the values of an attribute, empty if absent.
    #[must_use]
    pub fn values(&self, attr: &str) -> &[String] {
        self.attributes
            .get(&attr.to_ascii_lowercase())
            .map_or(&[][..], Vec::as_slice)
    }

    /// Encodes the entry as a CBOR blob.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let mut blob = Vec::new();
        ciborium::into_writer(self, &mut blob).map_err(|e| CoreError::codec(e.to_string()))?;
        Ok(blob)
    }

    /// Decodes an entry from a CBOR blob.
    ///
    /// # Errors
    ///
    /// Returns an error if the blob is not a valid entry.
    pub fn decode(blob: &[u8]) -> CoreResult<Self> {
        ciborium::from_reader(blob).map_err(|e| CoreError::codec(e.to_string()))
    }
}

/// An entry to be added.
#[derive(Debug, Clone, Default)]
pub struct NewEntry {
    /// DN of the new entry.
    pub dn: String,
    /// Attribute values.
    pub attributes: BTreeMap<String, Vec<String>>,
    /// GUID to use instead of a freshly generated one.
    pub object_guid: Option<Uuid>,
}

impl NewEntry {
    /// Creates an entry with no attributes.
    #[must_use]
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Self::default()
        }
    }

    /// Adds values to an attribute.
    #[must_use]
    pub fn attribute<I, V>(mut self, attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        self.attributes
            .entry(attr.to_ascii_lowercase())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Pins the entry's GUID.
    #[must_use]
    pub const fn object_guid(mut self, guid: Uuid) -> Self {
        self.object_guid = Some(guid);
        self
    }
}

/// Kind of a single attribute modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    /// Add values, keeping existing ones.
    Add,
    /// Remove the listed values, or the whole attribute when none are listed.
    Delete,
    /// Replace all values; an empty list removes the attribute.
    Replace,
}

/// One attribute modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    /// What to do.
    pub op: ModOp,
    /// Attribute name.
    pub attr: String,
    /// Values involved.
    pub values: Vec<String>,
}

impl Modification {
    /// Creates a modification.
    pub fn new<I, V>(op: ModOp, attr: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        Self {
            op,
            attr: attr.to_ascii_lowercase(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Applies this modification to an attribute map.
    pub(crate) fn apply(&self, attributes: &mut BTreeMap<String, Vec<String>>) {
        match self.op {
            ModOp::Add => {
                let current = attributes.entry(self.attr.clone()).or_default();
                for value in &self.values {
                    if !current.contains(value) {
                        current.push(value.clone());
                    }
                }
            }
            ModOp::Delete if self.values.is_empty() => {
                attributes.remove(&self.attr);
            }
            ModOp::Delete => {
                if let Some(current) = attributes.get_mut(&self.attr) {
                    current.retain(|value| !self.values.contains(value));
                }
            }
            ModOp::Replace => {
                attributes.insert(self.attr.clone(), self.values.clone());
            }
        }
        if attributes.get(&self.attr).is_some_and(Vec::is_empty) {
            attributes.remove(&self.attr);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Entry {
        Entry {
            eid: EntryId::new(100),
            dn: "cn=Smith,dc=com".into(),
            normalized_dn: "cn=smith,dc=com".into(),
            parent_id: EntryId::new(101),
            object_guid: Uuid::new_v4(),
            usn_created: Usn::new(100),
            usn_changed: Usn::new(100),
            attributes: BTreeMap::from([("sn".to_string(), vec!["smith".to_string()])]),
        }
    }

    #[test]
    fn blob_round_trip() {
        let entry = sample();
        let blob = entry.encode().unwrap();
        assert_eq!(Entry::decode(&blob).unwrap(), entry);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Entry::decode(&[0xFF, 0x00, 0x13]),
            Err(CoreError::Codec { .. })
        ));
    }

    #[test]
    fn values_lookup_is_case_insensitive() {
        let entry = sample();
        assert_eq!(entry.values("SN"), ["smith".to_string()]);
        assert!(entry.values("cn").is_empty());
    }

    #[test]
    fn modifications_add_delete_replace() {
        let mut attrs = BTreeMap::new();
        Modification::new(ModOp::Add, "mail", ["a@x", "b@x"]).apply(&mut attrs);
        Modification::new(ModOp::Add, "mail", ["a@x"]).apply(&mut attrs);
        assert_eq!(attrs["mail"], vec!["a@x", "b@x"]);

        Modification::new(ModOp::Delete, "mail", ["a@x"]).apply(&mut attrs);
        assert_eq!(attrs["mail"], vec!["b@x"]);

        Modification::new(ModOp::Replace, "mail", ["c@x"]).apply(&mut attrs);
        assert_eq!(attrs["mail"], vec!["c@x"]);

        Modification::new(ModOp::Delete, "mail", Vec::<String>::new()).apply(&mut attrs);
        assert!(!attrs.contains_key("mail"));

        Modification::new(ModOp::Replace, "cn", Vec::<String>::new()).apply(&mut attrs);
        assert!(!attrs.contains_key("cn"));
    }
}
