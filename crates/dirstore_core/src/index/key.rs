//! Tagged index keys.
//!
//! Every attribute index table holds two key namespaces, told apart by a
//! leading tag byte: forward keys (`'0'`) carry the value as-is and serve
//! equality, range, and initial-substring lookups; reverse keys (`'1'`)
//! carry the value back-to-front so a forward prefix walk finds suffixes.

/// Tag byte of the forward key namespace.
pub const FORWARD_TAG: u8 = b'0';

/// Tag byte of the reverse key namespace.
pub const REVERSE_TAG: u8 = b'1';

/// A key into an attribute index table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexKey {
    /// Normalized value bytes, stored in order.
    Forward(Vec<u8>),
    /// Normalized value bytes, stored reversed.
    Reverse(Vec<u8>),
}

impl IndexKey {
    /// Creates a forward key for a value.
    pub fn forward(value: impl AsRef<[u8]>) -> Self {
        Self::Forward(value.as_ref().to_vec())
    }

    /// Creates a reverse key for a value (or a final substring fragment).
    pub fn reverse(value: impl AsRef<[u8]>) -> Self {
        Self::Reverse(value.as_ref().to_vec())
    }

    /// Returns the namespace tag byte.
    #[must_use]
    pub const fn tag(&self) -> u8 {
        match self {
            Self::Forward(_) => FORWARD_TAG,
            Self::Reverse(_) => REVERSE_TAG,
        }
    }

    /// Serializes the key as stored in the index table.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + self.value_len());
        bytes.push(self.tag());
        match self {
            Self::Forward(value) => bytes.extend_from_slice(value),
            Self::Reverse(value) => bytes.extend(value.iter().rev()),
        }
        bytes
    }

    /// Parses a stored key back into its namespace and value.
    ///
    /// Returns `None` for keys outside both namespaces.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (tag, rest) = bytes.split_first()?;
        match *tag {
            FORWARD_TAG => Some(Self::Forward(rest.to_vec())),
            REVERSE_TAG => Some(Self::Reverse(rest.iter().rev().copied().collect())),
            _ => None,
        }
    }

    /// Returns the value carried by the key, in its natural order.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        match self {
            Self::Forward(value) | Self::Reverse(value) => value,
        }
    }

    fn value_len(&self) -> usize {
        self.value().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_key_is_tag_then_value() {
        assert_eq!(IndexKey::forward("smith").to_bytes(), b"0smith".to_vec());
    }

    #[test]
    fn reverse_key_reverses_value() {
        assert_eq!(IndexKey::reverse("example.com").to_bytes(), b"1moc.elpmaxe".to_vec());
        // a final fragment becomes a prefix of the stored reverse key
        assert!(IndexKey::reverse("example.com")
            .to_bytes()
            .starts_with(&IndexKey::reverse("com").to_bytes()));
    }

    #[test]
    fn from_bytes_restores_natural_order() {
        let key = IndexKey::from_bytes(b"1moc").unwrap();
        assert_eq!(key, IndexKey::reverse("com"));
        assert_eq!(key.value(), b"com");
        assert_eq!(IndexKey::from_bytes(b"2x"), None);
        assert_eq!(IndexKey::from_bytes(b""), None);
    }
}
