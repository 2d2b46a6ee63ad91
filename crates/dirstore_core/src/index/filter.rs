//! Filter components handed to the index scan engine.

use crate::index::catalog::{IndexKind, ATTR_PARENT_ID};

/// Substring assertion fragments. Values are normalized bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubstringPattern {
    /// Fragment the value must start with.
    pub initial: Option<Vec<u8>>,
    /// Fragments the value must contain, in order.
    pub any: Vec<Vec<u8>>,
    /// Fragment the value must end with.
    pub final_value: Option<Vec<u8>>,
}

impl SubstringPattern {
    /// Pattern `initial*`.
    pub fn starts_with(initial: impl AsRef<[u8]>) -> Self {
        Self {
            initial: Some(initial.as_ref().to_vec()),
            ..Self::default()
        }
    }

    /// Pattern `*final`.
    pub fn ends_with(final_value: impl AsRef<[u8]>) -> Self {
        Self {
            final_value: Some(final_value.as_ref().to_vec()),
            ..Self::default()
        }
    }

    /// Pattern `*any*`.
    pub fn contains(any: impl AsRef<[u8]>) -> Self {
        Self {
            any: vec![any.as_ref().to_vec()],
            ..Self::default()
        }
    }
}

/// The assertion a filter component makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterChoice {
    /// `attr=value`.
    Equality {
        /// Attribute name.
        attr: String,
        /// Normalized value.
        value: Vec<u8>,
    },
    /// `attr>=value`.
    GreaterOrEqual {
        /// Attribute name.
        attr: String,
        /// Normalized value.
        value: Vec<u8>,
    },
    /// `attr<=value`.
    LessOrEqual {
        /// Attribute name.
        attr: String,
        /// Normalized value.
        value: Vec<u8>,
    },
    /// `attr=initial*any*final`.
    Substrings {
        /// Attribute name.
        attr: String,
        /// Fragments.
        pattern: SubstringPattern,
    },
    /// Direct children of an entry.
    OneLevel {
        /// Normalized DN of the parent.
        parent_dn: String,
    },
}

impl FilterChoice {
    /// Returns the attribute whose index serves this assertion.
    #[must_use]
    pub fn attr(&self) -> &str {
        match self {
            Self::Equality { attr, .. }
            | Self::GreaterOrEqual { attr, .. }
            | Self::LessOrEqual { attr, .. }
            | Self::Substrings { attr, .. } => attr,
            Self::OneLevel { .. } => ATTR_PARENT_ID,
        }
    }

    /// Returns the index kinds able to serve this assertion.
    #[must_use]
    pub fn served_by(&self) -> &'static [IndexKind] {
        match self {
            Self::Equality { .. } => &[IndexKind::Equality],
            Self::GreaterOrEqual { .. } | Self::LessOrEqual { .. } => {
                &[IndexKind::Range, IndexKind::Equality]
            }
            Self::Substrings { pattern, .. } if pattern.initial.is_some() => {
                &[IndexKind::Substring, IndexKind::Equality]
            }
            Self::Substrings { .. } => &[IndexKind::Substring],
            Self::OneLevel { .. } => &[IndexKind::OneLevelScope],
        }
    }
}

/// One component of a search filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterComponent {
    /// The assertion.
    pub choice: FilterChoice,
    /// Hard cap on candidates; exceeding it abandons the index scan
    /// (0 = unlimited).
    pub max_index_scan: usize,
}

impl FilterComponent {
    /// Creates a component with no scan cap.
    #[must_use]
    pub const fn new(choice: FilterChoice) -> Self {
        Self {
            choice,
            max_index_scan: 0,
        }
    }

    /// `attr=value`.
    pub fn equality(attr: &str, value: impl AsRef<[u8]>) -> Self {
        Self::new(FilterChoice::Equality {
            attr: attr.to_ascii_lowercase(),
            value: value.as_ref().to_vec(),
        })
    }

    /// `attr>=value`.
    pub fn greater_or_equal(attr: &str, value: impl AsRef<[u8]>) -> Self {
        Self::new(FilterChoice::GreaterOrEqual {
            attr: attr.to_ascii_lowercase(),
            value: value.as_ref().to_vec(),
        })
    }

    /// `attr<=value`.
    pub fn less_or_equal(attr: &str, value: impl AsRef<[u8]>) -> Self {
        Self::new(FilterChoice::LessOrEqual {
            attr: attr.to_ascii_lowercase(),
            value: value.as_ref().to_vec(),
        })
    }

    /// Substring assertion.
    #[must_use]
    pub fn substrings(attr: &str, pattern: SubstringPattern) -> Self {
        Self::new(FilterChoice::Substrings {
            attr: attr.to_ascii_lowercase(),
            pattern,
        })
    }

    /// Children of the entry named by `parent_dn`.
    pub fn one_level(parent_dn: impl Into<String>) -> Self {
        Self::new(FilterChoice::OneLevel {
            parent_dn: parent_dn.into(),
        })
    }

    /// Sets the hard scan cap.
    #[must_use]
    pub fn with_max_index_scan(mut self, max: usize) -> Self {
        self.max_index_scan = max;
        self
    }
}
