//! Distinguished name helpers.
//!
//! Index keys use the normalized DN form: every RDN lowercased with the
//! whitespace around separators removed. The root DSE is the empty DN.

/// Byte offsets of the RDN separators, skipping escaped commas.
fn separators(dn: &str) -> impl Iterator<Item = usize> + '_ {
    let mut escaped = false;
    dn.char_indices().filter_map(move |(idx, ch)| {
        if escaped {
            escaped = false;
            return None;
        }
        match ch {
            '\\' => {
                escaped = true;
                None
            }
            ',' => Some(idx),
            _ => None,
        }
    })
}

/// Splits a DN into its RDNs, leftmost first.
#[must_use]
pub fn split_rdns(dn: &str) -> Vec<&str> {
    if dn.is_empty() {
        return Vec::new();
    }
    let mut rdns = Vec::new();
    let mut start = 0;
    for idx in separators(dn) {
        rdns.push(&dn[start..idx]);
        start = idx + 1;
    }
    rdns.push(&dn[start..]);
    rdns
}

fn normalize_rdn(rdn: &str) -> String {
    match rdn.split_once('=') {
        Some((attr, value)) => format!(
            "{}={}",
            attr.trim().to_lowercase(),
            value.trim().to_lowercase()
        ),
        None => rdn.trim().to_lowercase(),
    }
}

/// Returns the normalized form of `dn`.
#[must_use]
pub fn normalize(dn: &str) -> String {
    let dn = dn.trim();
    split_rdns(dn)
        .into_iter()
        .map(normalize_rdn)
        .collect::<Vec<_>>()
        .join(",")
}

/// Returns the parent of a normalized DN, or `None` for the root DSE.
///
/// A single-RDN DN has the root DSE (the empty DN) as its parent.
#[must_use]
pub fn parent(normalized: &str) -> Option<&str> {
    if normalized.is_empty() {
        return None;
    }
    match separators(normalized).next() {
        Some(idx) => Some(&normalized[idx + 1..]),
        None => Some(""),
    }
}
