//! Canonical field form and content fingerprints
//!
//! Two records are the same logical item when their canonical fields are
//! equal. Canonical form sorts keys, collapses whitespace and drops fields
//! whose value ends up empty. Decoded QR payloads are kept byte for byte.
//! The fingerprint is SHA-256 over that form, so it does not depend on where
//! or when the item was found.

use crate::extract::parser::normalize_whitespace;
use crate::extract::QR_PAYLOAD_FIELD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Hex-encoded SHA-256 of a record's canonical fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns the canonical form of `fields`
pub fn canonicalize<'a, I>(fields: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    fields
        .into_iter()
        .filter_map(|(key, value)| {
            let key = normalize_whitespace(key);
            let value = if key == QR_PAYLOAD_FIELD {
                value.clone()
            } else {
                normalize_whitespace(value)
            };
            (!key.is_empty() && !value.is_empty()).then_some((key, value))
        })
        .collect()
}

/// Fingerprints already-canonical fields
///
/// Keys and values are separated by the ASCII unit/record separators so
/// that no pair of distinct field sets can serialize to the same bytes.
pub fn fingerprint(canonical: &BTreeMap<String, String>) -> Fingerprint {
    let mut hasher = Sha256::new();
    for (key, value) in canonical {
        hasher.update(key.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.as_bytes());
        hasher.update([0x1e]);
    }
    Fingerprint(hex::encode(hasher.finalize()))
}
