use crate::extract::canonical::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// One extracted item, as written to the record log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    /// Locator of the page the record was found on
    pub source: String,

    /// Canonical field values
    pub fields: BTreeMap<String, String>,

    /// Names of image artifacts stored for this record
    #[serde(default)]
    pub artifacts: Vec<String>,

    pub fingerprint: Fingerprint,

    pub discovered_at: DateTime<Utc>,

    /// Link distance of the source page from its seed
    #[serde(default)]
    pub depth: u32,

    /// Locator of the page that linked to the source, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
}

/// Image bytes under a content-addressed name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageArtifact {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl ImageArtifact {
    /// Names the payload by its SHA-256, with an extension from its format
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let digest = hex::encode(Sha256::digest(&bytes));
        let extension = image::guess_format(&bytes)
            .ok()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("bin");
        Self {
            name: format!("{}.{}", digest, extension),
            bytes,
        }
    }
}
