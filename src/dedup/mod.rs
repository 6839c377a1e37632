//! Content deduplication
//!
//! The admitted set lives in memory and is rebuilt from the record log at
//! startup, so the log stays the only durable copy.

use crate::extract::{ExtractedRecord, Fingerprint};
use crate::state::HealthReporter;
use dashmap::DashSet;
use std::sync::Arc;

/// Set of fingerprints already admitted to the record log
pub struct Deduplicator {
    admitted: DashSet<Fingerprint>,
    health: Arc<HealthReporter>,
}

impl Deduplicator {
    pub fn new(health: Arc<HealthReporter>) -> Self {
        Self {
            admitted: DashSet::new(),
            health,
        }
    }

    /// Seeds the set with fingerprints replayed from the record log
    pub fn from_fingerprints<I>(fingerprints: I, health: Arc<HealthReporter>) -> Self
    where
        I: IntoIterator<Item = Fingerprint>,
    {
        let dedup = Self::new(health);
        for fingerprint in fingerprints {
            dedup.admitted.insert(fingerprint);
        }
        dedup
    }

    /// Returns true exactly once per distinct fingerprint
    ///
    /// The insert is atomic per shard, so of several concurrent callers with
    /// the same fingerprint only one sees `true`. Rejected records are only
    /// counted.
    pub fn admit(&self, record: &ExtractedRecord) -> bool {
        if self.admitted.insert(record.fingerprint.clone()) {
            true
        } else {
            tracing::trace!(
                "Discarding duplicate {} from {}",
                record.fingerprint,
                record.source
            );
            self.health.duplicate_discarded();
            false
        }
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.admitted.contains(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{canonicalize, fingerprint};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn record(source: &str, title: &str) -> ExtractedRecord {
        let fields = canonicalize(&BTreeMap::from([("title".to_string(), title.to_string())]));
        ExtractedRecord {
            source: source.to_string(),
            fingerprint: fingerprint(&fields),
            fields,
            artifacts: Vec::new(),
            discovered_at: Utc::now(),
            depth: 0,
            via: None,
        }
    }

    #[test]
    fn test_admit_once() {
        let health = Arc::new(HealthReporter::new());
        let dedup = Deduplicator::new(health.clone());

        assert!(dedup.admit(&record("https://a.test/1", "Widget")));
        assert!(!dedup.admit(&record("https://a.test/2", "Widget")));
        assert!(dedup.admit(&record("https://a.test/3", "Gadget")));
        assert_eq!(dedup.len(), 2);
        assert_eq!(health.snapshot().duplicates_discarded, 1);
    }

    #[test]
    fn test_replayed_fingerprints_are_rejected() {
        let seen = record("https://a.test/", "Widget");
        let dedup = Deduplicator::from_fingerprints(
            vec![seen.fingerprint.clone()],
            Arc::new(HealthReporter::new()),
        );

        assert!(dedup.contains(&seen.fingerprint));
        assert!(!dedup.admit(&seen));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admit_has_single_winner() {
        let dedup = Arc::new(Deduplicator::new(Arc::new(HealthReporter::new())));

        let mut handles = Vec::new();
        for i in 0..32 {
            let dedup = Arc::clone(&dedup);
            handles.push(tokio::spawn(async move {
                dedup.admit(&record(&format!("https://a.test/{}", i), "Same"))
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
