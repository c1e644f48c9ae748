//! Seen store: the durable record of fingerprints already digested.
//!
//! Wraps [`Storage`] with two guarantees the pipeline relies on:
//! - all mutations are serialized through one async lock, and inserts are
//!   insert-if-absent, so two callers claiming the same fingerprint cannot
//!   both succeed;
//! - when the database cannot be opened or a call fails, the store answers
//!   according to the configured [`FailOpen`] direction and logs it.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{error, warn};

use feeddigest_shared::{FailOpen, FeedDigestError, Fingerprint, Result, SeenRecord};

use crate::Storage;

pub struct SeenStore {
    backend: Option<Storage>,
    policy: FailOpen,
    write_lock: Mutex<()>,
    /// Claims made while the backend was failing (treat-as-new only).
    fallback_claims: Mutex<HashSet<Fingerprint>>,
}

impl SeenStore {
    /// Open the store at `path`. Never fails: an unusable database yields a
    /// degraded store that answers per `policy`.
    pub async fn open(path: &Path, policy: FailOpen) -> Self {
        match Storage::open(path).await {
            Ok(storage) => Self::with_storage(storage, policy),
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    fail_open = %policy,
                    "seen store unavailable, failing open"
                );
                Self::unavailable(policy)
            }
        }
    }

    /// Wrap an already-open database.
    pub fn with_storage(storage: Storage, policy: FailOpen) -> Self {
        Self {
            backend: Some(storage),
            policy,
            write_lock: Mutex::new(()),
            fallback_claims: Mutex::new(HashSet::new()),
        }
    }

    /// A store with no backend at all.
    pub fn unavailable(policy: FailOpen) -> Self {
        Self {
            backend: None,
            policy,
            write_lock: Mutex::new(()),
            fallback_claims: Mutex::new(HashSet::new()),
        }
    }

    /// True when the database could not be opened.
    pub fn is_degraded(&self) -> bool {
        self.backend.is_none()
    }

    /// The underlying database, when available.
    pub fn storage(&self) -> Option<&Storage> {
        self.backend.as_ref()
    }

    /// Whether `fingerprint` was already processed.
    pub async fn contains(&self, fingerprint: &Fingerprint) -> bool {
        let Some(storage) = &self.backend else {
            return self.fallback_contains(fingerprint).await;
        };
        match storage.seen_contains(fingerprint).await {
            Ok(found) => found,
            Err(e) => {
                warn!(
                    fingerprint = %fingerprint.short(),
                    error = %e,
                    fail_open = %self.policy,
                    "seen lookup failed, failing open"
                );
                self.fallback_contains(fingerprint).await
            }
        }
    }

    /// Record `fingerprint` as seen at `timestamp`.
    ///
    /// Returns `true` if this call created the record, `false` if it already
    /// existed (or the store is failing toward treat-as-seen).
    pub async fn insert(&self, fingerprint: Fingerprint, timestamp: DateTime<Utc>) -> bool {
        self.insert_record(&SeenRecord::bare(fingerprint, timestamp))
            .await
    }

    /// Like [`insert`](Self::insert), carrying feed/title metadata.
    pub async fn insert_record(&self, record: &SeenRecord) -> bool {
        let _guard = self.write_lock.lock().await;

        let Some(storage) = &self.backend else {
            return self.fallback_claim(record.fingerprint).await;
        };
        match storage.seen_insert(record).await {
            Ok(created) => created,
            Err(e) => {
                warn!(
                    fingerprint = %record.fingerprint.short(),
                    error = %e,
                    fail_open = %self.policy,
                    "seen insert failed, failing open"
                );
                self.fallback_claim(record.fingerprint).await
            }
        }
    }

    /// Remove records first seen before `older_than`. Returns the number removed.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        match &self.backend {
            Some(storage) => storage.seen_prune(older_than).await,
            None => Err(FeedDigestError::StoreUnavailable(
                "cannot prune: seen store is not open".into(),
            )),
        }
    }

    /// Number of seen records.
    pub async fn len(&self) -> Result<u64> {
        match &self.backend {
            Some(storage) => storage.seen_count().await,
            None => Err(FeedDigestError::StoreUnavailable(
                "seen store is not open".into(),
            )),
        }
    }

    async fn fallback_contains(&self, fingerprint: &Fingerprint) -> bool {
        match self.policy {
            FailOpen::TreatAsSeen => true,
            FailOpen::TreatAsNew => self.fallback_claims.lock().await.contains(fingerprint),
        }
    }

    async fn fallback_claim(&self, fingerprint: Fingerprint) -> bool {
        match self.policy {
            FailOpen::TreatAsSeen => false,
            FailOpen::TreatAsNew => self.fallback_claims.lock().await.insert(fingerprint),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fd_seen_{}.db", Uuid::now_v7()))
    }

    fn fp(n: u8) -> Fingerprint {
        Fingerprint::from_bytes([n; 32])
    }

    #[tokio::test]
    async fn contains_insert_prune() {
        let store = SeenStore::open(&temp_path(), FailOpen::TreatAsNew).await;
        assert!(!store.is_degraded());

        let now = Utc::now();
        assert!(!store.contains(&fp(1)).await);
        assert!(store.insert(fp(1), now - chrono::Duration::days(10)).await);
        assert!(store.contains(&fp(1)).await);
        assert!(!store.insert(fp(1), now).await);

        assert!(store.insert(fp(2), now).await);
        let removed = store.prune(now - chrono::Duration::days(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.contains(&fp(1)).await);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let path = temp_path();
        {
            let store = SeenStore::open(&path, FailOpen::TreatAsNew).await;
            assert!(store.insert(fp(9), Utc::now()).await);
        }
        let store = SeenStore::open(&path, FailOpen::TreatAsNew).await;
        assert!(store.contains(&fp(9)).await);
    }

    #[tokio::test]
    async fn concurrent_claims_of_one_fingerprint_have_one_winner() {
        let store = Arc::new(SeenStore::open(&temp_path(), FailOpen::TreatAsNew).await);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                if store.contains(&fp(42)).await {
                    return false;
                }
                store.insert(fp(42), Utc::now()).await
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn concurrent_inserts_of_distinct_fingerprints() {
        let store = Arc::new(SeenStore::open(&temp_path(), FailOpen::TreatAsNew).await);
        let mut handles = Vec::new();
        for n in 0..32u8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { store.insert(fp(n), Utc::now()).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(store.len().await.unwrap(), 32);
    }

    #[tokio::test]
    async fn corrupt_database_fails_open_as_new() {
        let path = temp_path();
        std::fs::write(&path, vec![b'x'; 8192]).unwrap();

        let store = SeenStore::open(&path, FailOpen::TreatAsNew).await;
        assert!(store.is_degraded());
        assert!(!store.contains(&fp(1)).await);
        // Claims still have exactly one winner in-process.
        assert!(store.insert(fp(1), Utc::now()).await);
        assert!(!store.insert(fp(1), Utc::now()).await);
        assert!(store.contains(&fp(1)).await);
        assert!(store.prune(Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn unavailable_store_fails_open_as_seen() {
        let store = SeenStore::unavailable(FailOpen::TreatAsSeen);
        assert!(store.is_degraded());
        assert!(store.contains(&fp(1)).await);
        assert!(!store.insert(fp(1), Utc::now()).await);
        assert!(store.len().await.is_err());
    }
}
