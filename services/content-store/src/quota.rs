//! Store-wide size accounting and admission of prospective writes.
//!
//! The total is recomputed from the blobs directory on every call. Admitted
//! writes hold a [`Reservation`] until their blob is on disk, so the bytes of
//! in-flight writes are counted by concurrent admissions as well. Holders must
//! release it as soon as the blob lands, or the scan counts those bytes twice.

use crate::error::{StoreError, StoreResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Per-file and store-wide size limits over one blob directory.
#[derive(Debug)]
pub struct QuotaGuard {
    blobs: PathBuf,
    file_limit: u64,
    store_limit: u64,
    pending: Arc<AtomicU64>,
    gate: Mutex<()>,
}

/// Bytes admitted but not yet released.
#[derive(Debug)]
#[must_use = "dropping a reservation releases the admitted bytes"]
pub struct Reservation {
    pending: Arc<AtomicU64>,
    bytes: u64,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.pending.fetch_sub(self.bytes, Ordering::SeqCst);
    }
}

/// Whether a write of `candidate` bytes fits, given the current total and
/// the size of the blob it replaces.
pub fn fits(
    file_limit: u64,
    store_limit: u64,
    total: u64,
    candidate: u64,
    replacing: u64,
) -> bool {
    if candidate > file_limit {
        return false;
    }
    total.saturating_sub(replacing).saturating_add(candidate) <= store_limit
}

impl QuotaGuard {
    pub fn new(blobs: impl AsRef<Path>, file_limit: u64, store_limit: u64) -> Self {
        Self {
            blobs: blobs.as_ref().to_path_buf(),
            file_limit,
            store_limit,
            pending: Arc::new(AtomicU64::new(0)),
            gate: Mutex::new(()),
        }
    }

    pub fn file_limit(&self) -> u64 {
        self.file_limit
    }

    pub fn store_limit(&self) -> u64 {
        self.store_limit
    }

    /// Sum of the sizes of every regular file in the blobs directory.
    pub async fn current_total(&self) -> StoreResult<u64> {
        let mut total = 0u64;
        let mut entries = fs::read_dir(&self.blobs).await?;

        while let Some(entry) = entries.next_entry().await? {
            match entry.metadata().await {
                Ok(meta) if meta.is_file() => total += meta.len(),
                Ok(_) => {}
                // Deleted between listing and stat.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(total)
    }

    /// Admit a write of `candidate` bytes that replaces a blob of
    /// `replacing` bytes (0 for new content).
    #[instrument(skip(self))]
    pub async fn admit(&self, candidate: u64, replacing: u64) -> StoreResult<Reservation> {
        if candidate > self.file_limit {
            warn!(candidate, file_limit = self.file_limit, "Source exceeds file limit");
            metrics::counter!("store.quota.rejected").increment(1);
            return Err(StoreError::LargeSource);
        }

        let _gate = self.gate.lock().await;
        let total = self.current_total().await? + self.pending.load(Ordering::SeqCst);

        if !fits(self.file_limit, self.store_limit, total, candidate, replacing) {
            warn!(
                candidate,
                replacing,
                total,
                store_limit = self.store_limit,
                "Source exceeds store limit"
            );
            metrics::counter!("store.quota.rejected").increment(1);
            return Err(StoreError::LargeSource);
        }

        self.pending.fetch_add(candidate, Ordering::SeqCst);
        debug!(candidate, total, "Write admitted");

        Ok(Reservation {
            pending: self.pending.clone(),
            bytes: candidate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_fits() {
        assert!(fits(100, 1000, 0, 100, 0));
        assert!(!fits(100, 1000, 0, 101, 0));
        assert!(!fits(100, 1000, 950, 60, 0));
        // Replacing a 60-byte blob frees its space first.
        assert!(fits(100, 1000, 950, 60, 60));
        assert!(fits(100, 1000, 1000, 10, 10));
    }

    #[tokio::test]
    async fn test_current_total_scans_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a"), vec![0u8; 10]).unwrap();
        std::fs::write(dir.path().join("b"), vec![0u8; 32]).unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let guard = QuotaGuard::new(dir.path(), 100, 1000);
        assert_eq!(guard.current_total().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_admit_rejects_large_file() {
        let dir = TempDir::new().unwrap();
        let guard = QuotaGuard::new(dir.path(), 100, 1000);

        let result = guard.admit(101, 0).await;
        assert!(matches!(result, Err(StoreError::LargeSource)));
        let _ = assert_ok!(guard.admit(100, 0).await);
    }

    #[tokio::test]
    async fn test_reservations_count_against_later_admissions() {
        let dir = TempDir::new().unwrap();
        let guard = QuotaGuard::new(dir.path(), 100, 150);

        let first = guard.admit(100, 0).await.unwrap();
        assert_eq!(guard.pending.load(Ordering::SeqCst), 100);
        assert_err!(guard.admit(100, 0).await);

        drop(first);
        assert_eq!(guard.pending.load(Ordering::SeqCst), 0);
        let _ = assert_ok!(guard.admit(100, 0).await);
    }

    #[tokio::test]
    async fn test_update_that_does_not_grow_is_admitted() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("existing"), vec![0u8; 90]).unwrap();
        let guard = QuotaGuard::new(dir.path(), 100, 100);

        assert_err!(guard.admit(90, 0).await);
        let _ = assert_ok!(guard.admit(90, 90).await);
    }
}
