//! JSON-file ledger: the local default when no remote endpoint is configured.

use async_trait::async_trait;
use chrono::Utc;
use modelprov_core::persistence::{atomic_write_json, load_json};
use modelprov_core::{LedgerEntry, ProvenanceError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Ledger, WriteResult, conflict, page, validate_for_write};

const LOCK_RETRY: Duration = Duration::from_millis(20);
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Entries live on disk only; every write re-reads the file under an
/// exclusive sibling `.lock` so concurrent handles and processes append
/// instead of overwriting each other.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    writer: Mutex<()>,
}

impl FileLedger {
    /// Open the ledger at `path`, starting empty if the file does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let ledger = Self {
            path,
            writer: Mutex::new(()),
        };
        for entry in &ledger.read_entries()? {
            if !entry.verify_signature() {
                warn!(
                    path = %ledger.path.display(),
                    hash = %entry.immutable_hash,
                    "Stored ledger entry fails signature verification"
                );
            }
        }
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    fn read_entries(&self) -> Result<Vec<LedgerEntry>> {
        Ok(load_json(&self.path)?.unwrap_or_default())
    }
}

/// Cross-process write claim on a ledger file. Removed on drop.
#[derive(Debug)]
struct WriteLock {
    path: PathBuf,
}

impl WriteLock {
    async fn acquire(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let started = Instant::now();
        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut file) => {
                    file.write_all(format!("{}\n", std::process::id()).as_bytes())?;
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if started.elapsed() >= LOCK_TIMEOUT {
                        return Err(ProvenanceError::ledger(format!(
                            "timed out waiting for {}; remove it if no writer is active",
                            path.display()
                        )));
                    }
                    debug!(path = %path.display(), "Ledger file busy, retrying");
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => {
                    return Err(ProvenanceError::ledger(format!(
                        "cannot lock ledger {}: {e}",
                        path.display()
                    )));
                }
            }
        }
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove ledger lock");
        }
    }
}

#[async_trait]
impl Ledger for FileLedger {
    fn backend(&self) -> &'static str {
        "file"
    }

    async fn write(&self, entry: &LedgerEntry) -> Result<WriteResult> {
        validate_for_write(entry)?;
        let _writer = self.writer.lock().await;
        let _lock = WriteLock::acquire(self.lock_path()).await?;

        let mut entries = self.read_entries()?;
        if entries
            .iter()
            .any(|e| e.immutable_hash == entry.immutable_hash)
        {
            return Err(conflict(entry));
        }
        entries.push(entry.clone());
        atomic_write_json(&self.path, &entries).map_err(|e| {
            ProvenanceError::ledger(format!("cannot persist ledger {}: {e}", self.path.display()))
        })?;

        let sequence = (entries.len() - 1) as u64;
        info!(
            hash = %entry.immutable_hash,
            sequence,
            path = %self.path.display(),
            "Ledger entry written (file)"
        );
        Ok(WriteResult {
            immutable_hash: entry.immutable_hash.clone(),
            sequence: Some(sequence),
            written_at: Utc::now(),
        })
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<LedgerEntry>> {
        Ok(page(&self.read_entries()?, limit, offset))
    }

    async fn get(&self, immutable_hash: &str) -> Result<Option<LedgerEntry>> {
        Ok(self
            .read_entries()?
            .into_iter()
            .find(|e| e.immutable_hash == immutable_hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::test_support::signed_entry;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_once_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let (entry, _) = signed_entry(42);

        let ledger = FileLedger::open(&path).unwrap();
        assert_eq!(ledger.write(&entry).await.unwrap().sequence, Some(0));
        drop(ledger);

        let reopened = FileLedger::open(&path).unwrap();
        assert_eq!(reopened.list(10, 0).await.unwrap(), vec![entry.clone()]);
        let err = reopened.write(&entry).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(reopened.verify(&entry).await.unwrap());
    }

    #[tokio::test]
    async fn test_open_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let ledger = FileLedger::open(dir.path().join("nested").join("ledger.json")).unwrap();
        assert!(ledger.list(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_corrupt_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, "[{").unwrap();
        assert!(FileLedger::open(&path).is_err());
    }

    #[tokio::test]
    async fn test_failed_persist_rolls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let ledger = FileLedger::open(&path).unwrap();
        // A directory squatting on the temp path makes the write fail.
        std::fs::create_dir(dir.path().join("ledger.json.tmp")).unwrap();
        let (entry, _) = signed_entry(1);
        let err = ledger.write(&entry).await.unwrap_err();
        assert!(matches!(err, ProvenanceError::Ledger(_)));
        assert!(ledger.list(10, 0).await.unwrap().is_empty());
        assert!(!dir.path().join("ledger.json.lock").exists());
    }

    #[tokio::test]
    async fn test_two_handles_on_one_file_keep_both_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let first = FileLedger::open(&path).unwrap();
        let second = FileLedger::open(&path).unwrap();
        let (a, _) = signed_entry(1);
        let (b, _) = signed_entry(2);

        assert_eq!(first.write(&a).await.unwrap().sequence, Some(0));
        assert_eq!(second.write(&b).await.unwrap().sequence, Some(1));
        // write-once holds across handles too
        assert!(second.write(&a).await.unwrap_err().is_conflict());
        assert_eq!(first.list(10, 0).await.unwrap(), vec![a.clone(), b.clone()]);

        let reopened = FileLedger::open(&path).unwrap();
        assert_eq!(reopened.list(10, 0).await.unwrap(), vec![a, b]);
        assert!(!dir.path().join("ledger.json.lock").exists());
    }

    #[tokio::test]
    async fn test_concurrent_writers_all_land() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        let mut tasks = Vec::new();
        for seed in 0..8u64 {
            let ledger = FileLedger::open(&path).unwrap();
            tasks.push(tokio::spawn(async move {
                let (entry, _) = signed_entry(seed);
                ledger.write(&entry).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let stored = FileLedger::open(&path).unwrap().list(100, 0).await.unwrap();
        assert_eq!(stored.len(), 8);
    }

    #[tokio::test]
    async fn test_stale_lock_times_out_with_hint() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(dir.path().join("ledger.json.lock"), "1\n").unwrap();
        tokio::time::pause();
        let ledger = FileLedger::open(&path).unwrap();
        let (entry, _) = signed_entry(3);
        let err = ledger.write(&entry).await.unwrap_err();
        assert!(err.to_string().contains("remove it if no writer is active"));
    }
}
