//! In-process ledger for tests and dry runs.

use async_trait::async_trait;
use chrono::Utc;
use modelprov_core::{LedgerEntry, ProvenanceError, Result};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use super::{Ledger, WriteResult, conflict, page, validate_for_write};

#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry.
    pub fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<LedgerEntry>>> {
        self.entries
            .lock()
            .map_err(|_| ProvenanceError::ledger("in-memory ledger lock poisoned"))
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn write(&self, entry: &LedgerEntry) -> Result<WriteResult> {
        validate_for_write(entry)?;
        let mut entries = self.lock()?;
        if entries
            .iter()
            .any(|e| e.immutable_hash == entry.immutable_hash)
        {
            return Err(conflict(entry));
        }
        let sequence = entries.len() as u64;
        entries.push(entry.clone());
        info!(hash = %entry.immutable_hash, sequence, "Ledger entry written (memory)");
        Ok(WriteResult {
            immutable_hash: entry.immutable_hash.clone(),
            sequence: Some(sequence),
            written_at: Utc::now(),
        })
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<LedgerEntry>> {
        Ok(page(&self.lock()?, limit, offset))
    }

    async fn get(&self, immutable_hash: &str) -> Result<Option<LedgerEntry>> {
        Ok(self
            .lock()?
            .iter()
            .find(|e| e.immutable_hash == immutable_hash)
            .cloned())
    }
}
