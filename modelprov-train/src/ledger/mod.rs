//! Write-once ledger clients.
//!
//! Every backend accepts only complete, signed entries and rejects a second
//! write of the same immutable hash with [`ProvenanceError::LedgerConflict`].
//! Callers hold an `Arc<dyn Ledger>` and never depend on the backend.

pub mod file;
pub mod memory;
pub mod remote;

pub use file::FileLedger;
pub use memory::InMemoryLedger;
pub use remote::RemoteLedger;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use modelprov_core::{LedgerEntry, ProvenanceError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Acknowledgement of a successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResult {
    pub immutable_hash: String,
    /// 0-based insertion position, when the backend reports one.
    pub sequence: Option<u64>,
    pub written_at: DateTime<Utc>,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Append a signed entry. Fails with `LedgerConflict` if the immutable
    /// hash is already present.
    async fn write(&self, entry: &LedgerEntry) -> Result<WriteResult>;

    /// Entries in insertion order.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<LedgerEntry>>;

    /// Look up one entry by immutable hash.
    async fn get(&self, immutable_hash: &str) -> Result<Option<LedgerEntry>>;

    /// Whether `entry` is recorded here and its signature checks out against
    /// the stored public key.
    async fn verify(&self, entry: &LedgerEntry) -> Result<bool> {
        if !entry.verify_signature() {
            return Ok(false);
        }
        Ok(self.get(&entry.immutable_hash).await?.is_some_and(|stored| {
            stored.signer_public_key == entry.signer_public_key && stored.verify_signature()
        }))
    }
}

/// Shared ledger handle.
pub type SharedLedger = Arc<dyn Ledger>;

/// Validation every backend applies before accepting a write.
pub(crate) fn validate_for_write(entry: &LedgerEntry) -> Result<()> {
    entry.check_required_fields()?;
    if !entry.verify_signature() {
        return Err(ProvenanceError::validation(
            "entry signature does not verify against signer_public_key",
        ));
    }
    Ok(())
}

pub(crate) fn conflict(entry: &LedgerEntry) -> ProvenanceError {
    ProvenanceError::LedgerConflict {
        immutable_hash: entry.immutable_hash.clone(),
    }
}

pub(crate) fn page(entries: &[LedgerEntry], limit: usize, offset: usize) -> Vec<LedgerEntry> {
    entries.iter().skip(offset).take(limit).cloned().collect()
}
