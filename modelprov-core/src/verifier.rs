//! Offline integrity verification of a certified bundle.
//!
//! Everything is recomputed from the bundle's own files and the referenced
//! datasets on the local filesystem. Nothing here touches the network and the
//! bundle is never modified.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::bundle::{LoadedBundle, read_bundle};
use crate::canonical::canonically_equal;
use crate::categories::extract_categories;
use crate::dna::DnaFingerprint;
use crate::entry::{DatasetHash, immutable_hash_of_value};
use crate::error::Result;
use crate::persistence::sha256_file;
use crate::signing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DnaStatus {
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedgerStatus {
    Synced,
    Unsigned,
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DatasetStatus {
    Unchanged,
    Modified,
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Overall {
    Valid,
    Invalid,
}

/// Result of re-hashing one referenced dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetCheck {
    pub path: String,
    /// Where the file was actually found, if anywhere.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
    pub expected_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_hash: Option<String>,
    pub status: DatasetStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDetails {
    pub dna: Vec<String>,
    pub ledger: Vec<String>,
    pub datasets: Vec<DatasetCheck>,
}

/// Machine-readable verification outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub dna: DnaStatus,
    pub ledger: LedgerStatus,
    pub datasets: DatasetStatus,
    pub overall: Overall,
    pub details: ReportDetails,
}

impl VerificationReport {
    pub fn is_valid(&self) -> bool {
        self.overall == Overall::Valid
    }
}

/// Re-verifies bundles. Stateless apart from the optional dataset root.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    dataset_root: Option<PathBuf>,
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve datasets that are not at their recorded path by file name
    /// under `root`, for bundles moved to another host.
    pub fn with_dataset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dataset_root = Some(root.into());
        self
    }

    /// Verify the bundle at `bundle_path`.
    ///
    /// Only a structurally unreadable bundle is an error; every content
    /// mismatch is reported in the returned report.
    pub fn verify(&self, bundle_path: &Path) -> Result<VerificationReport> {
        let bundle = read_bundle(bundle_path)?;

        let mut details = ReportDetails::default();
        let dna = check_dna(&bundle, &mut details.dna);
        let ledger = check_ledger(&bundle, &mut details.ledger);
        details.datasets = bundle
            .entry
            .dataset_hashes
            .iter()
            .map(|d| self.check_dataset(d))
            .collect();
        let datasets = summarize_datasets(&details.datasets);

        let overall = if dna == DnaStatus::Valid
            && ledger == LedgerStatus::Synced
            && datasets == DatasetStatus::Unchanged
        {
            Overall::Valid
        } else {
            Overall::Invalid
        };

        if overall == Overall::Valid {
            info!(bundle = %bundle_path.display(), dna = %bundle.record.fingerprint, "Bundle verified");
        } else {
            warn!(
                bundle = %bundle_path.display(),
                ?dna,
                ?ledger,
                ?datasets,
                "Bundle failed verification"
            );
        }

        Ok(VerificationReport {
            dna,
            ledger,
            datasets,
            overall,
            details,
        })
    }

    fn check_dataset(&self, dataset: &DatasetHash) -> DatasetCheck {
        let resolved = self.resolve_dataset(Path::new(&dataset.path));
        let actual_hash = resolved.as_deref().and_then(|p| sha256_file(p).ok());
        let status = match &actual_hash {
            None => DatasetStatus::Missing,
            Some(h) if *h == dataset.hash => DatasetStatus::Unchanged,
            Some(_) => DatasetStatus::Modified,
        };
        DatasetCheck {
            path: dataset.path.clone(),
            resolved: resolved.map(|p| p.display().to_string()),
            expected_hash: dataset.hash.clone(),
            actual_hash,
            status,
        }
    }

    fn resolve_dataset(&self, recorded: &Path) -> Option<PathBuf> {
        if recorded.is_file() {
            return Some(recorded.to_path_buf());
        }
        let root = self.dataset_root.as_ref()?;
        let candidate = root.join(recorded.file_name()?);
        candidate.is_file().then_some(candidate)
    }
}

/// Verify with default settings.
pub fn verify_bundle(bundle_path: &Path) -> Result<VerificationReport> {
    Verifier::new().verify(bundle_path)
}

fn check_dna(bundle: &LoadedBundle, notes: &mut Vec<String>) -> DnaStatus {
    let record = &bundle.record;
    let stored = &record.fingerprint.dna;
    let mut ok = true;
    let mut check = |passed: bool, pass: String, fail: String| {
        ok &= passed;
        notes.push(if passed { pass } else { fail });
    };

    match DnaFingerprint::generate(
        &record.fingerprint.model_name,
        &record.fingerprint.version,
        &record.final_weights,
        &record.category_set(),
        &record.timestamp,
    ) {
        Ok(regenerated) => check(
            regenerated.dna == *stored,
            "regenerated fingerprint matches dna.json".to_string(),
            format!("regenerated fingerprint {} differs from stored {stored}", regenerated.dna),
        ),
        Err(e) => check(
            false,
            String::new(),
            format!("fingerprint cannot be regenerated: {e}"),
        ),
    }

    check(
        bundle.entry.dna == *stored,
        "ledger proof carries the same fingerprint".to_string(),
        format!("ledger proof fingerprint {} differs from dna.json", bundle.entry.dna),
    );

    check(
        bundle.artifact_sha256 == record.artifact_sha256,
        "weights artifact hash matches".to_string(),
        format!(
            "weights artifact hash {} differs from recorded {}",
            bundle.artifact_sha256, record.artifact_sha256
        ),
    );

    check(
        canonically_equal(&record.final_weights, &bundle.entry.final_weights),
        "final weights match the ledger proof".to_string(),
        "final weights differ from the ledger proof".to_string(),
    );

    let expected = extract_categories(bundle.entry.dataset_hashes.iter().map(|d| d.path.as_str()));
    check(
        expected == record.category_set(),
        "categories match the recorded datasets".to_string(),
        format!(
            "categories {:?} do not match recorded datasets {:?}",
            record.categories, expected
        ),
    );

    if ok { DnaStatus::Valid } else { DnaStatus::Invalid }
}

fn check_ledger(bundle: &LoadedBundle, notes: &mut Vec<String>) -> LedgerStatus {
    let entry = &bundle.entry;
    let Some(signature) = entry.signature.as_deref().filter(|s| !s.is_empty()) else {
        notes.push("ledger proof carries no signature".to_string());
        return LedgerStatus::Unsigned;
    };

    let recomputed = match immutable_hash_of_value(&bundle.entry_value) {
        Ok(hash) => hash,
        Err(e) => {
            notes.push(format!("immutable hash cannot be recomputed: {e}"));
            return LedgerStatus::Mismatch;
        }
    };
    if recomputed != entry.immutable_hash {
        notes.push(format!(
            "recomputed immutable hash {recomputed} differs from stored {}",
            entry.immutable_hash
        ));
        return LedgerStatus::Mismatch;
    }
    notes.push("immutable hash matches entry contents".to_string());

    let public_key = entry.signer_public_key.as_deref().unwrap_or_default();
    if !signing::verify(&entry.immutable_hash, signature, public_key) {
        notes.push("signature does not verify against signer_public_key".to_string());
        return LedgerStatus::Mismatch;
    }
    notes.push(format!("signature valid for key {public_key}"));
    LedgerStatus::Synced
}

fn summarize_datasets(checks: &[DatasetCheck]) -> DatasetStatus {
    if checks.iter().any(|c| c.status == DatasetStatus::Missing) {
        DatasetStatus::Missing
    } else if checks.iter().any(|c| c.status == DatasetStatus::Modified) {
        DatasetStatus::Modified
    } else {
        DatasetStatus::Unchanged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(status: DatasetStatus) -> DatasetCheck {
        DatasetCheck {
            path: "d".into(),
            resolved: None,
            expected_hash: "h".into(),
            actual_hash: None,
            status,
        }
    }

    #[test]
    fn test_missing_takes_precedence() {
        let checks = [
            check(DatasetStatus::Modified),
            check(DatasetStatus::Missing),
            check(DatasetStatus::Unchanged),
        ];
        assert_eq!(summarize_datasets(&checks), DatasetStatus::Missing);
        assert_eq!(
            summarize_datasets(&[check(DatasetStatus::Unchanged), check(DatasetStatus::Modified)]),
            DatasetStatus::Modified
        );
        assert_eq!(summarize_datasets(&[]), DatasetStatus::Unchanged);
    }

    #[test]
    fn test_statuses_serialize_upper_case() {
        assert_eq!(serde_json::to_string(&LedgerStatus::Synced).unwrap(), "\"SYNCED\"");
        assert_eq!(serde_json::to_string(&DatasetStatus::Unchanged).unwrap(), "\"UNCHANGED\"");
        assert_eq!(serde_json::to_string(&Overall::Invalid).unwrap(), "\"INVALID\"");
    }

    #[test]
    fn test_dataset_root_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("civic.jsonl"), "x").unwrap();
        let verifier = Verifier::new().with_dataset_root(dir.path());
        let result = verifier.check_dataset(&DatasetHash {
            path: "/elsewhere/civic.jsonl".into(),
            hash: crate::canonical::sha256_hex(b"x"),
        });
        assert_eq!(result.status, DatasetStatus::Unchanged);

        let result = Verifier::new().check_dataset(&DatasetHash {
            path: "/elsewhere/civic.jsonl".into(),
            hash: "00".into(),
        });
        assert_eq!(result.status, DatasetStatus::Missing);
    }
}
