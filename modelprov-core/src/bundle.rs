//! Certified bundle layout: reading for verification, staged writing at the
//! end of a run.
//!
//! ```text
//! <bundle>/
//!   model.weights        weights artifact produced by the trainer
//!   dna.json             FingerprintRecord
//!   ledger_proof.json    LedgerEntry as written to the ledger
//!   modelprov-verify     verifier binary (or verify.sh launcher)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::dna::DnaFingerprint;
use crate::entry::LedgerEntry;
use crate::error::{ProvenanceError, Result};
use crate::persistence::{atomic_write, atomic_write_json, sha256_file};
use crate::weights::WeightMap;

pub const WEIGHTS_FILE: &str = "model.weights";
pub const FINGERPRINT_FILE: &str = "dna.json";
pub const LEDGER_PROOF_FILE: &str = "ledger_proof.json";
pub const VERIFIER_BINARY: &str = "modelprov-verify";
pub const VERIFIER_SCRIPT: &str = "verify.sh";

const VERIFY_LAUNCHER: &str = "#!/bin/sh\n\
# Re-verify this bundle offline. Requires modelprov-verify on PATH.\n\
exec modelprov-verify \"$(dirname \"$0\")\" \"$@\"\n";

/// Contents of `dna.json`: the fingerprint plus the inputs it was generated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub fingerprint: DnaFingerprint,
    pub final_weights: WeightMap,
    /// Sorted category tags.
    pub categories: Vec<String>,
    pub timestamp: String,
    /// SHA-256 of `model.weights`.
    pub artifact_sha256: String,
}

impl FingerprintRecord {
    pub fn category_set(&self) -> BTreeSet<String> {
        self.categories.iter().cloned().collect()
    }
}

/// How the verifier is shipped inside a bundle.
#[derive(Debug, Clone)]
pub enum VerifierSource {
    /// Copy this executable in as `modelprov-verify`.
    Binary(PathBuf),
    /// Write a `verify.sh` launcher that calls `modelprov-verify` from PATH.
    Launcher,
}

/// A bundle read back from disk.
#[derive(Debug, Clone)]
pub struct LoadedBundle {
    pub root: PathBuf,
    pub record: FingerprintRecord,
    pub entry: LedgerEntry,
    /// `ledger_proof.json` as raw JSON, for hashing exactly what is on disk.
    pub entry_value: Value,
    /// SHA-256 of `model.weights` as found on disk.
    pub artifact_sha256: String,
}

/// Read and parse every required bundle file.
///
/// Missing or unparseable files are [`ProvenanceError::Integrity`]; content
/// mismatches are left for the verifier to report.
pub fn read_bundle(root: &Path) -> Result<LoadedBundle> {
    if !root.is_dir() {
        return Err(ProvenanceError::integrity(format!(
            "bundle directory not found: {}",
            root.display()
        )));
    }

    let weights_path = root.join(WEIGHTS_FILE);
    if !weights_path.is_file() {
        return Err(missing(root, WEIGHTS_FILE));
    }
    let artifact_sha256 = sha256_file(&weights_path).map_err(|e| {
        ProvenanceError::integrity(format!("cannot read {WEIGHTS_FILE}: {e}"))
    })?;

    let record: FingerprintRecord = read_required(root, FINGERPRINT_FILE)?;
    let entry_value: Value = read_required(root, LEDGER_PROOF_FILE)?;
    let entry: LedgerEntry = serde_json::from_value(entry_value.clone()).map_err(|e| {
        ProvenanceError::integrity(format!("{LEDGER_PROOF_FILE} is not a ledger entry: {e}"))
    })?;

    debug!(bundle = %root.display(), dna = %record.fingerprint, "Bundle loaded");
    Ok(LoadedBundle {
        root: root.to_path_buf(),
        record,
        entry,
        entry_value,
        artifact_sha256,
    })
}

fn missing(root: &Path, file: &str) -> ProvenanceError {
    ProvenanceError::integrity(format!(
        "bundle {} is missing {file}",
        root.display()
    ))
}

fn read_required<T: serde::de::DeserializeOwned>(root: &Path, file: &str) -> Result<T> {
    let path = root.join(file);
    let data = std::fs::read_to_string(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            missing(root, file)
        } else {
            ProvenanceError::integrity(format!("cannot read {file}: {e}"))
        }
    })?;
    serde_json::from_str(&data)
        .map_err(|e| ProvenanceError::integrity(format!("{file} is not valid: {e}")))
}

/// A fully written bundle waiting in its staging directory.
///
/// Dropping it without [`StagedBundle::commit`] removes the staging
/// directory, so an aborted run leaves no partial bundle behind.
#[derive(Debug)]
pub struct StagedBundle {
    staging: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedBundle {
    /// Write every bundle file into a hidden staging directory beside
    /// `target`. An existing `target` is refused.
    pub fn stage(
        target: &Path,
        artifact: &[u8],
        record: &FingerprintRecord,
        entry: &LedgerEntry,
        verifier: &VerifierSource,
    ) -> Result<Self> {
        ensure_target_free(target)?;
        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ProvenanceError::configuration(format!(
                    "invalid bundle path: {}",
                    target.display()
                ))
            })?;
        std::fs::create_dir_all(parent)?;

        let staging = parent.join(format!(".{name}.staging"));
        if staging.exists() {
            warn!(path = %staging.display(), "Removing stale bundle staging directory");
            std::fs::remove_dir_all(&staging)?;
        }
        std::fs::create_dir(&staging)?;
        let staged = Self {
            staging,
            target: target.to_path_buf(),
            committed: false,
        };
        stage_files(&staged.staging, artifact, record, entry, verifier)?;
        Ok(staged)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Rename the staging directory into place.
    pub fn commit(mut self) -> Result<PathBuf> {
        ensure_target_free(&self.target)?;
        std::fs::rename(&self.staging, &self.target)?;
        self.committed = true;
        debug!(bundle = %self.target.display(), "Bundle committed");
        Ok(self.target.clone())
    }
}

impl Drop for StagedBundle {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_dir_all(&self.staging);
        }
    }
}

/// Fail if something already exists at `target`.
pub fn ensure_target_free(target: &Path) -> Result<()> {
    if target.exists() {
        return Err(ProvenanceError::configuration(format!(
            "bundle target already exists: {}",
            target.display()
        )));
    }
    Ok(())
}

/// Stage and immediately commit a bundle at `target`.
pub fn write_bundle(
    target: &Path,
    artifact: &[u8],
    record: &FingerprintRecord,
    entry: &LedgerEntry,
    verifier: &VerifierSource,
) -> Result<PathBuf> {
    StagedBundle::stage(target, artifact, record, entry, verifier)?.commit()
}

fn stage_files(
    staging: &Path,
    artifact: &[u8],
    record: &FingerprintRecord,
    entry: &LedgerEntry,
    verifier: &VerifierSource,
) -> Result<()> {
    atomic_write(&staging.join(WEIGHTS_FILE), artifact)?;
    atomic_write_json(&staging.join(FINGERPRINT_FILE), record)?;
    atomic_write_json(&staging.join(LEDGER_PROOF_FILE), entry)?;

    match verifier {
        VerifierSource::Binary(source) => {
            let dest = staging.join(VERIFIER_BINARY);
            std::fs::copy(source, &dest).map_err(|e| {
                ProvenanceError::configuration(format!(
                    "cannot copy verifier from {}: {e}",
                    source.display()
                ))
            })?;
            make_executable(&dest)?;
        }
        VerifierSource::Launcher => {
            let dest = staging.join(VERIFIER_SCRIPT);
            atomic_write(&dest, VERIFY_LAUNCHER.as_bytes())?;
            make_executable(&dest)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<()> {
    Ok(())
}
