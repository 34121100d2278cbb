//! Ledger entries: the signed, write-once record of a completed training run.
//!
//! The immutable hash is SHA-256 over the canonical encoding of every field
//! except `immutable_hash`, `signature` and `signer_public_key`. It is both
//! the signed message and the write-once deduplication key.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical::canonical_hash;
use crate::error::{ProvenanceError, Result};
use crate::signing::{self, PrivateKey};
use crate::weights::WeightMap;

pub const EVENT_TRAINING_COMPLETED: &str = "training_completed";
pub const EVENT_TRAINING_AUTO_STOPPED: &str = "training_auto_stopped";

/// Fields excluded from the immutable hash.
const UNHASHED_FIELDS: [&str; 3] = ["immutable_hash", "signature", "signer_public_key"];

/// Training hyperparameters fixed for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Maximum number of epochs.
    pub epochs: u32,
    /// Base learning rate handed to the trainer collaborator.
    pub base_lr: f64,
    /// Seed for every random draw made by the run.
    pub seed: u64,
    /// Loss change below which an epoch counts as plateaued.
    #[serde(default = "default_auto_stop_threshold")]
    pub auto_stop_threshold: f64,
    /// Consecutive plateaued epochs that trigger auto-stop.
    #[serde(default = "default_auto_stop_patience")]
    pub auto_stop_patience: u32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            base_lr: 1e-4,
            seed: 42,
            auto_stop_threshold: default_auto_stop_threshold(),
            auto_stop_patience: default_auto_stop_patience(),
        }
    }
}

fn default_auto_stop_threshold() -> f64 {
    0.001
}

fn default_auto_stop_patience() -> u32 {
    3
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(ProvenanceError::configuration("epochs must be at least 1"));
        }
        if !self.base_lr.is_finite() || self.base_lr <= 0.0 {
            return Err(ProvenanceError::configuration(format!(
                "base_lr must be a positive number, got {}",
                self.base_lr
            )));
        }
        if !self.auto_stop_threshold.is_finite() || self.auto_stop_threshold < 0.0 {
            return Err(ProvenanceError::configuration(format!(
                "auto_stop_threshold must be non-negative, got {}",
                self.auto_stop_threshold
            )));
        }
        if self.auto_stop_patience == 0 {
            return Err(ProvenanceError::configuration(
                "auto_stop_patience must be at least 1",
            ));
        }
        Ok(())
    }
}

/// A dataset reference recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetHash {
    pub path: String,
    pub hash: String,
}

/// Everything that goes into the immutable hash.
#[derive(Debug, Clone)]
pub struct EntryPayload {
    pub event: String,
    pub model: String,
    pub version: String,
    pub dna: String,
    pub dataset_hashes: Vec<DatasetHash>,
    pub final_weights: WeightMap,
    pub training_config: TrainingConfig,
    pub timestamp: String,
}

/// A ledger entry as written to the ledger and to `ledger_proof.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub event: String,
    pub model: String,
    pub version: String,
    pub dna: String,
    pub dataset_hashes: Vec<DatasetHash>,
    pub final_weights: WeightMap,
    pub training_config: TrainingConfig,
    pub timestamp: String,
    pub immutable_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_public_key: Option<String>,
}

impl LedgerEntry {
    /// Build an unsigned entry and compute its immutable hash.
    pub fn seal(payload: EntryPayload) -> Result<Self> {
        let mut entry = Self {
            event: payload.event,
            model: payload.model,
            version: payload.version,
            dna: payload.dna,
            dataset_hashes: payload.dataset_hashes,
            final_weights: payload.final_weights,
            training_config: payload.training_config,
            timestamp: payload.timestamp,
            immutable_hash: String::new(),
            signature: None,
            signer_public_key: None,
        };
        entry.immutable_hash = entry.compute_immutable_hash()?;
        Ok(entry)
    }

    /// Sign the immutable hash and attach the signature and public key.
    pub fn signed(mut self, key: &PrivateKey) -> Result<Self> {
        self.signature = Some(signing::sign(&self.immutable_hash, key)?);
        self.signer_public_key = Some(key.public_key().to_hex());
        Ok(self)
    }

    /// Recompute the immutable hash from the entry's hashed fields.
    pub fn compute_immutable_hash(&self) -> Result<String> {
        immutable_hash_of_value(&serde_json::to_value(self)?)
    }

    pub fn is_signed(&self) -> bool {
        self.signature.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Recompute the hash, compare with the stored one, then check the
    /// signature against the stored public key. Never fails.
    pub fn verify_signature(&self) -> bool {
        let (Some(signature), Some(public_key)) = (&self.signature, &self.signer_public_key) else {
            return false;
        };
        match self.compute_immutable_hash() {
            Ok(hash) if hash == self.immutable_hash => {
                signing::verify(&self.immutable_hash, signature, public_key)
            }
            _ => false,
        }
    }

    /// Check that every field a ledger requires is present and consistent.
    pub fn check_required_fields(&self) -> Result<()> {
        let mut missing = Vec::new();
        for (name, value) in [
            ("event", &self.event),
            ("model", &self.model),
            ("version", &self.version),
            ("dna", &self.dna),
            ("timestamp", &self.timestamp),
            ("immutable_hash", &self.immutable_hash),
        ] {
            if value.trim().is_empty() {
                missing.push(name);
            }
        }
        if self.final_weights.is_empty() {
            missing.push("final_weights");
        }
        if !self.is_signed() {
            missing.push("signature");
        }
        if self
            .signer_public_key
            .as_deref()
            .is_none_or(|k| k.trim().is_empty())
        {
            missing.push("signer_public_key");
        }
        if !missing.is_empty() {
            return Err(ProvenanceError::validation(format!(
                "ledger entry is missing required fields: {}",
                missing.join(", ")
            )));
        }

        let recomputed = self.compute_immutable_hash()?;
        if recomputed != self.immutable_hash {
            return Err(ProvenanceError::validation(format!(
                "immutable_hash {} does not match entry contents ({recomputed})",
                self.immutable_hash
            )));
        }
        Ok(())
    }
}

/// Immutable hash of a raw entry value (as stored on disk or received over
/// the wire). Unknown extra fields are hashed too.
pub fn immutable_hash_of_value(entry: &Value) -> Result<String> {
    let Value::Object(fields) = entry else {
        return Err(ProvenanceError::serialization(
            "ledger entry must be a JSON object",
        ));
    };
    let mut hashed = fields.clone();
    for field in UNHASHED_FIELDS {
        hashed.remove(field);
    }
    canonical_hash(&Value::Object(hashed))
}
