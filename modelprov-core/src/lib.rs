//! # modelprov Core
//!
//! Provenance primitives shared by the trainer and the offline verifier:
//! canonical hashing, dataset categories, weight maps, model DNA
//! fingerprints, Ed25519 signing, ledger entries, certified bundles and
//! bundle verification. This crate performs no network I/O.

pub mod bundle;
pub mod canonical;
pub mod categories;
pub mod config;
pub mod dna;
pub mod entry;
pub mod error;
pub mod persistence;
pub mod signing;
pub mod verifier;
pub mod weights;

// Re-export commonly used types at the crate root.
pub use bundle::{
    FingerprintRecord, LoadedBundle, StagedBundle, VerifierSource, read_bundle, write_bundle,
};
pub use canonical::{canonical_bytes, canonical_hash, sha256_hex};
pub use categories::extract_categories;
pub use config::{ProvenanceConfig, load_config};
pub use dna::{DnaFingerprint, timestamp_now};
pub use entry::{
    DatasetHash, EVENT_TRAINING_AUTO_STOPPED, EVENT_TRAINING_COMPLETED, EntryPayload, LedgerEntry,
    TrainingConfig,
};
pub use error::{ProvenanceError, Result};
pub use signing::{PrivateKey, PublicKey, generate_keypair};
pub use verifier::{
    DatasetStatus, DnaStatus, LedgerStatus, Overall, VerificationReport, Verifier, verify_bundle,
};
pub use weights::WeightMap;
