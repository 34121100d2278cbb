//! # Model DNA Fingerprints
//!
//! A DNA fingerprint is a versioned identifier summarizing a trained model:
//!
//! ```text
//! {model_name}.v{major}.{micro}.{weights}.{categories}.{timestamp}
//! ```
//!
//! Each trailing segment is the first 8 hex characters of an independent
//! SHA-256 hash, so changing one input changes exactly one segment:
//!
//! - weights: canonical encoding of the final [`WeightMap`]
//! - categories: canonical encoding of the sorted category list
//! - timestamp: raw UTF-8 bytes of the RFC 3339 timestamp string

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use crate::canonical::{SEGMENT_LEN, canonical_segment, sha256_hex};
use crate::error::{ProvenanceError, Result};
use crate::weights::WeightMap;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+$").expect("version pattern is valid"));

static SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{8}$").expect("segment pattern is valid"));

/// A generated DNA fingerprint with its individual segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnaFingerprint {
    pub model_name: String,
    pub version: String,
    pub weights_segment: String,
    pub categories_segment: String,
    pub timestamp_segment: String,
    /// Assembled display string.
    pub dna: String,
}

impl DnaFingerprint {
    /// Generate a fingerprint from the final training state.
    pub fn generate(
        model_name: &str,
        version: &str,
        final_weights: &WeightMap,
        categories: &BTreeSet<String>,
        timestamp: &str,
    ) -> Result<Self> {
        validate_model_name(model_name)?;
        validate_version(version)?;

        let weights_segment = canonical_segment(final_weights)?;
        let sorted: Vec<&String> = categories.iter().collect();
        let categories_segment = canonical_segment(&sorted)?;
        let timestamp_segment = sha256_hex(timestamp.as_bytes())[..SEGMENT_LEN].to_string();

        let dna = format!(
            "{model_name}.v{version}.{weights_segment}.{categories_segment}.{timestamp_segment}"
        );

        Ok(Self {
            model_name: model_name.to_string(),
            version: version.to_string(),
            weights_segment,
            categories_segment,
            timestamp_segment,
            dna,
        })
    }

    /// Parse an assembled fingerprint string back into its parts.
    ///
    /// Model names may contain `.`, so parsing is anchored from the right.
    pub fn parse(dna: &str) -> Result<Self> {
        let invalid = || ProvenanceError::validation(format!("malformed DNA fingerprint: {dna}"));

        let mut parts = dna.rsplitn(4, '.');
        let timestamp_segment = parts.next().ok_or_else(invalid)?;
        let categories_segment = parts.next().ok_or_else(invalid)?;
        let weights_segment = parts.next().ok_or_else(invalid)?;
        let head = parts.next().ok_or_else(invalid)?;

        let mut head_parts = head.rsplitn(3, '.');
        let micro = head_parts.next().ok_or_else(invalid)?;
        let major = head_parts
            .next()
            .and_then(|m| m.strip_prefix('v'))
            .ok_or_else(invalid)?;
        let model_name = head_parts.next().ok_or_else(invalid)?;

        let version = format!("{major}.{micro}");
        validate_model_name(model_name)?;
        validate_version(&version)?;
        for segment in [weights_segment, categories_segment, timestamp_segment] {
            if !SEGMENT_RE.is_match(segment) {
                return Err(invalid());
            }
        }

        Ok(Self {
            model_name: model_name.to_string(),
            version,
            weights_segment: weights_segment.to_string(),
            categories_segment: categories_segment.to_string(),
            timestamp_segment: timestamp_segment.to_string(),
            dna: dna.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.dna
    }
}

impl fmt::Display for DnaFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dna)
    }
}

/// Current UTC time in the timestamp format used for fingerprints.
pub fn timestamp_now() -> String {
    format_timestamp(Utc::now())
}

/// Format a UTC time as RFC 3339 with second precision (`2025-01-15T10:30:00Z`).
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn validate_model_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(ProvenanceError::validation(format!(
            "model name must be non-empty without whitespace: '{name}'"
        )));
    }
    // The fingerprint names the bundle directory.
    if name.starts_with('.') || name.contains(['/', '\\']) {
        return Err(ProvenanceError::validation(format!(
            "model name must not start with '.' or contain path separators: '{name}'"
        )));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if !VERSION_RE.is_match(version) {
        return Err(ProvenanceError::validation(format!(
            "version must look like MAJOR.MICRO, got '{version}'"
        )));
    }
    Ok(())
}
