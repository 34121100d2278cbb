//! # Canonical Serialization & Hashing
//!
//! Deterministic byte encoding for structured metadata, used as the exact
//! input to every content hash in the crate.
//!
//! The encoding is compact JSON with object keys sorted byte-wise at every
//! nesting level and shortest round-trip float formatting. Two values that
//! differ only in key insertion order encode to identical bytes.
//!
//! Keys are sorted explicitly, so the output does not depend on whether
//! `serde_json`'s `preserve_order` feature is enabled.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{ProvenanceError, Result};

/// Width of a truncated hash segment, in hex characters.
pub const SEGMENT_LEN: usize = 8;

/// Encode any serializable value into canonical bytes.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)
        .map_err(|e| ProvenanceError::serialization(format!("value is not serializable: {e}")))?;
    let mut out = Vec::with_capacity(128);
    write_canonical(&value, &mut out)?;
    Ok(out)
}

/// Encode a value canonically and return it as a UTF-8 string.
pub fn canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = canonical_bytes(value)?;
    String::from_utf8(bytes)
        .map_err(|e| ProvenanceError::serialization(format!("canonical output is not UTF-8: {e}")))
}

/// SHA-256 of the canonical encoding, lower-case hex.
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(sha256_hex(&canonical_bytes(value)?))
}

/// First [`SEGMENT_LEN`] hex characters of the canonical hash.
pub fn canonical_segment<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let hash = canonical_hash(value)?;
    Ok(hash[..SEGMENT_LEN].to_string())
}

/// Compute SHA-256 of arbitrary bytes and return hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Whether two values have the same canonical encoding.
pub fn canonically_equal<A, B>(a: &A, b: &B) -> bool
where
    A: Serialize + ?Sized,
    B: Serialize + ?Sized,
{
    match (canonical_bytes(a), canonical_bytes(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_canonical(val, out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}
