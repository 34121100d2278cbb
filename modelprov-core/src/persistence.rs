//! File helpers shared by the ledger and bundle code: atomic writes, JSON
//! loading and streaming file digests.

use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::error::{ProvenanceError, Result};

/// Sibling path used while a write is in flight (`ledger.json` → `ledger.json.tmp`).
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("unnamed"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write bytes to a `.tmp` sibling, fsync, then rename over `path`.
///
/// Parent directories are created as needed. A crash leaves either the old
/// file or the new one, never a truncated mix.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_sibling(path);
    {
        let mut file = std::fs::File::create(&tmp)?;
        io::Write::write_all(&mut file, data)?;
        file.sync_all()?;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Pretty-printed JSON via [`atomic_write`].
pub fn atomic_write_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)?;
    atomic_write(path, json.as_bytes())
}

/// Load JSON from `path`; `Ok(None)` when the file does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let value = serde_json::from_str(&data).map_err(|e| {
        ProvenanceError::serialization(format!("{}: {e}", path.display()))
    })?;
    Ok(Some(value))
}

/// Streaming SHA-256 of a file's contents, lower-case hex.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::sha256_hex;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn test_json_write_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("record.json");
        let record = Record {
            name: "entry".into(),
            count: 3,
        };
        atomic_write_json(&path, &record).unwrap();
        let loaded: Option<Record> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(record));
        assert!(!dir.path().join("nested").join("record.json.tmp").exists());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded: Option<Record> = load_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_load_garbage_is_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = load_json::<Record>(&path).unwrap_err();
        assert!(matches!(err, ProvenanceError::Serialization(_)));
    }

    #[test]
    fn test_tmp_sibling_keeps_extension() {
        assert_eq!(
            tmp_sibling(Path::new("/a/ledger.json")),
            PathBuf::from("/a/ledger.json.tmp")
        );
    }

    #[test]
    fn test_sha256_file_matches_in_memory_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.jsonl");
        let content = "{\"q\":\"a\"}\n".repeat(20_000);
        std::fs::write(&path, &content).unwrap();
        assert_eq!(sha256_file(&path).unwrap(), sha256_hex(content.as_bytes()));
    }
}
