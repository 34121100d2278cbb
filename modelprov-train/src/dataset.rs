//! Dataset descriptors built fresh at the start of every run.

use modelprov_core::categories::categories_for_name;
use modelprov_core::persistence::sha256_file;
use modelprov_core::{DatasetHash, ProvenanceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    /// Canonical absolute path.
    pub path: PathBuf,
    /// Full SHA-256 of the file contents.
    pub hash: String,
    pub categories: BTreeSet<String>,
}

impl DatasetDescriptor {
    /// Hash and tag one dataset file. Blocking.
    pub fn from_path(path: &Path) -> Result<Self> {
        let path = path.canonicalize().map_err(|e| {
            ProvenanceError::configuration(format!("dataset {} is not readable: {e}", path.display()))
        })?;
        if !path.is_file() {
            return Err(ProvenanceError::configuration(format!(
                "dataset {} is not a file",
                path.display()
            )));
        }
        let hash = sha256_file(&path)?;
        let categories = categories_for_name(&path.to_string_lossy());
        debug!(path = %path.display(), hash = %hash, ?categories, "Dataset described");
        Ok(Self {
            path,
            hash,
            categories,
        })
    }

    pub fn to_dataset_hash(&self) -> DatasetHash {
        DatasetHash {
            path: self.path.display().to_string(),
            hash: self.hash.clone(),
        }
    }
}

/// Describe every dataset concurrently, preserving input order.
pub async fn describe_datasets(paths: &[PathBuf]) -> Result<Vec<DatasetDescriptor>> {
    let tasks: Vec<_> = paths
        .iter()
        .cloned()
        .map(|p| tokio::task::spawn_blocking(move || DatasetDescriptor::from_path(&p)))
        .collect();

    let mut out = Vec::with_capacity(tasks.len());
    for joined in futures::future::join_all(tasks).await {
        let descriptor = joined
            .map_err(|e| ProvenanceError::configuration(format!("dataset task failed: {e}")))??;
        out.push(descriptor);
    }
    Ok(out)
}

/// Union of the categories of all descriptors.
pub fn union_categories(datasets: &[DatasetDescriptor]) -> BTreeSet<String> {
    datasets
        .iter()
        .flat_map(|d| d.categories.iter().cloned())
        .collect()
}
