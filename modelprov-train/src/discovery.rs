//! Base model discovery: one registry subdirectory per candidate model.

use modelprov_core::{ProvenanceError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Metadata file read from a model directory when present.
const MODEL_CONFIG_FILE: &str = "config.json";
const PARAM_KEYS: [&str; 3] = ["num_parameters", "n_params", "num_params"];

/// A discovered base model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseModelDescriptor {
    /// Normalized name, unique within one scan.
    pub name: String,
    pub path: PathBuf,
    /// Approximate parameter count, when known.
    pub parameters: Option<u64>,
}

/// Lower-case a directory name and unify separators.
///
/// `_`, whitespace and runs of `-` collapse into a single `-`, trimmed at the
/// ends: `Mistral_7B` → `mistral-7b`.
pub fn normalize_model_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_sep = false;
    for c in raw.chars() {
        if c == '_' || c == '-' || c.is_whitespace() {
            pending_sep = true;
            continue;
        }
        if pending_sep && !out.is_empty() {
            out.push('-');
        }
        pending_sep = false;
        out.extend(c.to_lowercase());
    }
    out
}

/// Estimate a parameter count from a size token in the name (`7b`, `350m`).
pub fn estimate_parameters(name: &str) -> Option<u64> {
    name.split('-')
        .rev()
        .find_map(|token| {
            let (digits, scale) = if let Some(d) = token.strip_suffix('b') {
                (d, 1e9)
            } else if let Some(d) = token.strip_suffix('m') {
                (d, 1e6)
            } else {
                return None;
            };
            let value: f64 = digits.parse().ok()?;
            (value.is_finite() && value > 0.0).then(|| (value * scale).round() as u64)
        })
}

fn read_parameter_count(dir: &Path) -> Option<u64> {
    let path = dir.join(MODEL_CONFIG_FILE);
    let content = std::fs::read_to_string(&path).ok()?;
    let value: serde_json::Value = match serde_json::from_str(&content) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unparseable model config");
            return None;
        }
    };
    PARAM_KEYS.iter().find_map(|k| value.get(*k)?.as_u64())
}

fn describe(name: String, path: PathBuf) -> BaseModelDescriptor {
    let parameters = read_parameter_count(&path).or_else(|| estimate_parameters(&name));
    BaseModelDescriptor {
        name,
        path,
        parameters,
    }
}

/// Scan the immediate subdirectories of `root`.
///
/// Hidden directories are skipped and results are sorted by normalized name.
/// When two directories normalize to the same name the first (in directory
/// name order) wins. An empty result is not an error here; the trainer
/// decides whether zero models is acceptable.
pub async fn discover_base_models(root: &Path) -> Result<Vec<BaseModelDescriptor>> {
    if !root.is_dir() {
        return Err(ProvenanceError::configuration(format!(
            "model registry is not a directory: {}",
            root.display()
        )));
    }

    let mut candidates: BTreeMap<String, PathBuf> = BTreeMap::new();
    let walker = walkdir::WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry.map_err(|e| {
            ProvenanceError::configuration(format!("cannot scan {}: {e}", root.display()))
        })?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(raw) = entry.file_name().to_str() else {
            warn!(path = %entry.path().display(), "Skipping non UTF-8 model directory");
            continue;
        };
        if raw.starts_with('.') {
            continue;
        }
        let name = normalize_model_name(raw);
        if name.is_empty() {
            continue;
        }
        if let Some(existing) = candidates.get(&name) {
            warn!(
                name = %name,
                kept = %existing.display(),
                skipped = %entry.path().display(),
                "Duplicate base model name after normalization"
            );
            continue;
        }
        candidates.insert(name, entry.into_path());
    }

    let tasks: Vec<_> = candidates
        .into_iter()
        .map(|(name, path)| tokio::task::spawn_blocking(move || describe(name, path)))
        .collect();
    let mut models = Vec::with_capacity(tasks.len());
    for result in futures::future::join_all(tasks).await {
        let descriptor = result
            .map_err(|e| ProvenanceError::configuration(format!("discovery task failed: {e}")))?;
        debug!(name = %descriptor.name, parameters = ?descriptor.parameters, "Discovered base model");
        models.push(descriptor);
    }
    models.sort_by(|a, b| a.name.cmp(&b.name));

    info!(root = %root.display(), count = models.len(), "Base model discovery complete");
    Ok(models)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_model_name() {
        assert_eq!(normalize_model_name("Mistral_7B"), "mistral-7b");
        assert_eq!(normalize_model_name("LLaMA--2"), "llama-2");
        assert_eq!(normalize_model_name(" gpt sw3 _"), "gpt-sw3");
        assert_eq!(normalize_model_name("___"), "");
    }

    #[test]
    fn test_estimate_parameters() {
        assert_eq!(estimate_parameters("mistral-7b"), Some(7_000_000_000));
        assert_eq!(estimate_parameters("gpt-sw3-350m"), Some(350_000_000));
        assert_eq!(estimate_parameters("phi-1.5b"), Some(1_500_000_000));
        assert_eq!(estimate_parameters("llama-2"), None);
    }

    #[tokio::test]
    async fn test_discover_sorted_and_normalized() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("Mistral_7B")).unwrap();
        std::fs::create_dir(dir.path().join("LLaMA-2")).unwrap();
        std::fs::create_dir(dir.path().join(".cache")).unwrap();
        std::fs::write(dir.path().join("README.md"), "not a model").unwrap();

        let models = discover_base_models(dir.path()).await.unwrap();
        let names: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["llama-2", "mistral-7b"]);
        assert_eq!(models[1].parameters, Some(7_000_000_000));
        assert_eq!(models[0].parameters, None);
    }

    #[tokio::test]
    async fn test_config_json_parameter_count_wins() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("mistral-7b");
        std::fs::create_dir(&model).unwrap();
        std::fs::write(model.join("config.json"), r#"{"n_params": 7241732096}"#).unwrap();

        let models = discover_base_models(dir.path()).await.unwrap();
        assert_eq!(models[0].parameters, Some(7_241_732_096));
    }

    #[tokio::test]
    async fn test_duplicate_names_keep_first() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("Llama-2")).unwrap();
        std::fs::create_dir(dir.path().join("llama_2")).unwrap();

        let models = discover_base_models(dir.path()).await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].path, dir.path().join("Llama-2"));
    }

    #[tokio::test]
    async fn test_empty_registry_is_empty_list() {
        let dir = TempDir::new().unwrap();
        assert!(discover_base_models(dir.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_registry_is_configuration_error() {
        let err = discover_base_models(Path::new("/nonexistent/registry"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvenanceError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_discovery_is_idempotent() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::create_dir(dir.path().join("b")).unwrap();
        let first = discover_base_models(dir.path()).await.unwrap();
        let second = discover_base_models(dir.path()).await.unwrap();
        assert_eq!(first, second);
    }
}
