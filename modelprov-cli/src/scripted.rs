//! Scripted trainer: replays per-model loss curves from a JSON file.
//!
//! File format: `{"llama-2": [0.9, 0.8, 0.7], "mistral-7b": [0.7, 0.5]}`.
//! Keys are normalized like discovered model names. Epochs past the end of a
//! curve repeat its last value.

use async_trait::async_trait;
use modelprov_core::{ProvenanceError, Result, TrainingConfig};
use modelprov_train::{BaseModelDescriptor, DatasetDescriptor, ModelTrainer, normalize_model_name};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ScriptedTrainer {
    curves: BTreeMap<String, Vec<f64>>,
}

impl ScriptedTrainer {
    pub fn new(curves: BTreeMap<String, Vec<f64>>) -> Result<Self> {
        let mut normalized = BTreeMap::new();
        for (name, curve) in curves {
            if curve.is_empty() {
                return Err(ProvenanceError::configuration(format!(
                    "loss curve for '{name}' is empty"
                )));
            }
            if let Some(bad) = curve.iter().find(|l| !l.is_finite() || **l < 0.0) {
                return Err(ProvenanceError::configuration(format!(
                    "loss curve for '{name}' contains invalid loss {bad}"
                )));
            }
            normalized.insert(normalize_model_name(&name), curve);
        }
        Ok(Self { curves: normalized })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProvenanceError::configuration(format!(
                "cannot read loss curves {}: {e}",
                path.display()
            ))
        })?;
        let curves: BTreeMap<String, Vec<f64>> = serde_json::from_str(&content)
            .map_err(|e| ProvenanceError::serialization(format!("{}: {e}", path.display())))?;
        Self::new(curves)
    }

    /// Model names with a curve.
    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.curves.keys().map(String::as_str)
    }
}

#[async_trait]
impl ModelTrainer for ScriptedTrainer {
    async fn evaluate_epoch(
        &self,
        base_model: &BaseModelDescriptor,
        _datasets: &[DatasetDescriptor],
        _config: &TrainingConfig,
        epoch: u32,
    ) -> Result<f64> {
        let curve = self.curves.get(&base_model.name).ok_or_else(|| {
            ProvenanceError::trainer(format!("no loss curve for base model '{}'", base_model.name))
        })?;
        let index = (epoch.saturating_sub(1) as usize).min(curve.len() - 1);
        let loss = curve[index];
        debug!(model = %base_model.name, epoch, loss, "Scripted loss");
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn model(name: &str) -> BaseModelDescriptor {
        BaseModelDescriptor {
            name: name.to_string(),
            path: PathBuf::from(name),
            parameters: None,
        }
    }

    #[tokio::test]
    async fn test_curve_replays_then_holds_last_value() {
        let trainer = ScriptedTrainer::new(BTreeMap::from([(
            "Mistral_7B".to_string(),
            vec![0.7, 0.5],
        )]))
        .unwrap();
        let cfg = TrainingConfig::default();
        let m = model("mistral-7b");
        assert_eq!(trainer.evaluate_epoch(&m, &[], &cfg, 1).await.unwrap(), 0.7);
        assert_eq!(trainer.evaluate_epoch(&m, &[], &cfg, 2).await.unwrap(), 0.5);
        assert_eq!(trainer.evaluate_epoch(&m, &[], &cfg, 9).await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_unknown_model_is_trainer_error() {
        let trainer =
            ScriptedTrainer::new(BTreeMap::from([("llama-2".to_string(), vec![0.5])])).unwrap();
        let err = trainer
            .evaluate_epoch(&model("phi-2"), &[], &TrainingConfig::default(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ProvenanceError::Trainer(_)));
    }

    #[test]
    fn test_rejects_empty_and_negative_curves() {
        assert!(ScriptedTrainer::new(BTreeMap::from([("a".to_string(), vec![])])).is_err());
        assert!(ScriptedTrainer::new(BTreeMap::from([("a".to_string(), vec![-1.0])])).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("losses.json");
        std::fs::write(&path, r#"{"LLaMA-2": [0.9, 0.8], "mistral-7b": [0.6]}"#).unwrap();
        let trainer = ScriptedTrainer::from_file(&path).unwrap();
        assert_eq!(trainer.models().collect::<Vec<_>>(), vec!["llama-2", "mistral-7b"]);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            ScriptedTrainer::from_file(&path).unwrap_err(),
            ProvenanceError::Serialization(_)
        ));
    }
}
