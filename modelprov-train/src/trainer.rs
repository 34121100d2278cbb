//! Adaptive trainer: runs the epoch loop against a [`ModelTrainer`],
//! re-weights base models, auto-stops on plateau and certifies the result.
//!
//! A successful run fingerprints the final weights, signs and writes a
//! ledger entry, and commits a certified bundle. The bundle is staged before
//! the ledger write and committed after it, so a rejected write leaves no
//! bundle and a failed run leaves nothing partial behind.

use async_trait::async_trait;
use modelprov_core::bundle::{StagedBundle, VerifierSource, ensure_target_free};
use modelprov_core::{
    DnaFingerprint, EVENT_TRAINING_AUTO_STOPPED, EVENT_TRAINING_COMPLETED, EntryPayload,
    FingerprintRecord, LedgerEntry, PrivateKey, ProvenanceError, Result, TrainingConfig,
    WeightMap, canonical_bytes, sha256_hex, timestamp_now,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::adaptive::{AutoStopPolicy, EpochRecord, FactorSampler, StopDecision, adapt_epoch};
use crate::dataset::{DatasetDescriptor, describe_datasets, union_categories};
use crate::discovery::BaseModelDescriptor;
use crate::ledger::{Ledger, WriteResult};

/// Lock file guarding an output directory for the lifetime of a run.
pub const LOCK_FILE: &str = ".modelprov.lock";

/// The external collaborator that actually trains and scores base models.
#[async_trait]
pub trait ModelTrainer: Send + Sync {
    /// Train `base_model` for one epoch and return its loss.
    async fn evaluate_epoch(
        &self,
        base_model: &BaseModelDescriptor,
        datasets: &[DatasetDescriptor],
        config: &TrainingConfig,
        epoch: u32,
    ) -> Result<f64>;

    /// Bytes of the final weights artifact. Defaults to the canonical JSON
    /// of the weight map.
    async fn export_artifact(&self, final_weights: &WeightMap) -> Result<Vec<u8>> {
        canonical_bytes(final_weights)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingState {
    Idle,
    Running,
    Completed,
    AutoStopped,
    Failed,
    Cancelled,
}

impl TrainingState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Idle | Self::Running)
    }
}

/// Identity and output settings for a run.
#[derive(Debug, Clone)]
pub struct TrainerOptions {
    pub model_name: String,
    pub version: String,
    pub training: TrainingConfig,
    /// Directory the bundle is created in, one subdirectory per run.
    pub output_dir: PathBuf,
    pub verifier: VerifierSource,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub run_id: Uuid,
    pub state: TrainingState,
    pub history: Vec<EpochRecord>,
    pub final_weights: WeightMap,
    pub fingerprint: DnaFingerprint,
    pub entry: LedgerEntry,
    pub write: WriteResult,
    pub bundle_path: PathBuf,
}

impl TrainingOutcome {
    pub fn epochs_run(&self) -> usize {
        self.history.len()
    }
}

/// Exclusive claim on an output directory. Removed on drop.
#[derive(Debug)]
struct RunLock {
    path: PathBuf,
}

impl RunLock {
    fn acquire(dir: &Path, run_id: Uuid) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(LOCK_FILE);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    let holder = std::fs::read_to_string(&path).unwrap_or_default();
                    ProvenanceError::configuration(format!(
                        "another training run ({}) holds {}; remove the file if no run is active",
                        holder.trim(),
                        path.display()
                    ))
                } else {
                    ProvenanceError::from(e)
                }
            })?;
        std::io::Write::write_all(&mut file, format!("{run_id}\n").as_bytes())?;
        Ok(Self { path })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove run lock");
        }
    }
}

/// Orchestrates one training run. Single use: a second `run` is refused.
pub struct AdaptiveTrainer {
    trainer: Arc<dyn ModelTrainer>,
    ledger: Arc<dyn Ledger>,
    signing_key: PrivateKey,
    options: TrainerOptions,
    state: TrainingState,
    cancel: CancellationToken,
}

impl AdaptiveTrainer {
    pub fn new(
        trainer: Arc<dyn ModelTrainer>,
        ledger: Arc<dyn Ledger>,
        signing_key: PrivateKey,
        options: TrainerOptions,
    ) -> Self {
        Self::with_cancellation(trainer, ledger, signing_key, options, CancellationToken::new())
    }

    /// Like [`AdaptiveTrainer::new`], observing an externally owned token.
    pub fn with_cancellation(
        trainer: Arc<dyn ModelTrainer>,
        ledger: Arc<dyn Ledger>,
        signing_key: PrivateKey,
        options: TrainerOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            trainer,
            ledger,
            signing_key,
            options,
            state: TrainingState::Idle,
            cancel,
        }
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    /// Token that cancels the run between epochs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the full lifecycle: epochs, fingerprint, sign, ledger, bundle.
    pub async fn run(
        &mut self,
        models: &[BaseModelDescriptor],
        dataset_paths: &[PathBuf],
    ) -> Result<TrainingOutcome> {
        if self.state != TrainingState::Idle {
            return Err(ProvenanceError::configuration(format!(
                "trainer already used (state {:?})",
                self.state
            )));
        }
        if let Err(e) = self.preflight(models, dataset_paths) {
            self.state = TrainingState::Failed;
            error!(error = %e, "Training run refused");
            return Err(e);
        }

        let run_id = Uuid::new_v4();
        let _lock = RunLock::acquire(&self.options.output_dir, run_id)?;
        self.state = TrainingState::Running;

        let span = info_span!("training_run", %run_id, model = %self.options.model_name);
        let result = self.execute(run_id, models, dataset_paths).instrument(span).await;

        self.state = match &result {
            Ok(outcome) => outcome.state,
            Err(ProvenanceError::Cancelled) => TrainingState::Cancelled,
            Err(_) => TrainingState::Failed,
        };
        if let Err(e) = &result {
            error!(%run_id, error = %e, state = ?self.state, "Training run did not complete");
        }
        result
    }

    fn preflight(&self, models: &[BaseModelDescriptor], dataset_paths: &[PathBuf]) -> Result<()> {
        if models.is_empty() {
            return Err(ProvenanceError::configuration("no base models discovered"));
        }
        if dataset_paths.is_empty() {
            return Err(ProvenanceError::configuration("no datasets configured"));
        }
        self.options.training.validate()
    }

    async fn execute(
        &self,
        run_id: Uuid,
        models: &[BaseModelDescriptor],
        dataset_paths: &[PathBuf],
    ) -> Result<TrainingOutcome> {
        let config = &self.options.training;
        let datasets = describe_datasets(dataset_paths).await?;
        let categories = union_categories(&datasets);
        info!(
            models = models.len(),
            datasets = datasets.len(),
            ?categories,
            epochs = config.epochs,
            seed = config.seed,
            "Training run started"
        );

        let mut weights = WeightMap::equal(models.iter().map(|m| m.name.clone()))?;
        let mut sampler = FactorSampler::new(config.seed);
        let mut policy = AutoStopPolicy::new(config.auto_stop_threshold, config.auto_stop_patience);
        let mut history = Vec::new();
        let mut auto_stopped = false;

        for epoch in 1..=config.epochs {
            if self.cancel.is_cancelled() {
                info!(epoch, "Cancellation requested");
                return Err(ProvenanceError::Cancelled);
            }
            let losses = self.epoch_losses(models, &datasets, epoch).await?;
            let record = adapt_epoch(epoch, &weights, losses, &mut sampler)?;
            debug!(
                epoch,
                ensemble_loss = record.ensemble_loss,
                best = %record.best,
                worst = %record.worst,
                boost = record.boost,
                penalty = record.penalty,
                "Epoch complete"
            );
            weights = record.weights_after.clone();
            let decision = policy.observe(record.ensemble_loss);
            history.push(record);
            if decision == StopDecision::Stop {
                info!(epoch, plateau = policy.plateau(), "Loss plateaued, stopping early");
                auto_stopped = true;
                break;
            }
        }

        if self.cancel.is_cancelled() {
            return Err(ProvenanceError::Cancelled);
        }
        weights.validate()?;
        let (state, event) = if auto_stopped {
            (TrainingState::AutoStopped, EVENT_TRAINING_AUTO_STOPPED)
        } else {
            (TrainingState::Completed, EVENT_TRAINING_COMPLETED)
        };

        let timestamp = timestamp_now();
        let fingerprint = DnaFingerprint::generate(
            &self.options.model_name,
            &self.options.version,
            &weights,
            &categories,
            &timestamp,
        )?;
        let artifact = self.trainer.export_artifact(&weights).await?;

        let entry = LedgerEntry::seal(EntryPayload {
            event: event.to_string(),
            model: self.options.model_name.clone(),
            version: self.options.version.clone(),
            dna: fingerprint.dna.clone(),
            dataset_hashes: datasets.iter().map(DatasetDescriptor::to_dataset_hash).collect(),
            final_weights: weights.clone(),
            training_config: config.clone(),
            timestamp: timestamp.clone(),
        })?
        .signed(&self.signing_key)?;

        let record = FingerprintRecord {
            fingerprint: fingerprint.clone(),
            final_weights: weights.clone(),
            categories: categories.iter().cloned().collect(),
            timestamp,
            artifact_sha256: sha256_hex(&artifact),
        };
        let target = self.options.output_dir.join(&fingerprint.dna);
        ensure_target_free(&target)?;
        let staged = StagedBundle::stage(
            &target,
            &artifact,
            &record,
            &entry,
            &self.options.verifier,
        )?;

        if self.cancel.is_cancelled() {
            return Err(ProvenanceError::Cancelled);
        }
        let write = self.ledger.write(&entry).await?;
        info!(
            backend = self.ledger.backend(),
            hash = %write.immutable_hash,
            sequence = ?write.sequence,
            "Ledger entry recorded"
        );

        let bundle_path = staged.commit().inspect_err(|e| {
            error!(
                hash = %entry.immutable_hash,
                error = %e,
                "Ledger entry written but bundle commit failed"
            );
        })?;
        info!(dna = %fingerprint, bundle = %bundle_path.display(), ?state, "Training run certified");

        Ok(TrainingOutcome {
            run_id,
            state,
            history,
            final_weights: weights,
            fingerprint,
            entry,
            write,
            bundle_path,
        })
    }

    /// Ask the collaborator for one loss per base model, concurrently.
    async fn epoch_losses(
        &self,
        models: &[BaseModelDescriptor],
        datasets: &[DatasetDescriptor],
        epoch: u32,
    ) -> Result<BTreeMap<String, f64>> {
        let config = &self.options.training;
        let evaluations = models.iter().map(|model| async move {
            let loss = self
                .trainer
                .evaluate_epoch(model, datasets, config, epoch)
                .await?;
            Ok::<_, ProvenanceError>((model.name.clone(), loss))
        });
        let losses = futures::future::try_join_all(evaluations).await?;
        Ok(losses.into_iter().collect())
    }
}
