//! # modelprov Train
//!
//! Adaptive multi-model training with certified output: base model
//! discovery, dataset descriptors, seeded boost/penalty re-weighting,
//! plateau auto-stop, and write-once ledger clients (in-memory, JSON file
//! and remote HTTP).

pub mod adaptive;
pub mod dataset;
pub mod discovery;
pub mod ledger;
pub mod trainer;

pub use adaptive::{AutoStopPolicy, EpochRecord, FactorSampler, StopDecision};
pub use dataset::{DatasetDescriptor, describe_datasets};
pub use discovery::{BaseModelDescriptor, discover_base_models, normalize_model_name};
pub use ledger::{FileLedger, InMemoryLedger, Ledger, RemoteLedger, SharedLedger, WriteResult};
pub use trainer::{
    AdaptiveTrainer, ModelTrainer, TrainerOptions, TrainingOutcome, TrainingState,
};
