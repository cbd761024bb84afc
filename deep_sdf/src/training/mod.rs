//! Training infrastructure for the auto-decoder.
//!
//! This module provides:
//! - `DeepSdfTrainer`: joint optimization of decoder weights and latent distributions
//! - Adam with row-sparse latent updates and learning-rate schedules
//! - Checkpoints, rolling logs and the final training summary
//! - Periodic Chamfer evaluation on training and held-out shapes

mod checkpoint;
mod evaluation;
mod logs;
mod optimizer;
mod schedule;
mod summary;
mod trainer;

pub use checkpoint::{
    load_checkpoint, load_latent_codes, load_model, load_optimizer, load_reconstructed_latent, save_checkpoint,
    save_latent_codes, save_model, save_optimizer, save_reconstructed_latent, ArtifactKind, Checkpoint, ExperimentDir, SnapshotTag, StoredTensor,
    TensorArchive, ARTIFACT_MAGIC, ARTIFACT_VERSION,
};
pub use evaluation::{
    EvaluationRecord, EvaluationSplit, Evaluator, InMemoryMeshes, MeshSource, ObjMeshDirectory,
};
pub use logs::{EpochRecord, TrainingLogs};
pub use optimizer::{clip_grad_norm, global_grad_norm, AdamConfig, AdamState, OptimizerState};
pub use schedule::LearningRateSchedule;
pub use summary::{StopReason, TrainingSummary};
pub use trainer::{BatchGradients, BatchOutcome, DeepSdfTrainer};
