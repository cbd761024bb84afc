//! # deep_sdf
//!
//! DeepSDF-style auto-decoder training with Burn.
//!
//! Every training shape owns a Gaussian over latent codes (a mean row and a
//! log-variance row). A decoder maps `(latent, xyz)` to a signed distance.
//! Training optimizes the decoder and both latent tables jointly; held-out
//! shapes are fitted at test time by optimizing a single latent against the
//! frozen decoder, then meshed and scored.
//!
//! ## Features
//!
//! - **Latent distribution bank**: mean/log-variance tables with reparameterized sampling
//! - **Training objective**: clamped L1, KL, ramped code regularization, optional Eikonal and contrastive terms
//! - **Optimizer**: Adam with row-sparse latent updates and per-group learning-rate schedules
//! - **Checkpoints**: epoch-consistent snapshots of decoder, optimizer, latents and logs
//! - **Evaluation**: mesh extraction with surface nets and Chamfer scoring
//! - **Prefetching**: bounded worker queue over a read-only sample store
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use deep_sdf::prelude::*;
//! use burn::backend::{Autodiff, NdArray};
//!
//! type MyBackend = Autodiff<NdArray>;
//!
//! let store: Arc<dyn SampleStore> = Arc::new(InMemorySampleStore::load_dir("SdfSamples", &names, &mut rng)?);
//! let config = TrainingConfig::small(8);
//! let device = Default::default();
//!
//! let mut trainer = DeepSdfTrainer::<MyBackend>::new(config, store.len(), &device)?;
//! let experiment = ExperimentDir::create("experiments/spheres")?;
//! let summary = trainer.train(store, &experiment, None, &CancellationToken::new())?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! sdf_core (geometry: meshes, surface nets, Chamfer)
//!     │
//!     ▼
//! deep_sdf
//!   data ──► training ──► checkpoints / logs
//!              │  ▲
//!              ▼  │
//!        latent, loss, nn
//!              │
//!              ▼
//!   reconstruct ──► mesh ──► evaluation
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): Standard library support
//! - `ndarray` (default): CPU backend using ndarray
//! - `wgpu`: GPU acceleration via WebGPU

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod config;
pub mod data;
pub mod error;
pub mod latent;
pub mod loss;
pub mod mesh;
pub mod nn;
pub mod reconstruct;
pub mod training;

mod tensor_ops;

pub use cancel::CancellationToken;
pub use config::{LossConfig, ReconstructionConfig, SdfDecoderConfig, TrainingConfig};
pub use error::{DeepSdfError, Result};
pub use latent::{interpolate_latents, LatentBank};
pub use mesh::{extract_mesh, interpolation_meshes};
pub use nn::{SdfDecoder, SdfForward};
pub use reconstruct::{reconstruct, reconstruct_split, Reconstruction, SplitReconstruction};
pub use tensor_ops::standard_normal;
pub use training::{DeepSdfTrainer, StopReason, TrainingSummary};

pub use sdf_core::{Point3, TriangleMesh};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::cancel::CancellationToken;
    pub use crate::config::{
        EvaluationConfig, LatentInitConfig, LogVarInit, LossConfig, MeshGridConfig,
        NonFinitePolicy, ReconstructionConfig, SdfDecoderConfig, SplitReconstructionConfig, TrainingConfig,
    };
    pub use crate::data::{
        read_split, subsample, BatchLoader, EpochPlan, FileSampleStore, InMemorySampleStore,
        SampleBatch, SampleStore, ShapeSamples,
    };
    pub use crate::error::{DeepSdfError, Result};
    pub use crate::latent::{interpolate_latents, interpolation_weights, reparameterize, LatentBank};
    pub use crate::loss::{LossBreakdown, TrainingObjective};
    pub use crate::mesh::{extract_mesh, interpolation_meshes};
    pub use crate::nn::{SdfDecoder, SdfForward};
    pub use crate::reconstruct::{reconstruct, reconstruct_split, Reconstruction, SplitReconstruction};
    pub use crate::training::{
        load_checkpoint, load_reconstructed_latent, save_checkpoint, DeepSdfTrainer,
        EvaluationRecord, Evaluator, ExperimentDir, InMemoryMeshes, LearningRateSchedule,
        MeshSource, ObjMeshDirectory, SnapshotTag, StopReason, TrainingLogs, TrainingSummary,
    };

    pub use sdf_core::{Point3, TriangleMesh};
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_public_api() {
        let _config = TrainingConfig::default();
        let _loss = LossConfig::default();
        let _reconstruction = ReconstructionConfig::default();
    }

    #[test]
    fn test_trainer_creation() {
        let device = NdArrayDevice::Cpu;
        let trainer = DeepSdfTrainer::<TestBackend>::new(TrainingConfig::small(8), 6, &device).unwrap();
        assert_eq!(trainer.latents().num_shapes(), 6);
        assert_eq!(trainer.latents().latent_size(), 8);
        assert_eq!(trainer.epoch(), 0);
    }
}
