//! Training configuration types.

use burn::config::Config;
use serde::{Deserialize, Serialize};

use super::{EvaluationConfig, SdfDecoderConfig};
use crate::training::LearningRateSchedule;

/// Configuration for the training loss.
#[derive(Config, Debug)]
pub struct LossConfig {
    /// Clamp applied to predicted and target distances.
    #[config(default = 0.1)]
    pub clamp_distance: f32,

    /// Clamp targets and predictions before the reconstruction term.
    #[config(default = true)]
    pub enforce_minmax: bool,

    /// Weight of the KL term.
    #[config(default = 1.0)]
    pub kl_weight: f32,

    /// Add the ramped latent-magnitude penalty.
    #[config(default = true)]
    pub code_regularization: bool,

    /// Weight of the latent-magnitude penalty after the ramp.
    #[config(default = 1e-4)]
    pub code_regularization_lambda: f32,

    /// Epochs over which the latent-magnitude penalty ramps to full weight.
    #[config(default = 100)]
    pub code_regularization_ramp_epochs: usize,

    /// Add the gradient-norm penalty.
    #[config(default = false)]
    pub use_eikonal: bool,

    /// Weight of the gradient-norm penalty.
    #[config(default = 0.002)]
    pub eikonal_weight: f32,

    /// Finite-difference step for spatial gradients.
    #[config(default = 1e-3)]
    pub eikonal_epsilon: f32,

    /// Add the label-guided soft nearest-neighbour loss.
    #[config(default = false)]
    pub use_contrastive: bool,

    /// Weight of the soft nearest-neighbour loss.
    #[config(default = 0.5)]
    pub contrastive_weight: f32,

    /// Temperature of the soft nearest-neighbour loss.
    #[config(default = 181.0)]
    pub contrastive_temperature: f32,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LossConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.clamp_distance <= 0.0 {
            return Err("clamp_distance must be positive".to_string());
        }
        if self.kl_weight < 0.0 {
            return Err("kl_weight must be non-negative".to_string());
        }
        if self.use_eikonal && self.eikonal_epsilon <= 0.0 {
            return Err("eikonal_epsilon must be positive".to_string());
        }
        if self.use_contrastive && self.contrastive_temperature <= 0.0 {
            return Err("contrastive_temperature must be positive".to_string());
        }
        Ok(())
    }
}

/// How the log-variance table is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum LogVarInit {
    /// Same distribution as the mean table.
    MatchMean,
    /// Every entry set to `value`.
    Constant {
        /// Initial log-variance.
        value: f32,
    },
}

/// Configuration for latent table initialization.
#[derive(Config, Debug)]
pub struct LatentInitConfig {
    /// Scale of the mean initialization, divided by `sqrt(latent_size)`.
    #[config(default = 1.0)]
    pub code_init_std_dev: f32,

    /// Log-variance initialization policy.
    #[config(default = "LogVarInit::MatchMean")]
    pub log_var_init: LogVarInit,

    /// Maximum L2 norm of a looked-up row.
    #[config(default = "None")]
    pub code_bound: Option<f32>,
}

impl Default for LatentInitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// What to do when a batch produces a non-finite loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NonFinitePolicy {
    /// Discard the gradients and continue with the next batch.
    Skip,
    /// Stop training with an error.
    Abort,
}

/// Configuration for the auto-decoder trainer.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    /// Latent code dimensionality.
    pub latent_size: usize,

    /// Decoder configuration.
    pub decoder: SdfDecoderConfig,

    /// Number of training epochs.
    pub num_epochs: usize,

    /// Samples drawn per shape per batch.
    pub samples_per_scene: usize,

    /// Shapes per mini-batch.
    pub scenes_per_batch: usize,

    /// Loss configuration.
    #[config(default = "LossConfig::new()")]
    pub loss: LossConfig,

    /// Latent table initialization.
    #[config(default = "LatentInitConfig::new()")]
    pub latent_init: LatentInitConfig,

    /// Periodic evaluation configuration.
    #[config(default = "EvaluationConfig::new()")]
    pub evaluation: EvaluationConfig,

    /// Schedules for the decoder, mean and log-variance groups.
    #[config(default = "default_learning_rate_schedules()")]
    pub learning_rate_schedules: Vec<LearningRateSchedule>,

    /// Epoch interval between numbered snapshots.
    #[config(default = 1000)]
    pub snapshot_frequency: usize,

    /// Extra epochs at which numbered snapshots are written.
    #[config(default = "vec![]")]
    pub additional_snapshots: Vec<usize>,

    /// Epoch interval between `latest` checkpoints and log flushes.
    #[config(default = 10)]
    pub log_frequency: usize,

    /// Contiguous sub-batches per mini-batch.
    #[config(default = 1)]
    pub batch_split: usize,

    /// Global L2 clip applied to decoder gradients.
    #[config(default = "None")]
    pub grad_clip_norm: Option<f32>,

    /// Prefetch worker threads (0 loads inline).
    #[config(default = 1)]
    pub data_loader_threads: usize,

    /// Capacity of the prefetch queue.
    #[config(default = 4)]
    pub prefetch_batches: usize,

    /// Handling of non-finite batch losses.
    #[config(default = "NonFinitePolicy::Skip")]
    pub non_finite_policy: NonFinitePolicy,

    /// Seed for initialization, shuffling and noise.
    #[config(default = 42)]
    pub seed: u64,
}

/// Step schedules used by DeepSDF: decoder and latent tables halve every 500 epochs.
pub(crate) fn default_learning_rate_schedules() -> Vec<LearningRateSchedule> {
    vec![
        LearningRateSchedule::Step {
            initial: 0.0005,
            interval: 500,
            factor: 0.5,
        },
        LearningRateSchedule::Step {
            initial: 0.001,
            interval: 500,
            factor: 0.5,
        },
    ]
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self::new(256, SdfDecoderConfig::default(), 2000, 16384, 64)
    }
}

impl TrainingConfig {
    /// A small configuration for synthetic data and tests.
    pub fn small(latent_size: usize) -> Self {
        Self::new(latent_size, SdfDecoderConfig::small(), 100, 256, 4)
            .with_evaluation(EvaluationConfig::fast())
            .with_learning_rate_schedules(vec![
                LearningRateSchedule::Constant { value: 1e-3 },
                LearningRateSchedule::Constant { value: 1e-3 },
            ])
    }

    /// Set the number of training epochs.
    pub fn with_num_epochs(mut self, num_epochs: usize) -> Self {
        self.num_epochs = num_epochs;
        self
    }

    /// Set the samples drawn per shape per batch.
    pub fn with_samples_per_scene(mut self, samples_per_scene: usize) -> Self {
        self.samples_per_scene = samples_per_scene;
        self
    }

    /// Set the shapes per mini-batch.
    pub fn with_scenes_per_batch(mut self, scenes_per_batch: usize) -> Self {
        self.scenes_per_batch = scenes_per_batch;
        self
    }

    /// Schedule for parameter group `group` (0 decoder, 1 mean, 2 log-variance).
    pub fn schedule(&self, group: usize) -> Option<&LearningRateSchedule> {
        self.learning_rate_schedules
            .get(group)
            .or_else(|| self.learning_rate_schedules.last())
    }

    /// Rows per mini-batch.
    pub fn batch_rows(&self) -> usize {
        self.samples_per_scene * self.scenes_per_batch
    }

    /// Whether a numbered snapshot is written after `epoch`.
    pub fn snapshot_due(&self, epoch: usize) -> bool {
        (self.snapshot_frequency > 0 && epoch % self.snapshot_frequency == 0)
            || self.additional_snapshots.contains(&epoch)
    }

    /// Whether `latest` and the logs are written after `epoch`.
    pub fn log_due(&self, epoch: usize) -> bool {
        self.log_frequency > 0 && epoch % self.log_frequency == 0
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.decoder.validate()?;
        self.loss.validate()?;
        self.evaluation.validate()?;

        if self.latent_size == 0 {
            return Err("latent_size must be positive".to_string());
        }
        if self.loss.use_contrastive && self.latent_size < 2 {
            return Err("contrastive loss needs latent_size >= 2".to_string());
        }
        if self.samples_per_scene == 0 || self.samples_per_scene % 2 != 0 {
            return Err("samples_per_scene must be positive and even".to_string());
        }
        if self.scenes_per_batch == 0 {
            return Err("scenes_per_batch must be positive".to_string());
        }
        if self.batch_split == 0 || self.scenes_per_batch % self.batch_split != 0 {
            return Err(format!(
                "scenes_per_batch ({}) must be divisible by batch_split ({})",
                self.scenes_per_batch, self.batch_split
            ));
        }
        if self.learning_rate_schedules.is_empty() || self.learning_rate_schedules.len() > 3 {
            return Err("expected one to three learning rate schedules".to_string());
        }
        for schedule in &self.learning_rate_schedules {
            schedule.validate()?;
        }
        if let Some(clip) = self.grad_clip_norm {
            if clip <= 0.0 {
                return Err("grad_clip_norm must be positive".to_string());
            }
        }
        if let Some(bound) = self.latent_init.code_bound {
            if bound <= 0.0 {
                return Err("code_bound must be positive".to_string());
            }
        }
        if self.prefetch_batches == 0 {
            return Err("prefetch_batches must be positive".to_string());
        }
        Ok(())
    }
}
