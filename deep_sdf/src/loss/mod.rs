//! Loss functions for auto-decoder training.
//!
//! - Reconstruction: clamped L1 between predicted and target distances
//! - KL: closed-form divergence of each latent Gaussian from `N(0, I)`
//! - Code regularization: ramped penalty on the magnitude of sampled latents
//! - Eikonal: unit gradient-norm penalty on the predicted field
//! - Contrastive: label-guided soft nearest-neighbour loss on latents

mod contrastive;
mod objective;
mod regularization;
mod sdf;

pub use contrastive::SnnLoss;
pub use objective::{LossBreakdown, LossOutput, SubBatchInputs, TrainingObjective};
pub use regularization::{
    code_magnitude, code_regularization_ramp, eikonal_residual_sum, finite_difference_gradient,
    kl_divergence,
};
pub use sdf::{clamp_sdf, l1_mean, l1_sum};
