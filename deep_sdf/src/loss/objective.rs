//! The full training objective for one sub-batch.

use std::ops::AddAssign;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use super::contrastive::SnnLoss;
use super::regularization::{
    code_magnitude, code_regularization_ramp, eikonal_residual_sum, finite_difference_gradient,
    kl_divergence,
};
use super::sdf::{clamp_sdf, l1_sum};
use crate::config::LossConfig;
use crate::error::Result;
use crate::latent::reparameterize;
use crate::nn::SdfForward;
use crate::tensor_ops::scalar;

/// Scalar values of each loss term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    /// Clamped L1 reconstruction term.
    pub reconstruction: f32,
    /// KL term.
    pub kl: f32,
    /// Latent magnitude penalty.
    pub code_regularization: f32,
    /// Gradient-norm penalty.
    pub eikonal: f32,
    /// Soft nearest-neighbour term.
    pub contrastive: f32,
}

impl LossBreakdown {
    /// Sum of all terms.
    pub fn total(&self) -> f32 {
        self.reconstruction + self.kl + self.code_regularization + self.eikonal + self.contrastive
    }

    /// Whether every term is finite.
    pub fn is_finite(&self) -> bool {
        [
            self.reconstruction,
            self.kl,
            self.code_regularization,
            self.eikonal,
            self.contrastive,
        ]
        .iter()
        .all(|v| v.is_finite())
    }

    /// Every term multiplied by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            reconstruction: self.reconstruction * factor,
            kl: self.kl * factor,
            code_regularization: self.code_regularization * factor,
            eikonal: self.eikonal * factor,
            contrastive: self.contrastive * factor,
        }
    }

    /// Log all terms at info level.
    pub fn log(&self, prefix: &str) {
        log::info!(
            "{} loss = {:.6} (sdf={:.6} kl={:.6} reg={:.6} eik={:.6} snnl={:.6})",
            prefix,
            self.total(),
            self.reconstruction,
            self.kl,
            self.code_regularization,
            self.eikonal,
            self.contrastive
        );
    }
}

impl AddAssign for LossBreakdown {
    fn add_assign(&mut self, other: Self) {
        self.reconstruction += other.reconstruction;
        self.kl += other.kl;
        self.code_regularization += other.code_regularization;
        self.eikonal += other.eikonal;
        self.contrastive += other.contrastive;
    }
}

/// Differentiable loss plus its scalar breakdown.
#[derive(Debug, Clone)]
pub struct LossOutput<B: Backend> {
    /// Scalar loss tensor to backpropagate.
    pub loss: Tensor<B, 1>,
    /// Per-term values.
    pub breakdown: LossBreakdown,
}

/// Inputs of one sub-batch.
pub struct SubBatchInputs<'a, B: Backend> {
    /// Looked-up latent means, one row per scene.
    pub mean: Tensor<B, 2>,
    /// Looked-up latent log-variances, one row per scene.
    pub log_var: Tensor<B, 2>,
    /// Standard normal noise for reparameterization.
    pub noise: Tensor<B, 2>,
    /// Coordinates `[scenes * samples_per_scene, 3]`.
    pub xyz: Tensor<B, 2>,
    /// Target distances `[scenes * samples_per_scene, 1]`.
    pub sdf: Tensor<B, 2>,
    /// Label per scene.
    pub labels: &'a [f32],
    /// Rows per scene.
    pub samples_per_scene: usize,
}

/// Combines the configured loss terms.
#[derive(Debug, Clone)]
pub struct TrainingObjective {
    config: LossConfig,
}

impl TrainingObjective {
    /// Create the objective.
    pub fn new(config: LossConfig) -> Self {
        Self { config }
    }

    /// Loss configuration.
    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Evaluate the objective on one sub-batch.
    ///
    /// Reconstruction, KL, latent-magnitude and gradient-norm terms are sums
    /// divided by `batch_rows`, the row count of the whole mini-batch, so
    /// accumulating sub-batches reproduces the full-batch gradient.
    pub fn compute<B: Backend, D: SdfForward<B>>(
        &self,
        decoder: &D,
        inputs: SubBatchInputs<'_, B>,
        epoch: usize,
        batch_rows: usize,
    ) -> Result<LossOutput<B>> {
        let config = &self.config;
        let norm = 1.0 / batch_rows.max(1) as f32;
        let [scenes, latent_size] = inputs.mean.dims();

        let z = reparameterize(inputs.mean.clone(), inputs.log_var.clone(), inputs.noise);
        let z_rows = z
            .clone()
            .unsqueeze_dim::<3>(1)
            .repeat_dim(1, inputs.samples_per_scene)
            .reshape([scenes * inputs.samples_per_scene, latent_size]);

        let mut pred = decoder.forward_with_latents(z_rows.clone(), inputs.xyz.clone());
        let mut target = inputs.sdf;
        if config.enforce_minmax {
            pred = clamp_sdf(pred, config.clamp_distance);
            target = clamp_sdf(target, config.clamp_distance);
        }

        let reconstruction = l1_sum(pred, target) * norm;
        let kl = kl_divergence(inputs.mean, inputs.log_var) * (config.kl_weight * norm);
        let mut breakdown = LossBreakdown {
            reconstruction: scalar(reconstruction.clone())?,
            kl: scalar(kl.clone())?,
            ..Default::default()
        };
        let mut loss = reconstruction + kl;

        if config.code_regularization {
            let ramp = code_regularization_ramp(epoch, config.code_regularization_ramp_epochs);
            let reg = code_magnitude(z.clone()) * (config.code_regularization_lambda * ramp * norm);
            breakdown.code_regularization = scalar(reg.clone())?;
            loss = loss + reg;
        }

        if config.use_eikonal {
            let gradients = finite_difference_gradient(
                |p| decoder.forward_with_latents(z_rows.clone(), p),
                inputs.xyz,
                config.eikonal_epsilon,
            );
            let eikonal = eikonal_residual_sum(gradients) * (config.eikonal_weight * norm);
            breakdown.eikonal = scalar(eikonal.clone())?;
            loss = loss + eikonal;
        }

        if config.use_contrastive {
            let snn = SnnLoss::new(config.contrastive_temperature).forward(z, inputs.labels)
                * config.contrastive_weight;
            breakdown.contrastive = scalar(snn.clone())?;
            loss = loss + snn;
        }

        Ok(LossOutput { loss, breakdown })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SdfDecoderConfig;
    use crate::nn::SdfDecoder;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray;

    fn inputs<'a>(labels: &'a [f32], device: &NdArrayDevice) -> SubBatchInputs<'a, TestBackend> {
        SubBatchInputs {
            mean: Tensor::zeros([2, 4], device),
            log_var: Tensor::zeros([2, 4], device),
            noise: Tensor::zeros([2, 4], device),
            xyz: Tensor::ones([6, 3], device) * 0.1,
            sdf: Tensor::ones([6, 1], device) * 0.05,
            labels,
            samples_per_scene: 3,
        }
    }

    #[test]
    fn test_terms_sum_to_total() {
        let device = NdArrayDevice::Cpu;
        let mut rng = StdRng::seed_from_u64(0);
        let decoder = SdfDecoder::<TestBackend>::new(&SdfDecoderConfig::small(), 4, &mut rng, &device);
        let config = LossConfig::new()
            .with_use_eikonal(true)
            .with_use_contrastive(true);
        let objective = TrainingObjective::new(config);

        let labels = [0.0, 1.0];
        let output = objective.compute(&decoder, inputs(&labels, &device), 10, 6).unwrap();
        let total: f32 = output.loss.into_scalar();
        assert!((total - output.breakdown.total()).abs() < 1e-5);
        assert!(output.breakdown.is_finite());
        // N(0, I) latents carry no KL
        assert_eq!(output.breakdown.kl, 0.0);
        assert!(output.breakdown.eikonal > 0.0);
    }

    #[test]
    fn test_disabled_terms_are_zero() {
        let device = NdArrayDevice::Cpu;
        let mut rng = StdRng::seed_from_u64(1);
        let decoder = SdfDecoder::<TestBackend>::new(&SdfDecoderConfig::small(), 4, &mut rng, &device);
        let objective = TrainingObjective::new(LossConfig::new().with_code_regularization(false));

        let output = objective.compute(&decoder, inputs(&[0.0, 0.0], &device), 0, 6).unwrap();
        assert_eq!(output.breakdown.code_regularization, 0.0);
        assert_eq!(output.breakdown.eikonal, 0.0);
        assert_eq!(output.breakdown.contrastive, 0.0);
    }

    #[test]
    fn test_breakdown_accumulates() {
        let mut a = LossBreakdown {
            reconstruction: 1.0,
            kl: 0.5,
            ..Default::default()
        };
        a += LossBreakdown {
            reconstruction: 1.0,
            eikonal: f32::NAN,
            ..Default::default()
        };
        assert_eq!(a.reconstruction, 2.0);
        assert!(!a.is_finite());
        assert_eq!(a.scaled(0.5).kl, 0.25);
    }
}
