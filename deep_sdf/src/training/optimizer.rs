//! Adam over explicit parameter tensors.
//!
//! Decoder weights use dense updates. Latent tables use row-sparse updates:
//! only rows present in the batch move, and each row keeps its own step
//! counter for bias correction.

use burn::config::Config;
use burn::prelude::*;

use crate::error::DeepSdfError;
use crate::tensor_ops::{frobenius_norm, matrix, row_mask};

/// Configuration for the optimizer.
#[derive(Config, Debug)]
pub struct AdamConfig {
    /// Decay of the first moment.
    #[config(default = 0.9)]
    pub beta_1: f32,

    /// Decay of the second moment.
    #[config(default = 0.999)]
    pub beta_2: f32,

    /// Epsilon for numerical stability.
    #[config(default = 1e-8)]
    pub epsilon: f32,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Adam state for a single `[rows, cols]` parameter tensor.
#[derive(Debug, Clone)]
pub struct AdamState<B: Backend> {
    /// Running average of gradients.
    moment_1: Tensor<B, 2>,
    /// Running average of squared gradients.
    moment_2: Tensor<B, 2>,
    /// Steps taken by each row.
    row_steps: Vec<u64>,
}

impl<B: Backend> AdamState<B> {
    /// Zero state for a parameter of `shape`.
    pub fn new(shape: [usize; 2], device: &B::Device) -> Self {
        Self {
            moment_1: Tensor::zeros(shape, device),
            moment_2: Tensor::zeros(shape, device),
            row_steps: vec![0; shape[0]],
        }
    }

    /// Restore a saved state.
    pub fn from_parts(moment_1: Tensor<B, 2>, moment_2: Tensor<B, 2>, row_steps: Vec<u64>) -> crate::error::Result<Self> {
        let shape = moment_1.dims();
        if moment_2.dims() != shape || row_steps.len() != shape[0] {
            return Err(DeepSdfError::DimensionMismatch {
                what: "optimizer moments".to_string(),
                expected: vec![shape[0], shape[1], shape[0]],
                got: vec![moment_2.dims()[0], moment_2.dims()[1], row_steps.len()],
            });
        }
        Ok(Self {
            moment_1,
            moment_2,
            row_steps,
        })
    }

    /// First moment.
    pub fn moment_1(&self) -> &Tensor<B, 2> {
        &self.moment_1
    }

    /// Second moment.
    pub fn moment_2(&self) -> &Tensor<B, 2> {
        &self.moment_2
    }

    /// Steps taken by each row.
    pub fn row_steps(&self) -> &[u64] {
        &self.row_steps
    }

    /// Shape of the parameter this state belongs to.
    pub fn shape(&self) -> [usize; 2] {
        self.moment_1.dims()
    }

    /// Perform an optimization step and return the updated parameter.
    ///
    /// With `rows = Some(ids)` only those rows (and their moments) change.
    pub fn step(
        &mut self,
        param: Tensor<B, 2>,
        grad: Tensor<B, 2>,
        learning_rate: f64,
        rows: Option<&[usize]>,
        config: &AdamConfig,
    ) -> Tensor<B, 2> {
        let [num_rows, cols] = self.shape();
        let device = param.device();
        let (b1, b2) = (config.beta_1, config.beta_2);

        let mut active = vec![rows.is_none(); num_rows];
        if let Some(ids) = rows {
            for &r in ids {
                if r < num_rows {
                    active[r] = true;
                }
            }
        }

        let mut correction_1 = vec![1.0f32; num_rows];
        let mut correction_2 = vec![1.0f32; num_rows];
        for (r, is_active) in active.iter().enumerate() {
            if *is_active {
                self.row_steps[r] += 1;
                let t = self.row_steps[r].min(i32::MAX as u64) as i32;
                correction_1[r] = 1.0 - b1.powi(t);
                correction_2[r] = 1.0 - b2.powi(t);
            }
        }

        let delta_1 = (grad.clone() - self.moment_1.clone()) * (1.0 - b1);
        let delta_2 = (grad.clone() * grad - self.moment_2.clone()) * (1.0 - b2);
        let mask = rows.map(|ids| row_mask::<B>(ids, num_rows, &device).repeat_dim(1, cols));

        let (delta_1, delta_2) = match &mask {
            Some(mask) => (delta_1 * mask.clone(), delta_2 * mask.clone()),
            None => (delta_1, delta_2),
        };
        self.moment_1 = self.moment_1.clone() + delta_1;
        self.moment_2 = self.moment_2.clone() + delta_2;

        let correction_1 = matrix::<B>(correction_1, num_rows, 1, &device).repeat_dim(1, cols);
        let correction_2 = matrix::<B>(correction_2, num_rows, 1, &device).repeat_dim(1, cols);
        let m_hat = self.moment_1.clone() / correction_1;
        let v_hat = self.moment_2.clone() / correction_2;
        let update = m_hat / (v_hat.sqrt() + config.epsilon) * learning_rate as f32;

        match mask {
            Some(mask) => param - update * mask,
            None => param - update,
        }
    }
}

/// Global L2 norm of a set of gradients.
pub fn global_grad_norm<B: Backend>(grads: &[Tensor<B, 2>]) -> crate::error::Result<f32> {
    let mut total = 0.0f32;
    for g in grads {
        let n = frobenius_norm(g.clone())?;
        total += n * n;
    }
    Ok(total.sqrt())
}

/// Scale `grads` so their global L2 norm is at most `max_norm`.
///
/// Returns the clipped gradients and the norm before clipping.
pub fn clip_grad_norm<B: Backend>(grads: Vec<Tensor<B, 2>>, max_norm: f32) -> crate::error::Result<(Vec<Tensor<B, 2>>, f32)> {
    let norm = global_grad_norm(&grads)?;
    let coef = max_norm / (norm + 1e-6);
    if coef < 1.0 {
        Ok((grads.into_iter().map(|g| g * coef).collect(), norm))
    } else {
        Ok((grads, norm))
    }
}

/// Optimizer state of the three parameter groups.
#[derive(Debug, Clone)]
pub struct OptimizerState<B: Backend> {
    /// One state per decoder parameter, in parameter order.
    pub decoder: Vec<AdamState<B>>,
    /// Latent mean table.
    pub mean: AdamState<B>,
    /// Latent log-variance table.
    pub log_var: AdamState<B>,
}

impl<B: Backend> OptimizerState<B> {
    /// Zero state for the given parameter shapes.
    pub fn new(decoder_shapes: &[[usize; 2]], latent_shape: [usize; 2], device: &B::Device) -> Self {
        Self {
            decoder: decoder_shapes.iter().map(|&s| AdamState::new(s, device)).collect(),
            mean: AdamState::new(latent_shape, device),
            log_var: AdamState::new(latent_shape, device),
        }
    }

    /// States in persisted order: decoder parameters, mean, log-variance.
    pub fn states(&self) -> impl Iterator<Item = &AdamState<B>> {
        self.decoder.iter().chain([&self.mean, &self.log_var])
    }
}
