//! Soft nearest-neighbour loss guiding one latent dimension by shape label.

use burn::prelude::*;

use crate::tensor_ops::matrix;

const STABILITY_EPS: f32 = 1e-5;

/// Soft nearest-neighbour loss on latent codes.
///
/// Pairwise similarities along the designated dimension 0 pull same-label
/// codes together; similarities along the remaining dimensions, restricted
/// to same-label pairs, enter the denominator so those dimensions are not
/// used to separate labels.
#[derive(Debug, Clone, Copy)]
pub struct SnnLoss {
    temperature: f32,
}

impl SnnLoss {
    /// Create the loss with temperature `temperature`.
    pub fn new(temperature: f32) -> Self {
        Self { temperature }
    }

    /// `exp(-(x_i - x_j)² / T)` for column `dim`, zeroed on the diagonal.
    fn similarity<B: Backend>(&self, latents: &Tensor<B, 2>, dim: usize, off_diagonal: &Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch, _] = latents.dims();
        let column = latents.clone().slice([0..batch, dim..dim + 1]);
        let rows = column.clone().repeat_dim(1, batch);
        let cols = column.transpose().repeat_dim(0, batch);
        let squared = (rows - cols).powf_scalar(2.0);
        (squared / self.temperature).neg().exp() * off_diagonal.clone()
    }

    /// Loss for `latents` (`[batch, d]`, `d >= 2`) with one label per row.
    pub fn forward<B: Backend>(&self, latents: Tensor<B, 2>, labels: &[f32]) -> Tensor<B, 1> {
        let [batch, dims] = latents.dims();
        let device = latents.device();

        let mut same = vec![0.0f32; batch * batch];
        let mut off = vec![1.0f32; batch * batch];
        for i in 0..batch {
            off[i * batch + i] = 0.0;
            for j in 0..batch {
                if labels.get(i) == labels.get(j) {
                    same[i * batch + j] = 1.0;
                }
            }
        }
        let same = matrix::<B>(same, batch, batch, &device);
        let off_diagonal = matrix::<B>(off, batch, batch, &device);

        let guided = self.similarity(&latents, 0, &off_diagonal);
        let numerator = (guided.clone() * same.clone()).sum_dim(1);
        let denominator = guided.sum_dim(1);

        let mut others = Tensor::<B, 2>::zeros([batch, 1], &device);
        for dim in 1..dims {
            others = others + (self.similarity(&latents, dim, &off_diagonal) * same.clone()).sum_dim(1);
        }
        let others = others / (dims.max(2) - 1) as f32;

        let ratio = numerator / (denominator * 0.5 + others * 0.5 + STABILITY_EPS);
        (ratio + STABILITY_EPS).log().neg().mean()
    }
}
