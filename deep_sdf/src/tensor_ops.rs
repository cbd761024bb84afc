//! Conversions between tensors and host data.

use burn::prelude::*;
use burn::tensor::Int;
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{DeepSdfError, Result};

/// Copy a float tensor back to the host.
pub(crate) fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| DeepSdfError::InvalidData(format!("tensor readback failed: {e:?}")))
}

/// Read a single-element tensor as `f32`.
pub(crate) fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> Result<f32> {
    to_vec(tensor)?
        .first()
        .copied()
        .ok_or_else(|| DeepSdfError::InvalidData("expected a scalar tensor".to_string()))
}

/// Build a `[rows, cols]` float tensor from row-major values.
pub(crate) fn matrix<B: Backend>(values: Vec<f32>, rows: usize, cols: usize, device: &B::Device) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(values, [rows, cols]), device)
}

/// Index tensor for `select`.
pub(crate) fn indices<B: Backend>(ids: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let ids: Vec<i64> = ids.iter().map(|&i| i as i64).collect();
    let len = ids.len();
    Tensor::from_data(TensorData::new(ids, [len]), device)
}

/// `[rows, 1]` mask with ones at `active` rows.
pub(crate) fn row_mask<B: Backend>(active: &[usize], rows: usize, device: &B::Device) -> Tensor<B, 2> {
    let mut mask = vec![0.0f32; rows];
    for &r in active {
        if r < rows {
            mask[r] = 1.0;
        }
    }
    matrix(mask, rows, 1, device)
}

/// Standard normal noise drawn from `rng` in row-major order.
pub fn standard_normal<B: Backend, R: Rng + ?Sized>(
    shape: [usize; 2],
    rng: &mut R,
    device: &B::Device,
) -> Tensor<B, 2> {
    let values: Vec<f32> = (0..shape[0] * shape[1])
        .map(|_| rng.sample(StandardNormal))
        .collect();
    matrix(values, shape[0], shape[1], device)
}

/// Normal noise with the given standard deviation.
pub(crate) fn normal_values<R: Rng + ?Sized>(count: usize, std_dev: f32, rng: &mut R) -> Vec<f32> {
    (0..count)
        .map(|_| rng.sample::<f32, _>(StandardNormal) * std_dev)
        .collect()
}

/// Fail with [`DeepSdfError::DeviceMismatch`] unless both devices agree.
pub(crate) fn ensure_same_device<B: Backend>(
    context: &str,
    data: &B::Device,
    model: &B::Device,
) -> Result<()> {
    if data == model {
        Ok(())
    } else {
        Err(DeepSdfError::DeviceMismatch {
            context: context.to_string(),
        })
    }
}

/// Frobenius norm of a tensor.
pub(crate) fn frobenius_norm<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<f32> {
    scalar(tensor.powf_scalar(2.0).sum()).map(f32::sqrt)
}
