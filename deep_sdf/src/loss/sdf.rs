//! Reconstruction losses.

use burn::prelude::*;

/// Clamp distances to `[-distance, distance]`.
pub fn clamp_sdf<B: Backend>(sdf: Tensor<B, 2>, distance: f32) -> Tensor<B, 2> {
    sdf.clamp(-distance, distance)
}

/// Sum of absolute differences.
pub fn l1_sum<B: Backend>(pred: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    (pred - target).abs().sum()
}

/// Mean absolute difference.
pub fn l1_mean<B: Backend>(pred: Tensor<B, 2>, target: Tensor<B, 2>) -> Tensor<B, 1> {
    (pred - target).abs().mean()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_clamped_l1() {
        let device = NdArrayDevice::Cpu;
        let pred = Tensor::<TestBackend, 2>::from_floats([[0.5], [-0.05], [0.0]], &device);
        let target = Tensor::<TestBackend, 2>::from_floats([[0.2], [-0.5], [0.02]], &device);

        let loss = l1_sum(clamp_sdf(pred.clone(), 0.1), clamp_sdf(target.clone(), 0.1));
        let value: f32 = loss.into_scalar();
        // |0.1 - 0.1| + |-0.05 + 0.1| + |0 - 0.02|
        assert!((value - 0.07).abs() < 1e-6);

        let mean: f32 = l1_mean(pred, target).into_scalar();
        assert!((mean - (0.3 + 0.45 + 0.02) / 3.0).abs() < 1e-6);
    }
}
