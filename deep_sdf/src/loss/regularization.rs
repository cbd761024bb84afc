//! Latent and geometric regularization terms.

use burn::prelude::*;

/// `-0.5 * Σ(1 + log_var - mean² - exp(log_var))` summed over all rows.
pub fn kl_divergence<B: Backend>(mean: Tensor<B, 2>, log_var: Tensor<B, 2>) -> Tensor<B, 1> {
    let terms = log_var.clone() + 1.0 - mean.powf_scalar(2.0) - log_var.exp();
    terms.sum() * -0.5
}

/// Sum of the L2 norms of the rows of `latents`.
pub fn code_magnitude<B: Backend>(latents: Tensor<B, 2>) -> Tensor<B, 1> {
    latents.powf_scalar(2.0).sum_dim(1).sqrt().sum()
}

/// Linear ramp `min(1, epoch / ramp_epochs)`.
pub fn code_regularization_ramp(epoch: usize, ramp_epochs: usize) -> f32 {
    if ramp_epochs == 0 {
        1.0
    } else {
        (epoch as f32 / ramp_epochs as f32).min(1.0)
    }
}

/// Central-difference spatial gradient of `query_fn` at `points` (`[N, 3]`).
///
/// Returns `[N, 3]`. Differentiable with respect to whatever `query_fn`
/// closes over.
pub fn finite_difference_gradient<B: Backend, F>(query_fn: F, points: Tensor<B, 2>, eps: f32) -> Tensor<B, 2>
where
    F: Fn(Tensor<B, 2>) -> Tensor<B, 2>,
{
    let device = points.device();
    let [batch, _] = points.dims();
    let inv_2eps = 1.0 / (2.0 * eps);

    let offsets = [[eps, 0.0f32, 0.0], [0.0, eps, 0.0], [0.0, 0.0, eps]];
    let columns = offsets
        .into_iter()
        .map(|row| {
            let offset = Tensor::<B, 2>::from_data([row], &device).repeat_dim(0, batch);
            let forward = query_fn(points.clone() + offset.clone());
            let backward = query_fn(points.clone() - offset);
            (forward - backward) * inv_2eps
        })
        .collect();

    Tensor::cat(columns, 1)
}

/// `Σ (1 - |g|)²` over the rows of `gradients`.
pub fn eikonal_residual_sum<B: Backend>(gradients: Tensor<B, 2>) -> Tensor<B, 1> {
    let norms = gradients.powf_scalar(2.0).sum_dim(1).sqrt();
    (norms.neg() + 1.0).powf_scalar(2.0).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_kl_of_standard_normal_is_zero() {
        let device = NdArrayDevice::Cpu;
        let mean = Tensor::<TestBackend, 2>::zeros([4, 8], &device);
        let log_var = Tensor::<TestBackend, 2>::zeros([4, 8], &device);
        let kl: f32 = kl_divergence(mean, log_var).into_scalar();
        assert_eq!(kl, 0.0);
    }

    #[test]
    fn test_kl_is_positive_away_from_prior() {
        let device = NdArrayDevice::Cpu;
        let mean = Tensor::<TestBackend, 2>::ones([1, 2], &device);
        let log_var = Tensor::<TestBackend, 2>::zeros([1, 2], &device);
        let kl: f32 = kl_divergence(mean, log_var).into_scalar();
        // 0.5 * Σ mean²
        assert!((kl - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_code_magnitude() {
        let device = NdArrayDevice::Cpu;
        let z = Tensor::<TestBackend, 2>::from_floats([[3.0, 4.0], [0.0, 2.0]], &device);
        let value: f32 = code_magnitude(z).into_scalar();
        assert!((value - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_ramp() {
        assert_eq!(code_regularization_ramp(0, 100), 0.0);
        assert_eq!(code_regularization_ramp(50, 100), 0.5);
        assert_eq!(code_regularization_ramp(500, 100), 1.0);
        assert_eq!(code_regularization_ramp(3, 0), 1.0);
    }

    #[test]
    fn test_gradient_of_distance_field_has_unit_norm() {
        let device = NdArrayDevice::Cpu;
        let points =
            Tensor::<TestBackend, 2>::from_floats([[0.5, 0.0, 0.0], [0.0, -0.3, 0.4], [0.2, 0.2, 0.2]], &device);
        let sphere = |p: Tensor<TestBackend, 2>| p.powf_scalar(2.0).sum_dim(1).sqrt() - 0.25;

        let grads = finite_difference_gradient(sphere, points, 1e-3);
        assert_eq!(grads.dims(), [3, 3]);

        let residual: f32 = eikonal_residual_sum(grads.clone()).into_scalar();
        assert!(residual < 1e-4, "residual {residual}");

        let g: Vec<f32> = grads.to_data().to_vec().unwrap();
        assert!((g[0] - 1.0).abs() < 1e-3);
    }
}
