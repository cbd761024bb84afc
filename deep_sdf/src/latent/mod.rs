//! Per-shape latent distributions.

mod bank;

pub use bank::LatentBank;

use burn::prelude::*;

/// Reparameterized sample `mean + exp(0.5 * log_var) * noise`.
///
/// Gradients flow to both `mean` and `log_var`; `noise` is treated as a
/// constant and must be redrawn for every forward pass.
pub fn reparameterize<B: Backend>(
    mean: Tensor<B, 2>,
    log_var: Tensor<B, 2>,
    noise: Tensor<B, 2>,
) -> Tensor<B, 2> {
    mean + (log_var * 0.5).exp() * noise
}

/// Linear blend `(1 - weight) * a + weight * b` of two latent codes.
///
/// `weight` outside `[0, 1]` extrapolates along the same line.
pub fn interpolate_latents<B: Backend>(a: Tensor<B, 2>, b: Tensor<B, 2>, weight: f32) -> Tensor<B, 2> {
    a * (1.0 - weight) + b * weight
}

/// `steps` evenly spaced weights from 0 to 1, both ends included.
pub fn interpolation_weights(steps: usize) -> Vec<f32> {
    match steps {
        0 => Vec::new(),
        1 => vec![0.0],
        _ => (0..steps).map(|i| i as f32 / (steps - 1) as f32).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_ops::standard_normal;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray;

    #[test]
    fn test_zero_variance_returns_mean() {
        let device = NdArrayDevice::Cpu;
        let mean = Tensor::<TestBackend, 2>::from_floats([[0.5, -1.25, 3.0], [0.0, 2.0, -0.75]], &device);
        let log_var = Tensor::<TestBackend, 2>::full([2, 3], f32::NEG_INFINITY, &device);
        let noise = standard_normal::<TestBackend, _>([2, 3], &mut StdRng::seed_from_u64(0), &device);

        let z: Vec<f32> = reparameterize(mean.clone(), log_var, noise).to_data().to_vec().unwrap();
        let mu: Vec<f32> = mean.to_data().to_vec().unwrap();
        assert_eq!(z, mu);
    }

    #[test]
    fn test_unit_variance_adds_noise() {
        let device = NdArrayDevice::Cpu;
        let mean = Tensor::<TestBackend, 2>::zeros([1, 4], &device);
        let log_var = Tensor::<TestBackend, 2>::zeros([1, 4], &device);
        let noise = Tensor::<TestBackend, 2>::from_floats([[1.0, -2.0, 0.5, 0.0]], &device);
        let z: Vec<f32> = reparameterize(mean, log_var, noise).to_data().to_vec().unwrap();
        assert_eq!(z, vec![1.0, -2.0, 0.5, 0.0]);
    }

    #[test]
    fn test_same_seed_same_noise() {
        let device = NdArrayDevice::Cpu;
        let a: Vec<f32> = standard_normal::<TestBackend, _>([2, 3], &mut StdRng::seed_from_u64(9), &device)
            .to_data()
            .to_vec()
            .unwrap();

        // Drawing the same rows in two calls consumes the generator identically.
        let mut rng = StdRng::seed_from_u64(9);
        let first = standard_normal::<TestBackend, _>([1, 3], &mut rng, &device);
        let second = standard_normal::<TestBackend, _>([1, 3], &mut rng, &device);
        let b: Vec<f32> = Tensor::cat(vec![first, second], 0).to_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_interpolation_endpoints_and_midpoint() {
        let device = NdArrayDevice::Cpu;
        let a = Tensor::<TestBackend, 2>::from_floats([[1.0, -2.0, 0.0]], &device);
        let b = Tensor::<TestBackend, 2>::from_floats([[3.0, 2.0, 4.0]], &device);

        let at = |w: f32| -> Vec<f32> {
            interpolate_latents(a.clone(), b.clone(), w)
                .into_data()
                .to_vec()
                .unwrap()
        };
        assert_eq!(at(0.0), vec![1.0, -2.0, 0.0]);
        assert_eq!(at(1.0), vec![3.0, 2.0, 4.0]);
        assert_eq!(at(0.5), vec![2.0, 0.0, 2.0]);
    }

    #[test]
    fn test_interpolation_weights() {
        assert!(interpolation_weights(0).is_empty());
        assert_eq!(interpolation_weights(1), vec![0.0]);
        assert_eq!(interpolation_weights(5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
    }
}
