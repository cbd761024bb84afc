//! Mean and log-variance tables, one row per training shape.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::Rng;

use crate::config::{LatentInitConfig, LogVarInit};
use crate::error::{DeepSdfError, Result};
use crate::tensor_ops::{indices, matrix, normal_values, row_mask, to_vec};

/// Latent distribution bank.
///
/// Row `i` of `mean` and `log_var` parameterizes the Gaussian of shape `i`.
/// Both tables are trained directly; there is no encoder.
#[derive(Debug, Clone)]
pub struct LatentBank<B: Backend> {
    /// Mean table `[num_shapes, latent_size]`.
    pub mean: Tensor<B, 2>,
    /// Log-variance table `[num_shapes, latent_size]`.
    pub log_var: Tensor<B, 2>,
    code_bound: Option<f32>,
}

impl<B: Backend> LatentBank<B> {
    /// Initialize both tables.
    ///
    /// Means are drawn from `N(0, code_init_std_dev / sqrt(latent_size))`.
    /// Log-variances follow [`LogVarInit`].
    pub fn new<R: Rng + ?Sized>(
        num_shapes: usize,
        latent_size: usize,
        config: &LatentInitConfig,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        let std_dev = config.code_init_std_dev / (latent_size as f32).sqrt();
        let count = num_shapes * latent_size;

        let mean = matrix(normal_values(count, std_dev, rng), num_shapes, latent_size, device);
        let log_var = match config.log_var_init {
            LogVarInit::MatchMean => {
                matrix(normal_values(count, std_dev, rng), num_shapes, latent_size, device)
            }
            LogVarInit::Constant { value } => Tensor::full([num_shapes, latent_size], value, device),
        };

        Self {
            mean,
            log_var,
            code_bound: config.code_bound,
        }
    }

    /// Assemble a bank from existing tables.
    pub fn from_tables(mean: Tensor<B, 2>, log_var: Tensor<B, 2>, code_bound: Option<f32>) -> Result<Self> {
        if mean.dims() != log_var.dims() {
            return Err(DeepSdfError::DimensionMismatch {
                what: "log-variance table".to_string(),
                expected: mean.dims().to_vec(),
                got: log_var.dims().to_vec(),
            });
        }
        Ok(Self {
            mean,
            log_var,
            code_bound,
        })
    }

    /// Number of rows.
    pub fn num_shapes(&self) -> usize {
        self.mean.dims()[0]
    }

    /// Latent dimensionality.
    pub fn latent_size(&self) -> usize {
        self.mean.dims()[1]
    }

    /// Maximum row norm enforced on lookup, if any.
    pub fn code_bound(&self) -> Option<f32> {
        self.code_bound
    }

    /// Device holding the tables.
    pub fn device(&self) -> B::Device {
        self.mean.device()
    }

    /// Fail with [`DeepSdfError::DimensionMismatch`] unless the tables are
    /// `[num_shapes, latent_size]`.
    pub fn check_dims(&self, num_shapes: usize, latent_size: usize) -> Result<()> {
        let expected = [num_shapes, latent_size];
        for (what, table) in [("latent mean table", &self.mean), ("latent log-variance table", &self.log_var)] {
            if table.dims() != expected {
                return Err(DeepSdfError::DimensionMismatch {
                    what: what.to_string(),
                    expected: expected.to_vec(),
                    got: table.dims().to_vec(),
                });
            }
        }
        Ok(())
    }

    /// `(mean, log_var)` rows for `ids`, in order.
    pub fn lookup(&self, ids: &[usize]) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let index = indices::<B>(ids, &self.device());
        (
            self.mean.clone().select(0, index.clone()),
            self.log_var.clone().select(0, index),
        )
    }

    /// Mean row of one shape, `[1, latent_size]`.
    pub fn mean_row(&self, id: usize) -> Tensor<B, 2> {
        let latent_size = self.latent_size();
        self.mean.clone().slice([id..id + 1, 0..latent_size])
    }

    /// Mean L2 norm of all mean rows.
    pub fn mean_magnitude(&self) -> Result<f32> {
        let norms = to_vec(self.mean.clone().powf_scalar(2.0).sum_dim(1).sqrt())?;
        Ok(norms.iter().sum::<f32>() / norms.len().max(1) as f32)
    }

    /// Rescale the rows `ids` of both tables whose norm exceeds the code bound.
    ///
    /// Operates on the table values; call it on plain tensors, not on
    /// autodiff leaves.
    pub fn apply_code_bound(&self, ids: &[usize]) -> Self {
        let Some(bound) = self.code_bound else {
            return self.clone();
        };
        let device = self.device();
        let [rows, cols] = self.mean.dims();
        let mask = row_mask::<B>(ids, rows, &device).repeat_dim(1, cols);

        let renorm = |table: Tensor<B, 2>| -> Tensor<B, 2> {
            let norm = table.clone().powf_scalar(2.0).sum_dim(1).sqrt().repeat_dim(1, cols);
            let scale = (norm.clamp_min(1e-7).recip() * bound).clamp_max(1.0);
            let scale = mask.clone() * scale + (mask.clone().neg() + 1.0);
            table * scale
        };

        Self {
            mean: renorm(self.mean.clone()),
            log_var: renorm(self.log_var.clone()),
            code_bound: self.code_bound,
        }
    }
}

impl<B: AutodiffBackend> LatentBank<B> {
    /// Tables without autodiff tracking.
    pub fn inner(&self) -> LatentBank<B::InnerBackend> {
        LatentBank {
            mean: self.mean.clone().inner(),
            log_var: self.log_var.clone().inner(),
            code_bound: self.code_bound,
        }
    }

    /// Wrap plain tables as trainable leaves.
    pub fn from_inner(bank: LatentBank<B::InnerBackend>) -> Self {
        Self {
            mean: Tensor::from_inner(bank.mean).require_grad(),
            log_var: Tensor::from_inner(bank.log_var).require_grad(),
            code_bound: bank.code_bound,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray;

    #[test]
    fn test_init_statistics() {
        let device = NdArrayDevice::Cpu;
        let mut rng = StdRng::seed_from_u64(0);
        let bank = LatentBank::<TestBackend>::new(500, 16, &LatentInitConfig::new(), &mut rng, &device);

        let values = to_vec(bank.mean.clone()).unwrap();
        let var = values.iter().map(|v| v * v).sum::<f32>() / values.len() as f32;
        // std = 1 / sqrt(16)
        assert!((var - 1.0 / 16.0).abs() < 0.01, "variance {var}");

        let log_var = to_vec(bank.log_var.clone()).unwrap();
        assert_ne!(values, log_var);
    }

    #[test]
    fn test_constant_log_var() {
        let device = NdArrayDevice::Cpu;
        let mut rng = StdRng::seed_from_u64(0);
        let config = LatentInitConfig::new().with_log_var_init(LogVarInit::Constant { value: -4.0 });
        let bank = LatentBank::<TestBackend>::new(3, 2, &config, &mut rng, &device);
        assert!(to_vec(bank.log_var).unwrap().iter().all(|&v| v == -4.0));
    }

    #[test]
    fn test_lookup_rows() {
        let device = NdArrayDevice::Cpu;
        let mean = Tensor::<TestBackend, 2>::from_floats([[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]], &device);
        let log_var = mean.clone() * -1.0;
        let bank = LatentBank::from_tables(mean, log_var, None).unwrap();

        let (mu, lv) = bank.lookup(&[2, 0, 2]);
        assert_eq!(to_vec(mu).unwrap(), vec![2.0, 2.0, 0.0, 0.0, 2.0, 2.0]);
        assert_eq!(to_vec(lv).unwrap(), vec![-2.0, -2.0, -0.0, -0.0, -2.0, -2.0]);
        assert_eq!(to_vec(bank.mean_row(1)).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_mean_magnitude() {
        let device = NdArrayDevice::Cpu;
        let mean = Tensor::<TestBackend, 2>::from_floats([[3.0, 4.0], [0.0, 1.0]], &device);
        let bank = LatentBank::from_tables(mean.clone(), mean, None).unwrap();
        assert!((bank.mean_magnitude().unwrap() - 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_dimension_mismatch() {
        let device = NdArrayDevice::Cpu;
        let mut rng = StdRng::seed_from_u64(0);
        let bank = LatentBank::<TestBackend>::new(4, 8, &LatentInitConfig::new(), &mut rng, &device);
        assert!(bank.check_dims(4, 8).is_ok());
        assert!(matches!(
            bank.check_dims(5, 8),
            Err(DeepSdfError::DimensionMismatch { .. })
        ));
        let mismatched = LatentBank::from_tables(
            Tensor::<TestBackend, 2>::zeros([2, 2], &device),
            Tensor::<TestBackend, 2>::zeros([2, 3], &device),
            None,
        );
        assert!(mismatched.is_err());
    }

    #[test]
    fn test_code_bound_only_touches_selected_rows() {
        let device = NdArrayDevice::Cpu;
        let mean = Tensor::<TestBackend, 2>::from_floats([[3.0, 4.0], [6.0, 8.0], [0.3, 0.4]], &device);
        let bank = LatentBank::from_tables(mean.clone(), mean, Some(1.0)).unwrap();

        let bounded = bank.apply_code_bound(&[0, 2]);
        let values = to_vec(bounded.mean).unwrap();
        let expected = [0.6, 0.8, 6.0, 8.0, 0.3, 0.4];
        for (v, e) in values.iter().zip(expected) {
            assert!((v - e).abs() < 1e-5, "{values:?}");
        }
    }
}
