//! Auto-decoder MLP mapping `latent ⧺ xyz` to a signed distance.

use burn::prelude::*;
use burn::tensor::activation::relu;
use burn::tensor::backend::AutodiffBackend;
use rand::Rng;

use crate::config::SdfDecoderConfig;
use crate::error::{DeepSdfError, Result};
use crate::tensor_ops::matrix;

/// A differentiable shape decoder.
///
/// Input rows are `[latent (latent_size), x, y, z]`; output is `[rows, 1]`.
pub trait SdfForward<B: Backend> {
    /// Latent dimensionality expected in the input.
    fn latent_size(&self) -> usize;

    /// Evaluate the field for every input row.
    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2>;

    /// Evaluate with a latent per row and separate coordinates.
    fn forward_with_latents(&self, latents: Tensor<B, 2>, xyz: Tensor<B, 2>) -> Tensor<B, 2> {
        self.forward(Tensor::cat(vec![latents, xyz], 1))
    }
}

/// Fully connected layer stored as explicit tensors.
#[derive(Debug, Clone)]
pub struct DenseLayer<B: Backend> {
    /// Weight matrix `[in, out]`.
    pub weight: Tensor<B, 2>,
    /// Bias row `[1, out]`.
    pub bias: Tensor<B, 2>,
}

impl<B: Backend> DenseLayer<B> {
    /// Uniform `±1/sqrt(in)` initialization, drawn from `rng`.
    pub fn new<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        let bound = 1.0 / (in_dim as f32).sqrt();
        let mut uniform = |count: usize| -> Vec<f32> {
            (0..count).map(|_| rng.gen_range(-bound..bound)).collect()
        };
        let weight = matrix(uniform(in_dim * out_dim), in_dim, out_dim, device);
        let bias = matrix(uniform(out_dim), 1, out_dim, device);
        Self { weight, bias }
    }

    /// `x @ weight + bias`.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        x.matmul(self.weight.clone()) + self.bias.clone()
    }

    /// Input width.
    pub fn in_dim(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Output width.
    pub fn out_dim(&self) -> usize {
        self.weight.dims()[1]
    }
}

/// DeepSDF decoder: ReLU MLP with input re-concatenation at `latent_in`
/// layers and an optional final tanh.
#[derive(Debug, Clone)]
pub struct SdfDecoder<B: Backend> {
    layers: Vec<DenseLayer<B>>,
    latent_in: Vec<usize>,
    use_tanh: bool,
    latent_size: usize,
}

impl<B: Backend> SdfDecoder<B> {
    /// Create a decoder with freshly initialized weights.
    pub fn new<R: Rng + ?Sized>(
        config: &SdfDecoderConfig,
        latent_size: usize,
        rng: &mut R,
        device: &B::Device,
    ) -> Self {
        let input_dim = latent_size + 3;
        let num_layers = config.num_layers();
        let mut layers = Vec::with_capacity(num_layers);
        let mut in_dim = input_dim;

        for layer in 0..num_layers {
            if layer > 0 && config.latent_in.contains(&layer) {
                in_dim += input_dim;
            }
            let out_dim = config.hidden_dims.get(layer).copied().unwrap_or(1);
            layers.push(DenseLayer::new(in_dim, out_dim, rng, device));
            in_dim = out_dim;
        }

        Self {
            layers,
            latent_in: config.latent_in.clone(),
            use_tanh: config.use_tanh,
            latent_size,
        }
    }

    /// Layers in evaluation order.
    pub fn layers(&self) -> &[DenseLayer<B>] {
        &self.layers
    }

    /// Parameter tensors in the order `lin0.weight, lin0.bias, lin1.weight, ...`.
    pub fn parameters(&self) -> Vec<Tensor<B, 2>> {
        self.layers
            .iter()
            .flat_map(|l| [l.weight.clone(), l.bias.clone()])
            .collect()
    }

    /// Names matching [`SdfDecoder::parameters`].
    pub fn parameter_names(&self) -> Vec<String> {
        (0..self.layers.len())
            .flat_map(|i| [format!("lin{i}.weight"), format!("lin{i}.bias")])
            .collect()
    }

    /// Shapes matching [`SdfDecoder::parameters`].
    pub fn parameter_shapes(&self) -> Vec<[usize; 2]> {
        self.parameters().iter().map(|p| p.dims()).collect()
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.parameter_shapes().iter().map(|[r, c]| r * c).sum()
    }

    /// Replace every parameter, keeping the architecture.
    pub fn with_parameters(&self, params: Vec<Tensor<B, 2>>) -> Result<Self> {
        let expected = self.parameter_shapes();
        if params.len() != expected.len() {
            return Err(DeepSdfError::DimensionMismatch {
                what: "decoder parameter count".to_string(),
                expected: vec![expected.len()],
                got: vec![params.len()],
            });
        }
        for ((param, shape), name) in params.iter().zip(&expected).zip(self.parameter_names()) {
            if param.dims() != *shape {
                return Err(DeepSdfError::DimensionMismatch {
                    what: name,
                    expected: shape.to_vec(),
                    got: param.dims().to_vec(),
                });
            }
        }

        let mut iter = params.into_iter();
        let mut layers = Vec::with_capacity(self.layers.len());
        while let (Some(weight), Some(bias)) = (iter.next(), iter.next()) {
            layers.push(DenseLayer { weight, bias });
        }

        Ok(Self {
            layers,
            latent_in: self.latent_in.clone(),
            use_tanh: self.use_tanh,
            latent_size: self.latent_size,
        })
    }

    /// Device holding the parameters.
    pub fn device(&self) -> B::Device {
        self.layers[0].weight.device()
    }
}

impl<B: Backend> SdfForward<B> for SdfDecoder<B> {
    fn latent_size(&self) -> usize {
        self.latent_size
    }

    fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let last = self.layers.len() - 1;
        let mut x = input.clone();

        for (i, layer) in self.layers.iter().enumerate() {
            if i > 0 && self.latent_in.contains(&i) {
                x = Tensor::cat(vec![x, input.clone()], 1);
            }
            x = layer.forward(x);
            if i < last {
                x = relu(x);
            } else if self.use_tanh {
                x = x.tanh();
            }
        }

        x
    }
}

impl<B: AutodiffBackend> SdfDecoder<B> {
    /// Parameters without autodiff tracking.
    pub fn inner(&self) -> SdfDecoder<B::InnerBackend> {
        self.map_layers(|t| t.inner())
    }

    /// Wrap plain parameters as trainable leaves.
    pub fn from_inner(decoder: SdfDecoder<B::InnerBackend>) -> Self {
        decoder.map_layers(|t| Tensor::from_inner(t).require_grad())
    }

    /// A copy whose parameters receive no gradients.
    pub fn frozen(&self) -> Self {
        self.map_layers(|t| t.detach())
    }
}

impl<B: Backend> SdfDecoder<B> {
    fn map_layers<B2: Backend>(&self, f: impl Fn(Tensor<B, 2>) -> Tensor<B2, 2>) -> SdfDecoder<B2> {
        SdfDecoder {
            layers: self
                .layers
                .iter()
                .map(|l| DenseLayer {
                    weight: f(l.weight.clone()),
                    bias: f(l.bias.clone()),
                })
                .collect(),
            latent_in: self.latent_in.clone(),
            use_tanh: self.use_tanh,
            latent_size: self.latent_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn small_config() -> SdfDecoderConfig {
        SdfDecoderConfig::new()
            .with_hidden_dims(vec![16, 16, 16])
            .with_latent_in(vec![2])
    }

    #[test]
    fn test_decoder_shapes() {
        let device = NdArrayDevice::Cpu;
        let mut rng = StdRng::seed_from_u64(0);
        let decoder = SdfDecoder::<TestBackend>::new(&small_config(), 8, &mut rng, &device);

        // layer 2 receives 16 + (8 + 3) inputs
        assert_eq!(
            decoder.parameter_shapes(),
            vec![[11, 16], [1, 16], [16, 16], [1, 16], [27, 16], [1, 16], [16, 1], [1, 1]]
        );
        assert_eq!(decoder.parameter_names()[4], "lin2.weight");

        let input = Tensor::<TestBackend, 2>::zeros([5, 11], &device);
        let output = decoder.forward(input);
        assert_eq!(output.dims(), [5, 1]);
    }

    #[test]
    fn test_same_seed_same_weights() {
        let device = NdArrayDevice::Cpu;
        let a = SdfDecoder::<TestBackend>::new(&small_config(), 4, &mut StdRng::seed_from_u64(3), &device);
        let b = SdfDecoder::<TestBackend>::new(&small_config(), 4, &mut StdRng::seed_from_u64(3), &device);
        for (pa, pb) in a.parameters().into_iter().zip(b.parameters()) {
            let va: Vec<f32> = pa.to_data().to_vec().unwrap();
            let vb: Vec<f32> = pb.to_data().to_vec().unwrap();
            assert_eq!(va, vb);
        }
    }

    #[test]
    fn test_tanh_bounds_output() {
        let device = NdArrayDevice::Cpu;
        let mut rng = StdRng::seed_from_u64(1);
        let decoder =
            SdfDecoder::<TestBackend>::new(&small_config().with_use_tanh(true), 2, &mut rng, &device);
        let input = Tensor::<TestBackend, 2>::ones([4, 5], &device) * 100.0;
        let values: Vec<f32> = decoder.forward(input).to_data().to_vec().unwrap();
        assert!(values.iter().all(|v| v.abs() <= 1.0));
    }

    #[test]
    fn test_with_parameters_rejects_bad_shapes() {
        let device = NdArrayDevice::Cpu;
        let mut rng = StdRng::seed_from_u64(2);
        let decoder = SdfDecoder::<TestBackend>::new(&small_config(), 2, &mut rng, &device);
        let mut params = decoder.parameters();
        params[0] = Tensor::zeros([3, 3], &device);
        assert!(matches!(
            decoder.with_parameters(params),
            Err(DeepSdfError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_gradients_reach_every_parameter() {
        let device = NdArrayDevice::Cpu;
        let mut rng = StdRng::seed_from_u64(4);
        let decoder = SdfDecoder::<TestAutodiffBackend>::new(&small_config(), 2, &mut rng, &device);
        let decoder = SdfDecoder::from_inner(decoder.inner());

        let input = Tensor::<TestAutodiffBackend, 2>::random(
            [32, 5],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let grads = decoder.forward(input).sum().backward();
        for param in decoder.parameters() {
            assert!(param.grad(&grads).is_some());
        }

        let frozen = decoder.frozen();
        let input = Tensor::<TestAutodiffBackend, 2>::ones([2, 5], &device).require_grad();
        let grads = frozen.forward(input.clone()).sum().backward();
        assert!(input.grad(&grads).is_some());
        assert!(frozen.parameters()[0].grad(&grads).is_none());
    }
}
