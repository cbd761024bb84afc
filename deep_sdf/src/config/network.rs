//! Decoder architecture configuration.

use burn::config::Config;

/// Configuration for the SDF decoder MLP.
///
/// The decoder maps `latent ⧺ xyz` to a single signed distance. Layers listed
/// in `latent_in` receive the original input concatenated to their features.
#[derive(Config, Debug)]
pub struct SdfDecoderConfig {
    /// Width of each hidden layer.
    #[config(default = "vec![512, 512, 512, 512, 512, 512, 512, 512]")]
    pub hidden_dims: Vec<usize>,

    /// Layer indices that re-concatenate the decoder input.
    #[config(default = "vec![4]")]
    pub latent_in: Vec<usize>,

    /// Apply tanh to the final output.
    #[config(default = false)]
    pub use_tanh: bool,
}

impl Default for SdfDecoderConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SdfDecoderConfig {
    /// A small decoder for quick experiments and tests.
    pub fn small() -> Self {
        Self::new()
            .with_hidden_dims(vec![64, 64, 64, 64])
            .with_latent_in(vec![2])
    }

    /// Number of linear layers, including the output layer.
    pub fn num_layers(&self) -> usize {
        self.hidden_dims.len() + 1
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.hidden_dims.is_empty() {
            return Err("decoder needs at least one hidden layer".to_string());
        }
        if self.hidden_dims.iter().any(|&d| d == 0) {
            return Err("hidden layer widths must be positive".to_string());
        }
        for &layer in &self.latent_in {
            if layer == 0 || layer >= self.num_layers() {
                return Err(format!(
                    "latent_in layer {} out of range 1..{}",
                    layer,
                    self.num_layers()
                ));
            }
        }
        Ok(())
    }
}
