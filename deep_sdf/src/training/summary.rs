//! Final report written when training stops, however it stops.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DeepSdfError, Result};

/// Why the training loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// All configured epochs finished.
    Completed,
    /// The cancellation token was triggered.
    Interrupted,
    /// An error ended training.
    Failed,
}

/// Contents of `TrainingSummary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// How training ended.
    pub stop_reason: StopReason,
    /// Error message when `stop_reason` is `Failed`.
    pub error: Option<String>,
    /// Last fully completed epoch.
    pub last_epoch: usize,
    /// Configured number of epochs.
    pub num_epochs: usize,
    /// Number of decoder weights.
    pub decoder_parameters: usize,
    /// Decoder size in MiB at 4 bytes per weight.
    pub decoder_size_mb: f64,
    /// Shape of each latent table.
    pub latent_table_shape: [usize; 2],
    /// Learning rates of the last completed epoch.
    pub last_learning_rates: Option<[f64; 3]>,
    /// Lowest per-batch loss.
    pub best_batch_loss: Option<f32>,
    /// Lowest mean Chamfer distance on the training subset.
    pub best_train_chamfer: Option<f32>,
    /// Lowest mean Chamfer distance on the held-out subset.
    pub best_test_chamfer: Option<f32>,
    /// Summed epoch wall time in seconds.
    pub total_seconds: f64,
}

impl TrainingSummary {
    /// Write as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Read a summary.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DeepSdfError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    /// Emit the summary at info level.
    pub fn log(&self) {
        log::info!(
            "Training stopped ({:?}) after epoch {}/{}",
            self.stop_reason,
            self.last_epoch,
            self.num_epochs
        );
        log::info!(
            "Decoder: {} parameters ({:.3} MB), latent tables {}x{}",
            self.decoder_parameters,
            self.decoder_size_mb,
            self.latent_table_shape[0],
            self.latent_table_shape[1]
        );
        if let Some(loss) = self.best_batch_loss {
            log::info!("Best batch loss: {:.6}", loss);
        }
    }
}
