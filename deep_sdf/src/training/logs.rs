//! Rolling training logs persisted as `Logs.json`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::evaluation::EvaluationRecord;
use crate::error::{DeepSdfError, Result};
use crate::loss::LossBreakdown;

/// Everything recorded for one finished epoch.
#[derive(Debug, Clone, Default)]
pub struct EpochRecord {
    /// Epoch number.
    pub epoch: usize,
    /// Total loss of each applied batch.
    pub batch_losses: Vec<f32>,
    /// Mean loss of the epoch.
    pub epoch_loss: f32,
    /// Mean loss terms of the epoch.
    pub components: LossBreakdown,
    /// Learning rates of the decoder, mean and log-variance groups.
    pub learning_rates: [f64; 3],
    /// Wall time in seconds.
    pub seconds: f64,
    /// Mean latent norm after the epoch.
    pub latent_magnitude: f32,
    /// Frobenius norm of every decoder parameter.
    pub param_magnitudes: Vec<(String, f32)>,
    /// Batches dropped for non-finite losses.
    pub skipped_batches: usize,
}

/// Loss, learning rate, timing and magnitude histories.
///
/// Per-epoch vectors have one entry per finished epoch; `loss` has one entry
/// per applied batch, grouped by `batches_per_epoch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingLogs {
    /// Last epoch recorded.
    pub epoch: usize,
    /// Per-batch total loss.
    pub loss: Vec<f32>,
    /// Applied batches in each epoch.
    pub batches_per_epoch: Vec<usize>,
    /// Per-epoch mean loss.
    pub epoch_loss: Vec<f32>,
    /// Per-epoch mean loss terms.
    pub components: Vec<LossBreakdown>,
    /// Per-epoch learning rates.
    pub learning_rate: Vec<[f64; 3]>,
    /// Per-epoch wall time in seconds.
    pub timing: Vec<f64>,
    /// Per-epoch mean latent norm.
    pub latent_magnitude: Vec<f32>,
    /// Per-epoch norm of each decoder parameter.
    pub param_magnitude: BTreeMap<String, Vec<f32>>,
    /// Per-epoch count of skipped batches.
    pub skipped_batches: Vec<usize>,
    /// Evaluation results.
    pub evaluations: Vec<EvaluationRecord>,
}

impl TrainingLogs {
    /// Append one epoch.
    pub fn push_epoch(&mut self, record: EpochRecord) {
        self.epoch = record.epoch;
        self.batches_per_epoch.push(record.batch_losses.len());
        self.loss.extend(record.batch_losses);
        self.epoch_loss.push(record.epoch_loss);
        self.components.push(record.components);
        self.learning_rate.push(record.learning_rates);
        self.timing.push(record.seconds);
        self.latent_magnitude.push(record.latent_magnitude);
        for (name, value) in record.param_magnitudes {
            self.param_magnitude.entry(name).or_default().push(value);
        }
        self.skipped_batches.push(record.skipped_batches);
    }

    /// Drop everything recorded after `epoch`.
    pub fn clip(&mut self, epoch: usize) {
        let keep = epoch.min(self.epoch_loss.len());
        let batches: usize = self.batches_per_epoch.iter().take(keep).sum();

        self.loss.truncate(batches);
        self.batches_per_epoch.truncate(keep);
        self.epoch_loss.truncate(keep);
        self.components.truncate(keep);
        self.learning_rate.truncate(keep);
        self.timing.truncate(keep);
        self.latent_magnitude.truncate(keep);
        for values in self.param_magnitude.values_mut() {
            values.truncate(keep);
        }
        self.skipped_batches.truncate(keep);
        self.evaluations.retain(|e| e.epoch <= epoch);
        self.epoch = epoch;
    }

    /// Lowest per-batch loss.
    pub fn best_loss(&self) -> Option<f32> {
        self.loss.iter().copied().filter(|v| v.is_finite()).reduce(f32::min)
    }

    /// Total training time in seconds.
    pub fn total_seconds(&self) -> f64 {
        self.timing.iter().sum()
    }

    /// Write as JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Read from JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DeepSdfError::MissingFile {
                path: path.to_path_buf(),
            });
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(epoch: usize, batches: usize) -> EpochRecord {
        EpochRecord {
            epoch,
            batch_losses: vec![epoch as f32; batches],
            epoch_loss: epoch as f32,
            learning_rates: [1e-3; 3],
            seconds: 0.5,
            latent_magnitude: 0.1,
            param_magnitudes: vec![("lin0.weight".to_string(), 1.0)],
            ..Default::default()
        }
    }

    #[test]
    fn test_clip_uses_batch_counts() {
        let mut logs = TrainingLogs::default();
        logs.push_epoch(record(1, 3));
        logs.push_epoch(record(2, 2));
        logs.push_epoch(record(3, 4));
        assert_eq!(logs.loss.len(), 9);

        logs.clip(2);
        assert_eq!(logs.epoch, 2);
        assert_eq!(logs.loss.len(), 5);
        assert_eq!(logs.epoch_loss, vec![1.0, 2.0]);
        assert_eq!(logs.param_magnitude["lin0.weight"].len(), 2);
    }

    #[test]
    fn test_save_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Logs.json");
        let mut logs = TrainingLogs::default();
        logs.push_epoch(record(1, 2));
        logs.save(&path).unwrap();
        assert_eq!(TrainingLogs::load(&path).unwrap(), logs);
        assert_eq!(logs.best_loss(), Some(1.0));
    }

    #[test]
    fn test_missing_logs() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            TrainingLogs::load(dir.path().join("Logs.json")),
            Err(DeepSdfError::MissingFile { .. })
        ));
    }
}
