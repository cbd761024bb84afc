//! Joint optimization of the decoder and the latent distribution bank.

use std::sync::Arc;
use std::time::Instant;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::checkpoint::{load_checkpoint, save_checkpoint, ExperimentDir, SnapshotTag};
use super::evaluation::{EvaluationSplit, Evaluator};
use super::logs::{EpochRecord, TrainingLogs};
use super::optimizer::{clip_grad_norm, AdamConfig, OptimizerState};
use super::summary::{StopReason, TrainingSummary};
use crate::cancel::CancellationToken;
use crate::config::{NonFinitePolicy, TrainingConfig};
use crate::data::{BatchLoader, EpochPlan, LoaderConfig, SampleBatch, SampleStore};
use crate::error::{DeepSdfError, Result};
use crate::latent::LatentBank;
use crate::loss::{LossBreakdown, SubBatchInputs, TrainingObjective};
use crate::nn::SdfDecoder;
use crate::tensor_ops::{ensure_same_device, frobenius_norm, indices, matrix, standard_normal};

/// Accumulated gradients of one mini-batch, before the optimizer step.
#[derive(Debug, Clone)]
pub struct BatchGradients<B: Backend> {
    /// One gradient per decoder parameter, in parameter order.
    pub decoder: Vec<Tensor<B, 2>>,
    /// Gradient of the full mean table; rows outside the batch are zero.
    pub mean: Tensor<B, 2>,
    /// Gradient of the full log-variance table.
    pub log_var: Tensor<B, 2>,
    /// Distinct shape ids present in the batch.
    pub rows: Vec<usize>,
    /// Loss terms summed over sub-batches.
    pub breakdown: LossBreakdown,
}

/// What happened to one mini-batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BatchOutcome {
    /// Parameters were updated.
    Applied {
        /// Loss terms of the batch.
        breakdown: LossBreakdown,
        /// Decoder gradient norm before clipping, when clipping is enabled.
        grad_norm: Option<f32>,
    },
    /// The loss was not finite and the step was dropped.
    Skipped {
        /// The offending total loss.
        loss: f32,
    },
}

/// Auto-decoder trainer.
///
/// Parameters are stored without autodiff tracking and wrapped as trainable
/// leaves for each gradient computation. All mutation happens on the thread
/// that owns the trainer.
#[derive(Debug)]
pub struct DeepSdfTrainer<B: AutodiffBackend> {
    config: TrainingConfig,
    decoder: SdfDecoder<B::InnerBackend>,
    latents: LatentBank<B::InnerBackend>,
    optimizer: OptimizerState<B::InnerBackend>,
    adam: AdamConfig,
    objective: TrainingObjective,
    logs: TrainingLogs,
    epoch: usize,
    rng: StdRng,
    device: B::Device,
}

impl<B: AutodiffBackend> DeepSdfTrainer<B> {
    /// Fresh decoder, latent bank and optimizer state for `num_shapes` shapes.
    pub fn new(config: TrainingConfig, num_shapes: usize, device: &B::Device) -> Result<Self> {
        config.validate().map_err(DeepSdfError::config)?;
        if num_shapes < config.scenes_per_batch {
            return Err(DeepSdfError::config(format!(
                "{} shapes cannot fill a batch of {} scenes",
                num_shapes, config.scenes_per_batch
            )));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let decoder = SdfDecoder::new(&config.decoder, config.latent_size, &mut rng, device);
        let latents = LatentBank::new(num_shapes, config.latent_size, &config.latent_init, &mut rng, device);
        let optimizer = OptimizerState::new(
            &decoder.parameter_shapes(),
            [num_shapes, config.latent_size],
            device,
        );

        log::info!(
            "Decoder has {} trainable parameters, {} latent codes of size {}",
            decoder.num_params(),
            num_shapes,
            config.latent_size
        );

        Ok(Self {
            objective: TrainingObjective::new(config.loss.clone()),
            config,
            decoder,
            latents,
            optimizer,
            adam: AdamConfig::new(),
            logs: TrainingLogs::default(),
            epoch: 0,
            rng,
            device: device.clone(),
        })
    }

    /// Continue from the snapshot `tag` of `experiment`.
    pub fn resume(
        config: TrainingConfig,
        num_shapes: usize,
        experiment: &ExperimentDir,
        tag: SnapshotTag,
        device: &B::Device,
    ) -> Result<Self> {
        let mut trainer = Self::new(config, num_shapes, device)?;
        let checkpoint = load_checkpoint(
            experiment,
            tag,
            &trainer.decoder,
            &trainer.optimizer,
            &trainer.latents,
            device,
        )?;
        ensure_same_device::<B::InnerBackend>(
            "resumed latent tables",
            &checkpoint.latents.device(),
            &checkpoint.decoder.device(),
        )?;

        trainer.decoder = checkpoint.decoder;
        trainer.optimizer = checkpoint.optimizer;
        trainer.latents = checkpoint.latents;
        trainer.logs = checkpoint.logs;
        trainer.epoch = checkpoint.epoch;
        trainer.rng = StdRng::seed_from_u64(trainer.config.seed.wrapping_add(checkpoint.epoch as u64));

        log::info!("Resuming training from epoch {}", trainer.epoch + 1);
        Ok(trainer)
    }

    /// Training configuration.
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Current decoder weights.
    pub fn decoder(&self) -> &SdfDecoder<B::InnerBackend> {
        &self.decoder
    }

    /// Current latent tables.
    pub fn latents(&self) -> &LatentBank<B::InnerBackend> {
        &self.latents
    }

    /// Current optimizer state.
    pub fn optimizer(&self) -> &OptimizerState<B::InnerBackend> {
        &self.optimizer
    }

    /// Logs recorded so far.
    pub fn logs(&self) -> &TrainingLogs {
        &self.logs
    }

    /// Last completed epoch.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Compute device.
    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Learning rates of the decoder, mean and log-variance groups at `epoch`.
    pub fn learning_rates(&self, epoch: usize) -> Result<[f64; 3]> {
        let mut rates = [0.0; 3];
        for (group, rate) in rates.iter_mut().enumerate() {
            let schedule = self
                .config
                .schedule(group)
                .ok_or_else(|| DeepSdfError::config("no learning rate schedule configured"))?;
            *rate = schedule.learning_rate(epoch, &self.logs.epoch_loss);
        }
        Ok(rates)
    }

    /// Forward and backward passes over the sub-batches of `batch`.
    ///
    /// Gradients of all sub-batches are summed. Every term is normalized by
    /// the row count of the whole batch, so the result does not depend on
    /// `batch_split` (the contrastive term, computed per sub-batch, excepted).
    pub fn compute_gradients(&mut self, batch: &SampleBatch, epoch: usize) -> Result<BatchGradients<B::InnerBackend>> {
        let batch_rows = batch.num_rows();
        let latent_size = self.config.latent_size;
        let device = self.device.clone();

        let mut rows = batch.shape_ids.clone();
        rows.sort_unstable();
        rows.dedup();
        // Looked-up rows are renormalized in place before the forward pass.
        self.latents = self.latents.apply_code_bound(&rows);

        let decoder = SdfDecoder::<B>::from_inner(self.decoder.clone());
        let mean_table = Tensor::<B, 2>::from_inner(self.latents.mean.clone()).require_grad();
        let log_var_table = Tensor::<B, 2>::from_inner(self.latents.log_var.clone()).require_grad();
        let params = decoder.parameters();

        let mut decoder_grads: Vec<Tensor<B::InnerBackend, 2>> =
            params.iter().map(|p| Tensor::zeros(p.dims(), &device)).collect();
        let mut mean_grad = Tensor::<B::InnerBackend, 2>::zeros(mean_table.dims(), &device);
        let mut log_var_grad = Tensor::<B::InnerBackend, 2>::zeros(log_var_table.dims(), &device);
        let mut breakdown = LossBreakdown::default();

        for sub in batch.split(self.config.batch_split)? {
            let scenes = sub.num_scenes();
            let rows = sub.num_rows();
            let ids = indices::<B>(&sub.shape_ids, &device);

            let xyz = matrix::<B>(sub.xyz, rows, 3, &device);
            let sdf = matrix::<B>(sub.sdf, rows, 1, &device);
            ensure_same_device::<B>("sample batch", &xyz.device(), &decoder.device())?;
            ensure_same_device::<B>("latent tables", &mean_table.device(), &decoder.device())?;

            let inputs = SubBatchInputs {
                mean: mean_table.clone().select(0, ids.clone()),
                log_var: log_var_table.clone().select(0, ids),
                noise: standard_normal::<B, _>([scenes, latent_size], &mut self.rng, &device),
                xyz,
                sdf,
                labels: &sub.labels,
                samples_per_scene: sub.samples_per_scene,
            };
            let output = self.objective.compute(&decoder, inputs, epoch, batch_rows)?;
            breakdown += output.breakdown;
            if !output.breakdown.is_finite() {
                // Nothing to accumulate; the caller applies the non-finite policy.
                continue;
            }

            let grads = output.loss.backward();
            for (acc, param) in decoder_grads.iter_mut().zip(&params) {
                if let Some(g) = param.grad(&grads) {
                    *acc = acc.clone() + g;
                }
            }
            if let Some(g) = mean_table.grad(&grads) {
                mean_grad = mean_grad + g;
            }
            if let Some(g) = log_var_table.grad(&grads) {
                log_var_grad = log_var_grad + g;
            }
        }

        Ok(BatchGradients {
            decoder: decoder_grads,
            mean: mean_grad,
            log_var: log_var_grad,
            rows,
            breakdown,
        })
    }

    /// One optimizer step on `batch` with the given group learning rates.
    pub fn train_batch(&mut self, batch: &SampleBatch, epoch: usize, learning_rates: [f64; 3]) -> Result<BatchOutcome> {
        let grads = self.compute_gradients(batch, epoch)?;
        let breakdown = grads.breakdown;

        if !breakdown.is_finite() {
            let loss = breakdown.total();
            return match self.config.non_finite_policy {
                NonFinitePolicy::Skip => {
                    log::warn!("epoch {}: non-finite batch loss {}, skipping step", epoch, loss);
                    Ok(BatchOutcome::Skipped { loss })
                }
                NonFinitePolicy::Abort => Err(DeepSdfError::NumericDegenerate {
                    context: format!("batch loss at epoch {epoch}"),
                    value: loss,
                }),
            };
        }

        let (decoder_grads, grad_norm) = match self.config.grad_clip_norm {
            Some(max_norm) => {
                let (clipped, norm) = clip_grad_norm(grads.decoder, max_norm)?;
                (clipped, Some(norm))
            }
            None => (grads.decoder, None),
        };

        let updated = self
            .decoder
            .parameters()
            .into_iter()
            .zip(decoder_grads)
            .zip(self.optimizer.decoder.iter_mut())
            .map(|((param, grad), state)| state.step(param, grad, learning_rates[0], None, &self.adam))
            .collect();
        self.decoder = self.decoder.with_parameters(updated)?;

        let rows = Some(grads.rows.as_slice());
        let mean = self.optimizer.mean.step(
            self.latents.mean.clone(),
            grads.mean,
            learning_rates[1],
            rows,
            &self.adam,
        );
        let log_var = self.optimizer.log_var.step(
            self.latents.log_var.clone(),
            grads.log_var,
            learning_rates[2],
            rows,
            &self.adam,
        );
        self.latents = LatentBank::from_tables(mean, log_var, self.latents.code_bound())?;

        Ok(BatchOutcome::Applied { breakdown, grad_norm })
    }

    /// Train until `num_epochs` or until `cancel` fires.
    ///
    /// Snapshots and logs are written on their configured epochs. The summary
    /// is written whatever the outcome; an interrupt is reported through
    /// [`StopReason::Interrupted`] and loses the work since the last snapshot.
    pub fn train(
        &mut self,
        store: Arc<dyn SampleStore>,
        experiment: &ExperimentDir,
        evaluator: Option<&Evaluator>,
        cancel: &CancellationToken,
    ) -> Result<TrainingSummary> {
        let outcome = self.run(store, experiment, evaluator, cancel);

        let summary = match &outcome {
            Ok(reason) => self.summary(*reason, None),
            Err(e) => {
                log::error!("training failed: {}", e);
                self.summary(StopReason::Failed, Some(e.to_string()))
            }
        };
        let saved = summary.save(experiment.summary_path());
        summary.log();

        outcome?;
        saved?;
        Ok(summary)
    }

    fn run(
        &mut self,
        store: Arc<dyn SampleStore>,
        experiment: &ExperimentDir,
        evaluator: Option<&Evaluator>,
        cancel: &CancellationToken,
    ) -> Result<StopReason> {
        self.latents.check_dims(store.len(), self.config.latent_size)?;
        experiment.save_specs(&self.config)?;

        let start_epoch = self.epoch + 1;
        log::info!(
            "Training epochs {}..={} on {} shapes ({} scenes x {} samples per batch)",
            start_epoch,
            self.config.num_epochs,
            store.len(),
            self.config.scenes_per_batch,
            self.config.samples_per_scene
        );

        for epoch in start_epoch..=self.config.num_epochs {
            if cancel.is_cancelled() {
                log::error!("Interrupted before epoch {}, ending training", epoch);
                return Ok(StopReason::Interrupted);
            }
            if self.run_epoch(epoch, &store, cancel)? == StopReason::Interrupted {
                log::error!("Interrupted during epoch {}, ending training", epoch);
                return Ok(StopReason::Interrupted);
            }

            if let Some(evaluator) = evaluator {
                self.evaluate(evaluator, store.as_ref(), experiment, epoch);
            }

            if self.config.snapshot_due(epoch) {
                save_checkpoint(
                    experiment,
                    SnapshotTag::Epoch(epoch),
                    &self.decoder,
                    &self.optimizer,
                    &self.latents,
                    epoch,
                )?;
            }
            if self.config.log_due(epoch) {
                save_checkpoint(experiment, SnapshotTag::Latest, &self.decoder, &self.optimizer, &self.latents, epoch)?;
                self.logs.save(experiment.logs_path())?;
            }
        }

        Ok(StopReason::Completed)
    }

    fn run_epoch(&mut self, epoch: usize, store: &Arc<dyn SampleStore>, cancel: &CancellationToken) -> Result<StopReason> {
        let start = Instant::now();
        let learning_rates = self.learning_rates(epoch)?;

        let plan = EpochPlan::shuffled(store.len(), self.config.scenes_per_batch, &mut self.rng);
        let loader_config = LoaderConfig {
            samples_per_scene: self.config.samples_per_scene,
            num_workers: self.config.data_loader_threads,
            prefetch_batches: self.config.prefetch_batches,
            seed: self.rng.gen(),
        };
        let mut loader = BatchLoader::spawn(Arc::clone(store), plan, loader_config, cancel.clone());

        let mut record = EpochRecord {
            epoch,
            learning_rates,
            ..Default::default()
        };
        let mut components = LossBreakdown::default();

        for (index, batch) in loader.by_ref().enumerate() {
            if cancel.is_cancelled() {
                return Ok(StopReason::Interrupted);
            }
            let batch = batch?;
            match self.train_batch(&batch, epoch, learning_rates)? {
                BatchOutcome::Applied { breakdown, grad_norm } => {
                    log::debug!(
                        "epoch {} batch {}: loss {:.6}, grad norm {:?}",
                        epoch,
                        index,
                        breakdown.total(),
                        grad_norm
                    );
                    record.batch_losses.push(breakdown.total());
                    components += breakdown;
                }
                BatchOutcome::Skipped { .. } => record.skipped_batches += 1,
            }
        }
        // Workers stop early on cancellation, which ends the iterator.
        if cancel.is_cancelled() {
            return Ok(StopReason::Interrupted);
        }
        loader.close()?;

        let applied = record.batch_losses.len();
        if applied == 0 {
            log::warn!("epoch {}: no batch was applied", epoch);
            record.epoch_loss = f32::MAX;
        } else {
            record.epoch_loss = record.batch_losses.iter().sum::<f32>() / applied as f32;
            record.components = components.scaled(1.0 / applied as f32);
        }

        record.latent_magnitude = self.latents.mean_magnitude()?;
        record.param_magnitudes = self
            .decoder
            .parameter_names()
            .into_iter()
            .zip(self.decoder.parameters())
            .map(|(name, param)| frobenius_norm(param).map(|n| (name, n)))
            .collect::<Result<Vec<_>>>()?;
        record.seconds = start.elapsed().as_secs_f64();

        log::info!(
            "Epoch {}/{}: loss = {:.6}, lr = [{:.2e}, {:.2e}, {:.2e}], latent magnitude = {:.4}, {:.2}s",
            epoch,
            self.config.num_epochs,
            record.epoch_loss,
            learning_rates[0],
            learning_rates[1],
            learning_rates[2],
            record.latent_magnitude,
            record.seconds
        );
        if applied > 0 {
            record.components.log(&format!("Epoch {epoch}"));
        }

        self.epoch = epoch;
        self.logs.push_epoch(record);
        Ok(StopReason::Completed)
    }

    fn evaluate(&mut self, evaluator: &Evaluator, store: &dyn SampleStore, experiment: &ExperimentDir, epoch: usize) {
        let config = evaluator.config();
        let mut rng = evaluator.rng_for(epoch);

        if config.train_due(epoch) && !evaluator.train_ids().is_empty() {
            log::info!("Train evaluation started");
            let record = evaluator.evaluate_train(
                &self.decoder,
                &self.latents,
                store,
                epoch,
                Some(experiment),
                &mut rng,
            );
            self.logs.evaluations.push(record);
        }

        if config.test_due(epoch) && evaluator.has_test_set() {
            log::info!("Test evaluation started");
            let decoder = SdfDecoder::<B>::from_inner(self.decoder.clone()).frozen();
            if let Some(record) =
                evaluator.evaluate_test::<B, _, _>(&decoder, epoch, Some(experiment), &self.device, &mut rng)
            {
                self.logs.evaluations.push(record);
            }
        }
    }

    /// Summary of the current state.
    pub fn summary(&self, stop_reason: StopReason, error: Option<String>) -> TrainingSummary {
        let best_chamfer = |split: EvaluationSplit| {
            self.logs
                .evaluations
                .iter()
                .filter(|e| e.split == split)
                .filter_map(|e| e.mean_chamfer)
                .reduce(f32::min)
        };
        let num_params = self.decoder.num_params();

        TrainingSummary {
            stop_reason,
            error,
            last_epoch: self.epoch,
            num_epochs: self.config.num_epochs,
            decoder_parameters: num_params,
            decoder_size_mb: (num_params * std::mem::size_of::<f32>()) as f64 / (1024.0 * 1024.0),
            latent_table_shape: [self.latents.num_shapes(), self.latents.latent_size()],
            last_learning_rates: self.logs.learning_rate.last().copied(),
            best_batch_loss: self.logs.best_loss(),
            best_train_chamfer: best_chamfer(EvaluationSplit::Train),
            best_test_chamfer: best_chamfer(EvaluationSplit::Test),
            total_seconds: self.logs.total_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LatentInitConfig, LossConfig};
    use crate::training::checkpoint::ArtifactKind;
    use crate::data::synthetic::{sphere_family, sphere_store};
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::{Autodiff, NdArray};
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn config() -> TrainingConfig {
        TrainingConfig::small(4)
            .with_num_epochs(3)
            .with_samples_per_scene(32)
            .with_scenes_per_batch(2)
            .with_data_loader_threads(0)
            .with_log_frequency(1)
    }

    fn store() -> Arc<dyn SampleStore> {
        let mut rng = StdRng::seed_from_u64(9);
        Arc::new(sphere_store(&sphere_family(4, 0.3, 0.6), 200, &mut rng))
    }

    /// Unclamped NaN targets make the reconstruction term NaN.
    fn nan_batch() -> SampleBatch {
        SampleBatch {
            shape_ids: vec![0, 1],
            labels: vec![0.0, 1.0],
            samples_per_scene: 2,
            xyz: vec![0.1; 12],
            sdf: vec![0.0, f32::NAN, 0.0, 0.0],
        }
    }

    #[test]
    fn test_rejects_invalid_config() {
        let device = NdArrayDevice::Cpu;
        let bad = config().with_batch_split(3);
        assert!(matches!(
            DeepSdfTrainer::<TestBackend>::new(bad, 4, &device),
            Err(DeepSdfError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_batch_touches_only_its_latents() {
        let device = NdArrayDevice::Cpu;
        let store = store();
        let mut trainer = DeepSdfTrainer::<TestBackend>::new(config(), 4, &device).unwrap();
        let before: Vec<f32> = trainer.latents().mean.clone().into_data().to_vec().unwrap();

        let mut rng = StdRng::seed_from_u64(0);
        let batch = SampleBatch::from_store(store.as_ref(), &[1, 3], 32, &mut rng).unwrap();
        let outcome = trainer.train_batch(&batch, 1, [1e-3; 3]).unwrap();
        assert!(matches!(outcome, BatchOutcome::Applied { .. }));

        let after: Vec<f32> = trainer.latents().mean.clone().into_data().to_vec().unwrap();
        for row in 0..4 {
            let changed = (0..4).any(|c| before[row * 4 + c] != after[row * 4 + c]);
            assert_eq!(changed, row == 1 || row == 3, "row {row}");
        }
        assert_eq!(trainer.optimizer().mean.row_steps(), &[0, 1, 0, 1]);
    }

    #[test]
    fn test_code_bound_applies_before_forward() {
        let device = NdArrayDevice::Cpu;
        let latent_init = LatentInitConfig::new()
            .with_code_init_std_dev(4.0)
            .with_code_bound(Some(0.5));
        let mut trainer =
            DeepSdfTrainer::<TestBackend>::new(config().with_latent_init(latent_init), 4, &device).unwrap();
        let norms = |trainer: &DeepSdfTrainer<TestBackend>| -> Vec<f32> {
            trainer
                .latents()
                .mean
                .clone()
                .powf_scalar(2.0)
                .sum_dim(1)
                .sqrt()
                .into_data()
                .to_vec()
                .unwrap()
        };
        let before = norms(&trainer);
        assert!(before.iter().all(|&n| n > 0.5));

        let mut rng = StdRng::seed_from_u64(2);
        let batch = SampleBatch::from_store(store().as_ref(), &[0, 2], 32, &mut rng).unwrap();
        trainer.compute_gradients(&batch, 1).unwrap();

        let after = norms(&trainer);
        for row in [0, 2] {
            assert!((after[row] - 0.5).abs() < 1e-4, "row {row}: {}", after[row]);
        }
        for row in [1, 3] {
            assert_eq!(after[row], before[row]);
        }
    }

    #[test]
    fn test_non_finite_batch_is_skipped() {
        let device = NdArrayDevice::Cpu;
        let config = config().with_loss(LossConfig::new().with_enforce_minmax(false));
        let mut trainer = DeepSdfTrainer::<TestBackend>::new(config, 4, &device).unwrap();
        let batch = nan_batch();
        let before = trainer.decoder().parameters()[0].clone().into_data();
        let outcome = trainer.train_batch(&batch, 1, [1e-3; 3]).unwrap();
        assert!(matches!(outcome, BatchOutcome::Skipped { .. }));
        assert_eq!(trainer.decoder().parameters()[0].clone().into_data(), before);
    }

    #[test]
    fn test_non_finite_batch_aborts() {
        let device = NdArrayDevice::Cpu;
        let config = config()
            .with_loss(LossConfig::new().with_enforce_minmax(false))
            .with_non_finite_policy(NonFinitePolicy::Abort);
        let mut trainer = DeepSdfTrainer::<TestBackend>::new(config, 4, &device).unwrap();
        assert!(matches!(
            trainer.train_batch(&nan_batch(), 1, [1e-3; 3]),
            Err(DeepSdfError::NumericDegenerate { .. })
        ));
    }

    #[test]
    fn test_train_writes_logs_and_snapshots() {
        let device = NdArrayDevice::Cpu;
        let dir = TempDir::new().unwrap();
        let experiment = ExperimentDir::create(dir.path()).unwrap();
        let config = config()
            .with_snapshot_frequency(2)
            .with_loss(LossConfig::new().with_use_eikonal(true));
        let mut trainer = DeepSdfTrainer::<TestBackend>::new(config, 4, &device).unwrap();

        let summary = trainer
            .train(store(), &experiment, None, &CancellationToken::new())
            .unwrap();
        assert_eq!(summary.stop_reason, StopReason::Completed);
        assert_eq!(summary.last_epoch, 3);
        assert_eq!(trainer.logs().epoch_loss.len(), 3);
        assert_eq!(trainer.logs().loss.len(), 6);
        assert!(experiment.snapshot_exists(SnapshotTag::Latest));
        assert!(experiment.snapshot_exists(SnapshotTag::Epoch(2)));
        assert!(!experiment
            .artifact_path(ArtifactKind::ModelParameters, SnapshotTag::Epoch(3))
            .exists());
        assert_eq!(experiment.latest_numbered_snapshot(), Some(2));
        assert!(experiment.summary_path().exists());
    }

    #[test]
    fn test_store_size_must_match_bank() {
        let device = NdArrayDevice::Cpu;
        let dir = TempDir::new().unwrap();
        let experiment = ExperimentDir::create(dir.path()).unwrap();
        let mut trainer = DeepSdfTrainer::<TestBackend>::new(config(), 5, &device).unwrap();

        let result = trainer.train(store(), &experiment, None, &CancellationToken::new());
        assert!(matches!(result, Err(DeepSdfError::DimensionMismatch { .. })));
        let summary = TrainingSummary::load(experiment.summary_path()).unwrap();
        assert_eq!(summary.stop_reason, StopReason::Failed);
    }
}
