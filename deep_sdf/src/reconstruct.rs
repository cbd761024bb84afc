//! Test-time latent inference for shapes not seen during training.
//!
//! The decoder stays fixed; a single latent code is fitted to the shape's
//! samples with a fresh optimizer that never touches training state.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{ReconstructionConfig, SplitReconstructionConfig};
use crate::data::{subsample, SampleStore, ShapeSamples};
use crate::error::{DeepSdfError, Result};
use crate::loss::{clamp_sdf, l1_mean};
use crate::mesh::extract_mesh;
use crate::nn::{SdfDecoder, SdfForward};
use crate::tensor_ops::{matrix, normal_values, scalar};
use crate::training::{load_model, save_reconstructed_latent, AdamConfig, AdamState, ExperimentDir, SnapshotTag};

/// Result of fitting a latent code.
#[derive(Debug, Clone)]
pub struct Reconstruction<B: Backend> {
    /// Optimized latent, `[1, latent_size]`.
    pub latent: Tensor<B, 2>,
    /// Loss of every applied step.
    pub loss_history: Vec<f32>,
    /// Steps dropped because the loss was not finite.
    pub skipped_steps: usize,
}

impl<B: Backend> Reconstruction<B> {
    /// Loss of the last applied step.
    pub fn final_loss(&self) -> Option<f32> {
        self.loss_history.last().copied()
    }
}

/// Fit a latent code for `samples` with the decoder held fixed.
///
/// Each step draws `num_samples` rows (half positive, half negative),
/// clamps predictions and targets to `clamp_distance`, and minimizes the
/// mean L1 error plus `l2_weight * mean(z²)` when L2 regularization is on.
/// Gradients reaching the decoder are discarded; pass a frozen decoder to
/// avoid computing them.
pub fn reconstruct<B, D>(
    decoder: &D,
    samples: &ShapeSamples,
    config: &ReconstructionConfig,
    device: &B::Device,
) -> Result<Reconstruction<B::InnerBackend>>
where
    B: AutodiffBackend,
    D: SdfForward<B>,
{
    config.validate().map_err(|message| DeepSdfError::InvalidConfig { message })?;
    if samples.is_empty() {
        return Err(DeepSdfError::InvalidData(
            "cannot reconstruct a shape without samples".to_string(),
        ));
    }

    let latent_size = decoder.latent_size();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let adam = AdamConfig::new();
    let mut state = AdamState::<B::InnerBackend>::new([1, latent_size], device);
    let mut latent = matrix::<B::InnerBackend>(
        normal_values(latent_size, config.init_std_dev, &mut rng),
        1,
        latent_size,
        device,
    );

    let mut loss_history = Vec::with_capacity(config.num_iterations);
    let mut skipped_steps = 0;

    for iteration in 0..config.num_iterations {
        let rows = subsample(samples, config.num_samples, &mut rng);
        let count = rows.len();
        let xyz: Vec<f32> = rows.iter().flat_map(|r| [r[0], r[1], r[2]]).collect();
        let sdf: Vec<f32> = rows.iter().map(|r| r[3]).collect();
        let xyz = matrix::<B>(xyz, count, 3, device);
        let target = clamp_sdf(matrix::<B>(sdf, count, 1, device), config.clamp_distance);

        let z = Tensor::<B, 2>::from_inner(latent.clone()).require_grad();
        let pred = decoder.forward_with_latents(z.clone().repeat_dim(0, count), xyz);
        let pred = clamp_sdf(pred, config.clamp_distance);

        let mut loss = l1_mean(pred, target);
        if config.l2_regularization {
            loss = loss + z.clone().powf_scalar(2.0).mean() * config.l2_weight;
        }

        let value = scalar(loss.clone())?;
        if !value.is_finite() {
            log::warn!("reconstruction step {} produced loss {}, skipping", iteration, value);
            skipped_steps += 1;
            continue;
        }

        let grads = loss.backward();
        let grad = z.grad(&grads).ok_or_else(|| {
            DeepSdfError::InvalidData("latent received no gradient".to_string())
        })?;
        latent = state.step(latent, grad, config.learning_rate_at(iteration), None, &adam);
        loss_history.push(value);
    }

    if let Some(last) = loss_history.last() {
        log::debug!(
            "reconstruction finished after {} steps, final loss {:.6}",
            config.num_iterations,
            last
        );
    }

    Ok(Reconstruction {
        latent,
        loss_history,
        skipped_steps,
    })
}

/// Outcome of reconstructing a whole split.
#[derive(Debug, Clone, Default)]
pub struct SplitReconstruction {
    /// Epoch of the decoder snapshot that was used.
    pub epoch: usize,
    /// Shapes fitted in this run.
    pub reconstructed: Vec<String>,
    /// Shapes left alone because their latent was already on disk.
    pub existing: Vec<String>,
    /// Shapes whose reconstruction failed.
    pub failed: Vec<String>,
}

/// Reconstruct every shape of `store` against the decoder snapshot `tag`.
///
/// The decoder is rebuilt from the experiment's stored specs and loaded with
/// [`load_model`]. For each shape the fitted latent is written to
/// `Reconstructions/<tag>/<shape>.bin` and its mesh to
/// `Reconstructions/<tag>/<shape>.obj`. The latent is written last, so a
/// shape only counts as existing once both files are complete. Per-shape
/// failures are logged and collected; a missing snapshot or specs file
/// fails the whole call.
pub fn reconstruct_split<B: AutodiffBackend>(
    experiment: &ExperimentDir,
    tag: SnapshotTag,
    store: &dyn SampleStore,
    config: &SplitReconstructionConfig,
    device: &B::Device,
) -> Result<SplitReconstruction> {
    config.validate().map_err(DeepSdfError::config)?;
    let specs = experiment.load_specs()?;
    let mut rng = StdRng::seed_from_u64(specs.seed);
    let template = SdfDecoder::<B::InnerBackend>::new(&specs.decoder, specs.latent_size, &mut rng, device);
    let (inner, epoch) = load_model(experiment, tag, &template, device)?;
    let decoder = SdfDecoder::<B>::from_inner(inner).frozen();
    log::info!(
        "Reconstructing {} shapes against the {} snapshot (epoch {})",
        store.len(),
        tag,
        epoch
    );

    let mut outcome = SplitReconstruction {
        epoch,
        ..Default::default()
    };
    let mut rng = StdRng::seed_from_u64(config.reconstruction.seed);

    for id in 0..store.len() {
        let name = store
            .name(id)
            .map(str::to_string)
            .unwrap_or_else(|| format!("shape_{id}"));
        if config.skip_existing && experiment.reconstructed_latent_path(tag, &name).exists() {
            log::debug!("{}: already reconstructed, skipping", name);
            outcome.existing.push(name);
            continue;
        }

        let shape_seed: u64 = rng.gen();
        match reconstruct_shape::<B>(experiment, tag, store, id, &name, shape_seed, &decoder, config, epoch) {
            Ok(()) => outcome.reconstructed.push(name),
            Err(e) => {
                log::warn!("{}: reconstruction failed: {}", name, e);
                outcome.failed.push(name);
            }
        }
    }

    log::info!(
        "Split reconstruction done: {} fitted, {} existing, {} failed",
        outcome.reconstructed.len(),
        outcome.existing.len(),
        outcome.failed.len()
    );
    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
fn reconstruct_shape<B: AutodiffBackend>(
    experiment: &ExperimentDir,
    tag: SnapshotTag,
    store: &dyn SampleStore,
    id: usize,
    name: &str,
    seed: u64,
    decoder: &SdfDecoder<B>,
    config: &SplitReconstructionConfig,
    epoch: usize,
) -> Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let samples = store.samples(id)?.permuted(&mut rng);
    let settings = config.reconstruction.clone().with_seed(rng.gen());
    let device = decoder.device();
    let fitted = reconstruct::<B, _>(decoder, &samples, &settings, &device)?;
    if let Some(loss) = fitted.final_loss() {
        log::debug!("{}: final reconstruction loss {:.6}", name, loss);
    }

    let latent = Tensor::<B, 2>::from_inner(fitted.latent.clone());
    match extract_mesh(decoder, latent, &config.mesh_grid)? {
        Some(mesh) => mesh.save_obj(experiment.reconstructed_mesh_path(tag, name))?,
        None => log::warn!("{}: no surface extracted", name),
    }
    save_reconstructed_latent(experiment, tag, name, fitted.latent, epoch)
}
