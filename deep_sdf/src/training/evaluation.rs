//! Periodic mesh-based evaluation during training.
//!
//! Training shapes are meshed from their current mean latent; held-out
//! shapes first go through test-time reconstruction. Both are scored with
//! the Chamfer distance against ground-truth meshes.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use sdf_core::{compute_metric, percentile, Metric, TriangleMesh};
use serde::{Deserialize, Serialize};

use super::checkpoint::ExperimentDir;
use crate::config::{EvaluationConfig, ReconstructionConfig};
use crate::data::SampleStore;
use crate::error::{DeepSdfError, Result};
use crate::latent::LatentBank;
use crate::mesh::extract_mesh;
use crate::nn::SdfForward;
use crate::reconstruct::reconstruct;
use crate::tensor_ops::to_vec;

/// Which set of shapes an evaluation covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvaluationSplit {
    /// Shapes with a learned latent.
    Train,
    /// Held-out shapes reconstructed at evaluation time.
    Test,
}

impl fmt::Display for EvaluationSplit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Train => write!(f, "train"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Summary of one evaluation pass.
///
/// Statistics are `None` when no shape could be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    /// Epoch after which the evaluation ran.
    pub epoch: usize,
    /// Evaluated split.
    pub split: EvaluationSplit,
    /// Shapes that produced a score.
    pub evaluated: usize,
    /// Shapes skipped because of a missing mesh, an empty surface or an error.
    pub skipped: usize,
    /// Mean Chamfer distance over scored shapes.
    pub mean_chamfer: Option<f32>,
    /// 75th percentile of the per-point squared distances.
    pub p75: Option<f32>,
    /// 90th percentile of the per-point squared distances.
    pub p90: Option<f32>,
    /// 99th percentile of the per-point squared distances.
    pub p99: Option<f32>,
    /// Mean final reconstruction loss (test split only).
    pub mean_reconstruction_loss: Option<f32>,
    /// Mean norm of the reconstructed latents (test split only).
    pub mean_latent_magnitude: Option<f32>,
    /// Wall time per shape.
    pub seconds_per_shape: f64,
}

impl EvaluationRecord {
    fn log(&self) {
        match self.mean_chamfer {
            Some(cd) => log::info!(
                "[{} eval] epoch {}: mean chamfer {:.6} over {} shapes ({} skipped)",
                self.split,
                self.epoch,
                cd,
                self.evaluated,
                self.skipped
            ),
            None => log::warn!(
                "[{} eval] epoch {}: no shape could be scored ({} skipped)",
                self.split,
                self.epoch,
                self.skipped
            ),
        }
    }
}

/// Ground-truth meshes looked up by shape name.
pub trait MeshSource: Send + Sync {
    /// Mesh of the shape called `name`.
    fn mesh(&self, name: &str) -> Result<TriangleMesh>;
}

/// A directory of `<name>.obj` files.
#[derive(Debug, Clone)]
pub struct ObjMeshDirectory {
    root: PathBuf,
}

impl ObjMeshDirectory {
    /// Meshes under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MeshSource for ObjMeshDirectory {
    fn mesh(&self, name: &str) -> Result<TriangleMesh> {
        let path = self.root.join(format!("{name}.obj"));
        if !path.exists() {
            return Err(DeepSdfError::MissingFile { path });
        }
        Ok(TriangleMesh::load_obj(path)?)
    }
}

/// Meshes held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMeshes {
    meshes: HashMap<String, TriangleMesh>,
}

impl InMemoryMeshes {
    /// Empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the mesh of `name`.
    pub fn insert(&mut self, name: impl Into<String>, mesh: TriangleMesh) {
        self.meshes.insert(name.into(), mesh);
    }
}

impl MeshSource for InMemoryMeshes {
    fn mesh(&self, name: &str) -> Result<TriangleMesh> {
        self.meshes.get(name).cloned().ok_or_else(|| DeepSdfError::MissingFile {
            path: PathBuf::from(format!("{name}.obj")),
        })
    }
}

/// Fixed shape subsets and ground truth used for periodic evaluation.
#[derive(Clone)]
pub struct Evaluator {
    config: EvaluationConfig,
    reconstruction: ReconstructionConfig,
    meshes: Arc<dyn MeshSource>,
    train_ids: Vec<usize>,
    test_store: Option<Arc<dyn SampleStore>>,
    test_ids: Vec<usize>,
    seed: u64,
}

/// Where an evaluated shape's mesh goes.
#[derive(Clone, Copy)]
struct ShapeRef<'a> {
    name: &'a str,
    split: EvaluationSplit,
    epoch: usize,
    experiment: Option<&'a ExperimentDir>,
}

fn pick<R: Rng + ?Sized>(len: usize, count: usize, rng: &mut R) -> Vec<usize> {
    let mut ids = sample(rng, len, count.min(len)).into_vec();
    ids.sort_unstable();
    ids
}

fn shape_name(store: &dyn SampleStore, id: usize) -> String {
    store
        .name(id)
        .map(str::to_string)
        .unwrap_or_else(|| format!("shape_{id}"))
}

impl Evaluator {
    /// Choose `train_scene_number` training shapes at random, once.
    pub fn new<R: Rng + ?Sized>(
        config: EvaluationConfig,
        meshes: Arc<dyn MeshSource>,
        train_store: &dyn SampleStore,
        rng: &mut R,
    ) -> Self {
        let train_ids = pick(train_store.len(), config.train_scene_number, rng);
        let reconstruction = ReconstructionConfig::new().with_num_iterations(config.test_optimization_steps);
        Self {
            config,
            reconstruction,
            meshes,
            train_ids,
            test_store: None,
            test_ids: Vec::new(),
            seed: rng.gen(),
        }
    }

    /// Add held-out shapes, choosing `test_scene_number` of them at random.
    pub fn with_test_set<R: Rng + ?Sized>(mut self, store: Arc<dyn SampleStore>, rng: &mut R) -> Self {
        self.test_ids = pick(store.len(), self.config.test_scene_number, rng);
        self.test_store = Some(store);
        self
    }

    /// Override the test-time reconstruction settings.
    pub fn with_reconstruction(mut self, config: ReconstructionConfig) -> Self {
        self.reconstruction = config;
        self
    }

    /// Random stream for the evaluation at `epoch`.
    ///
    /// Independent of the trainer's random stream.
    pub fn rng_for(&self, epoch: usize) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ (epoch as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }

    /// Evaluation configuration.
    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Training shapes that are evaluated.
    pub fn train_ids(&self) -> &[usize] {
        &self.train_ids
    }

    /// Held-out shapes that are evaluated.
    pub fn test_ids(&self) -> &[usize] {
        &self.test_ids
    }

    /// Whether a held-out set is configured.
    pub fn has_test_set(&self) -> bool {
        self.test_store.is_some() && !self.test_ids.is_empty()
    }

    /// Mesh, save and score `latent`. `None` means the shape was skipped.
    fn score_latent<B: Backend, D: SdfForward<B>, R: Rng + ?Sized>(
        &self,
        decoder: &D,
        latent: Tensor<B, 2>,
        shape: ShapeRef<'_>,
        rng: &mut R,
    ) -> Option<(f32, Vec<f32>)> {
        let ShapeRef {
            name,
            split,
            epoch,
            experiment,
        } = shape;
        let generated = match extract_mesh(decoder, latent, &self.config.mesh_grid()) {
            Ok(Some(mesh)) => mesh,
            Ok(None) => {
                log::warn!("[{} eval] {}: no surface extracted, skipping", split, name);
                return None;
            }
            Err(e) => {
                log::warn!("[{} eval] {}: mesh extraction failed: {}", split, name, e);
                return None;
            }
        };

        if let Some(dir) = experiment {
            let path = dir.reconstruction_path(&split.to_string(), name, epoch);
            if let Err(e) = generated.save_obj(&path) {
                log::warn!("failed to write {:?}: {}", path, e);
            }
        }

        let ground_truth = match self.meshes.mesh(name) {
            Ok(mesh) => mesh,
            Err(e) => {
                log::warn!("[{} eval] {}: no ground truth: {}", split, name, e);
                return None;
            }
        };

        match compute_metric(&ground_truth, &generated, Metric::Chamfer, self.config.chamfer_samples, rng) {
            Ok(score) => Some(score),
            Err(e) => {
                log::warn!("[{} eval] {}: metric failed: {}", split, name, e);
                None
            }
        }
    }

    /// Score the training subset using each shape's mean latent.
    pub fn evaluate_train<B: Backend, D: SdfForward<B>, R: Rng + ?Sized>(
        &self,
        decoder: &D,
        latents: &LatentBank<B>,
        store: &dyn SampleStore,
        epoch: usize,
        experiment: Option<&ExperimentDir>,
        rng: &mut R,
    ) -> EvaluationRecord {
        let start = Instant::now();
        let mut scores = Vec::with_capacity(self.train_ids.len());

        for &id in &self.train_ids {
            let name = shape_name(store, id);
            let latent = latents.mean_row(id);
            let shape = ShapeRef {
                name: &name,
                split: EvaluationSplit::Train,
                epoch,
                experiment,
            };
            if let Some(score) = self.score_latent(decoder, latent, shape, rng) {
                scores.push(score);
            }
        }

        let record = summarize(
            epoch,
            EvaluationSplit::Train,
            self.train_ids.len(),
            scores,
            start.elapsed().as_secs_f64(),
        );
        record.log();
        record
    }

    /// Reconstruct and score the held-out subset.
    ///
    /// Returns `None` when no held-out set is configured.
    pub fn evaluate_test<B: AutodiffBackend, D: SdfForward<B>, R: Rng + ?Sized>(
        &self,
        decoder: &D,
        epoch: usize,
        experiment: Option<&ExperimentDir>,
        device: &B::Device,
        rng: &mut R,
    ) -> Option<EvaluationRecord> {
        let store = self.test_store.as_ref()?;
        let start = Instant::now();
        let mut scores = Vec::with_capacity(self.test_ids.len());
        let mut final_losses = Vec::new();
        let mut latent_norms = Vec::new();

        for &id in &self.test_ids {
            let name = shape_name(store.as_ref(), id);
            let samples = match store.samples(id) {
                Ok(samples) => samples.permuted(rng),
                Err(e) => {
                    log::warn!("[test eval] {}: cannot read samples: {}", name, e);
                    continue;
                }
            };

            let config = self.reconstruction.clone().with_seed(rng.gen());
            let fitted = match reconstruct::<B, D>(decoder, &samples, &config, device) {
                Ok(fitted) => fitted,
                Err(e) => {
                    log::warn!("[test eval] {}: reconstruction failed: {}", name, e);
                    continue;
                }
            };
            if let Some(loss) = fitted.final_loss() {
                final_losses.push(loss);
            }
            if let Ok(values) = to_vec(fitted.latent.clone()) {
                latent_norms.push(values.iter().map(|v| v * v).sum::<f32>().sqrt());
            }

            let latent = Tensor::<B, 2>::from_inner(fitted.latent);
            let shape = ShapeRef {
                name: &name,
                split: EvaluationSplit::Test,
                epoch,
                experiment,
            };
            if let Some(score) = self.score_latent(decoder, latent, shape, rng) {
                scores.push(score);
            }
        }

        let mut record = summarize(
            epoch,
            EvaluationSplit::Test,
            self.test_ids.len(),
            scores,
            start.elapsed().as_secs_f64(),
        );
        record.mean_reconstruction_loss = mean(&final_losses);
        record.mean_latent_magnitude = mean(&latent_norms);
        record.log();
        Some(record)
    }
}

fn mean(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

fn summarize(
    epoch: usize,
    split: EvaluationSplit,
    attempted: usize,
    scores: Vec<(f32, Vec<f32>)>,
    seconds: f64,
) -> EvaluationRecord {
    let chamfers: Vec<f32> = scores.iter().map(|(cd, _)| *cd).collect();
    let distances: Vec<f32> = scores.into_iter().flat_map(|(_, d)| d).collect();

    EvaluationRecord {
        epoch,
        split,
        evaluated: chamfers.len(),
        skipped: attempted - chamfers.len(),
        mean_chamfer: mean(&chamfers),
        p75: percentile(&distances, 75.0),
        p90: percentile(&distances, 90.0),
        p99: percentile(&distances, 99.0),
        mean_reconstruction_loss: None,
        mean_latent_magnitude: None,
        seconds_per_shape: seconds / attempted.max(1) as f64,
    }
}
