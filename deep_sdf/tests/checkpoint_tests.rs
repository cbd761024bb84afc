//! Snapshot save/resume consistency.

use std::fs;
use std::sync::Arc;

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use deep_sdf::data::synthetic::{sphere_family, sphere_store};
use deep_sdf::prelude::*;
use deep_sdf::training::{save_latent_codes, ArtifactKind, OptimizerState};

type TestBackend = Autodiff<NdArray>;

fn config(epochs: usize) -> TrainingConfig {
    TrainingConfig::small(4)
        .with_num_epochs(epochs)
        .with_samples_per_scene(32)
        .with_scenes_per_batch(2)
        .with_data_loader_threads(0)
        .with_log_frequency(1)
        .with_snapshot_frequency(2)
}

fn store() -> Arc<dyn SampleStore> {
    let mut rng = StdRng::seed_from_u64(5);
    Arc::new(sphere_store(&sphere_family(4, 0.3, 0.6), 128, &mut rng))
}

fn trained(epochs: usize) -> (TempDir, ExperimentDir, DeepSdfTrainer<TestBackend>) {
    let dir = TempDir::new().unwrap();
    let experiment = ExperimentDir::create(dir.path()).unwrap();
    let mut trainer = DeepSdfTrainer::<TestBackend>::new(config(epochs), 4, &NdArrayDevice::Cpu).unwrap();
    trainer
        .train(store(), &experiment, None, &CancellationToken::new())
        .unwrap();
    (dir, experiment, trainer)
}

fn bits<const D: usize>(tensor: Tensor<NdArray, D>) -> Vec<u32> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .unwrap()
        .into_iter()
        .map(f32::to_bits)
        .collect()
}

fn optimizer_bits(state: &OptimizerState<NdArray>) -> Vec<(Vec<u32>, Vec<u32>, Vec<u64>)> {
    state
        .states()
        .map(|s| {
            (
                bits(s.moment_1().clone()),
                bits(s.moment_2().clone()),
                s.row_steps().to_vec(),
            )
        })
        .collect()
}

#[test]
fn test_resume_is_bit_identical() {
    let (_dir, experiment, trainer) = trained(3);
    let resumed =
        DeepSdfTrainer::<TestBackend>::resume(config(3), 4, &experiment, SnapshotTag::Latest, &NdArrayDevice::Cpu)
            .unwrap();

    assert_eq!(resumed.epoch(), 3);
    for (a, b) in trainer
        .decoder()
        .parameters()
        .into_iter()
        .zip(resumed.decoder().parameters())
    {
        assert_eq!(bits(a), bits(b));
    }
    assert_eq!(
        bits(trainer.latents().mean.clone()),
        bits(resumed.latents().mean.clone())
    );
    assert_eq!(
        bits(trainer.latents().log_var.clone()),
        bits(resumed.latents().log_var.clone())
    );
    assert_eq!(optimizer_bits(trainer.optimizer()), optimizer_bits(resumed.optimizer()));
    assert_eq!(resumed.logs(), trainer.logs());
}

#[test]
fn test_component_epochs_must_agree() {
    let (_dir, experiment, trainer) = trained(2);
    save_latent_codes(&experiment, SnapshotTag::Latest, trainer.latents(), 1).unwrap();

    let result =
        DeepSdfTrainer::<TestBackend>::resume(config(2), 4, &experiment, SnapshotTag::Latest, &NdArrayDevice::Cpu);
    match result {
        Err(DeepSdfError::EpochMismatch {
            model,
            optimizer,
            latent,
            ..
        }) => {
            assert_eq!((model, optimizer, latent), (2, 2, 1));
        }
        other => panic!("expected EpochMismatch, got {other:?}"),
    }
}

#[test]
fn test_logs_behind_model_are_rejected() {
    let (_dir, experiment, trainer) = trained(2);
    let mut logs = trainer.logs().clone();
    logs.clip(1);
    logs.save(experiment.logs_path()).unwrap();

    let result =
        DeepSdfTrainer::<TestBackend>::resume(config(2), 4, &experiment, SnapshotTag::Latest, &NdArrayDevice::Cpu);
    assert!(matches!(result, Err(DeepSdfError::EpochMismatch { logs: 1, .. })));
}

#[test]
fn test_logs_ahead_of_snapshot_are_clipped() {
    let (_dir, experiment, trainer) = trained(3);
    assert_eq!(trainer.logs().epoch, 3);

    let resumed =
        DeepSdfTrainer::<TestBackend>::resume(config(3), 4, &experiment, SnapshotTag::Epoch(2), &NdArrayDevice::Cpu)
            .unwrap();
    assert_eq!(resumed.epoch(), 2);
    assert_eq!(resumed.logs().epoch, 2);
    assert_eq!(resumed.logs().epoch_loss, trainer.logs().epoch_loss[..2].to_vec());
    assert_eq!(resumed.logs().loss.len(), 4);
}

#[test]
fn test_missing_component_is_reported() {
    let (_dir, experiment, _) = trained(1);
    fs::remove_file(experiment.artifact_path(ArtifactKind::OptimizerParameters, SnapshotTag::Latest)).unwrap();

    let result =
        DeepSdfTrainer::<TestBackend>::resume(config(1), 4, &experiment, SnapshotTag::Latest, &NdArrayDevice::Cpu);
    assert!(matches!(result, Err(DeepSdfError::MissingFile { .. })));
}

#[test]
fn test_latent_table_shape_is_checked() {
    let (_dir, experiment, _) = trained(1);

    let result =
        DeepSdfTrainer::<TestBackend>::resume(config(1), 5, &experiment, SnapshotTag::Latest, &NdArrayDevice::Cpu);
    assert!(matches!(result, Err(DeepSdfError::DimensionMismatch { .. })));
}

#[test]
fn test_specs_round_trip() {
    let (_dir, experiment, _) = trained(1);
    let specs = experiment.load_specs().unwrap();
    assert_eq!(specs.latent_size, 4);
    assert_eq!(specs.samples_per_scene, 32);
    assert_eq!(specs.learning_rate_schedules, config(1).learning_rate_schedules);
}
