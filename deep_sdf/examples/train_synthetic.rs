//! Example: Training an auto-decoder on a family of synthetic spheres.
//!
//! This example walks through the whole pipeline:
//! 1. Generate signed-distance samples for spheres of varying radius
//! 2. Train the decoder and the latent distribution bank
//! 3. Evaluate training and held-out shapes with the Chamfer distance
//! 4. Fit a latent code for an unseen sphere and export its mesh
//!
//! # Usage
//!
//! ```bash
//! RUST_LOG=info cargo run -p deep_sdf --example train_synthetic --release
//! ```
//!
//! Output files are saved to `demos/output/`.

use std::process::ExitCode;
use std::sync::Arc;

use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use rand::rngs::StdRng;
use rand::SeedableRng;

use deep_sdf::data::synthetic::{sphere_family, sphere_store, Sphere};
use deep_sdf::prelude::*;

type MyBackend = Autodiff<NdArray>;

/// Output directory for generated files.
const OUTPUT_DIR: &str = "demos/output";

fn run() -> Result<()> {
    let device = NdArrayDevice::Cpu;
    let mut rng = StdRng::seed_from_u64(7);

    println!("═══════════════════════════════════════════════════════════════");
    println!("          DeepSDF Auto-Decoder on Synthetic Spheres");
    println!("═══════════════════════════════════════════════════════════════");

    // Step 1: data
    println!("\n[1/4] Generating samples");
    let train_spheres = sphere_family(8, 0.3, 0.7);
    let test_spheres = vec![Sphere::new(Point3::ZERO, 0.45), Sphere::new(Point3::ZERO, 0.6)];
    let train: Arc<dyn SampleStore> = Arc::new(sphere_store(&train_spheres, 4096, &mut rng));
    let mut test_store = InMemorySampleStore::new();
    for (i, sphere) in test_spheres.iter().enumerate() {
        test_store.push(format!("test_sphere_{i}"), sphere.samples(4096, &mut rng), 0.0);
    }
    let test: Arc<dyn SampleStore> = Arc::new(test_store);
    println!("  {} training shapes, {} held-out shapes", train.len(), test.len());

    let mut meshes = InMemoryMeshes::new();
    for (i, sphere) in train_spheres.iter().enumerate() {
        meshes.insert(format!("sphere_{i}"), sphere.mesh(24, 48));
    }
    for (i, sphere) in test_spheres.iter().enumerate() {
        meshes.insert(format!("test_sphere_{i}"), sphere.mesh(24, 48));
    }

    // Step 2: training
    println!("\n[2/4] Training");
    let config = TrainingConfig::small(8)
        .with_num_epochs(40)
        .with_samples_per_scene(512)
        .with_scenes_per_batch(4)
        .with_snapshot_frequency(20)
        .with_evaluation(
            EvaluationConfig::fast()
                .with_train_frequency(20)
                .with_test_frequency(20),
        );

    let experiment = ExperimentDir::create(format!("{OUTPUT_DIR}/experiment"))?;
    let evaluator = Evaluator::new(config.evaluation.clone(), Arc::new(meshes), train.as_ref(), &mut rng)
        .with_test_set(Arc::clone(&test), &mut rng);

    let mut trainer = DeepSdfTrainer::<MyBackend>::new(config, train.len(), &device)?;
    let summary = trainer.train(Arc::clone(&train), &experiment, Some(&evaluator), &CancellationToken::new())?;

    // Step 3: report
    println!("\n[3/4] Results");
    println!("  stop reason:        {:?}", summary.stop_reason);
    println!("  epochs:             {}", summary.last_epoch);
    println!("  decoder parameters: {}", summary.decoder_parameters);
    if let Some(loss) = summary.best_batch_loss {
        println!("  best batch loss:    {loss:.6}");
    }
    if let Some(cd) = summary.best_train_chamfer {
        println!("  best train chamfer: {cd:.6}");
    }
    if let Some(cd) = summary.best_test_chamfer {
        println!("  best test chamfer:  {cd:.6}");
    }

    // Step 4: reconstruct an unseen sphere
    println!("\n[4/4] Reconstructing an unseen sphere");
    let unseen = Sphere::new(Point3::ZERO, 0.55);
    let samples = unseen.samples(8000, &mut rng).permuted(&mut rng);
    let decoder = SdfDecoder::<MyBackend>::from_inner(trainer.decoder().clone()).frozen();
    let fitted = reconstruct::<MyBackend, _>(
        &decoder,
        &samples,
        &ReconstructionConfig::new().with_num_iterations(300),
        &device,
    )?;
    if let Some(loss) = fitted.final_loss() {
        println!("  final reconstruction loss: {loss:.6}");
    }

    let grid = MeshGridConfig::new().with_resolution(64);
    match extract_mesh(trainer.decoder(), fitted.latent, &grid)? {
        Some(mesh) => {
            let path = format!("{OUTPUT_DIR}/unseen_sphere.obj");
            mesh.save_obj(&path)?;
            println!("  wrote {} triangles to {}", mesh.num_triangles(), path);
        }
        None => println!("  no surface found in the sampled volume"),
    }

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
