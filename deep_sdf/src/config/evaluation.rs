//! Evaluation, reconstruction and meshing configuration.

use burn::config::Config;

/// Configuration for periodic evaluation during training.
#[derive(Config, Debug)]
pub struct EvaluationConfig {
    /// Grid resolution per axis for mesh extraction.
    #[config(default = 256)]
    pub grid_resolution: usize,

    /// Maximum number of grid points per decoder call.
    #[config(default = 262144)]
    pub max_batch: usize,

    /// Number of training shapes evaluated.
    #[config(default = 10)]
    pub train_scene_number: usize,

    /// Epoch interval between training-set evaluations (0 disables).
    #[config(default = 20)]
    pub train_frequency: usize,

    /// Number of held-out shapes evaluated.
    #[config(default = 10)]
    pub test_scene_number: usize,

    /// Epoch interval between test-set evaluations (0 disables).
    #[config(default = 20)]
    pub test_frequency: usize,

    /// Reconstruction iterations per test shape.
    #[config(default = 1000)]
    pub test_optimization_steps: usize,

    /// Surface samples per mesh for the Chamfer metric.
    #[config(default = 30000)]
    pub chamfer_samples: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationConfig {
    /// A cheap setting for smoke tests.
    pub fn fast() -> Self {
        Self::new()
            .with_grid_resolution(32)
            .with_max_batch(8192)
            .with_train_scene_number(2)
            .with_test_scene_number(1)
            .with_test_optimization_steps(50)
            .with_chamfer_samples(2000)
    }

    /// Whether training-set evaluation runs after `epoch`.
    pub fn train_due(&self, epoch: usize) -> bool {
        self.train_frequency > 0 && epoch % self.train_frequency == 0
    }

    /// Whether test-set evaluation runs after `epoch`.
    pub fn test_due(&self, epoch: usize) -> bool {
        self.test_frequency > 0 && epoch % self.test_frequency == 0
    }

    /// Grid settings derived from this configuration.
    pub fn mesh_grid(&self) -> MeshGridConfig {
        MeshGridConfig::new()
            .with_resolution(self.grid_resolution)
            .with_max_batch(self.max_batch)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.mesh_grid().validate()?;
        if self.chamfer_samples == 0 {
            return Err("chamfer_samples must be positive".to_string());
        }
        Ok(())
    }
}

/// Dense sampling grid used for mesh extraction.
#[derive(Config, Debug)]
pub struct MeshGridConfig {
    /// Points per axis.
    #[config(default = 256)]
    pub resolution: usize,

    /// Maximum number of points per decoder call.
    #[config(default = 262144)]
    pub max_batch: usize,

    /// Lower corner of the sampled cube.
    #[config(default = "-1.0")]
    pub origin: f32,

    /// Edge length of the sampled cube.
    #[config(default = 2.0)]
    pub extent: f32,
}

impl Default for MeshGridConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshGridConfig {
    /// Distance between neighbouring grid points.
    pub fn voxel_size(&self) -> f32 {
        self.extent / (self.resolution.max(2) - 1) as f32
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.resolution < 2 {
            return Err("grid resolution must be at least 2".to_string());
        }
        if self.max_batch == 0 {
            return Err("max_batch must be positive".to_string());
        }
        if !(self.extent > 0.0 && self.extent.is_finite()) {
            return Err("grid extent must be positive".to_string());
        }
        Ok(())
    }
}

/// Configuration for test-time latent optimization.
#[derive(Config, Debug)]
pub struct ReconstructionConfig {
    /// Optimization steps.
    #[config(default = 800)]
    pub num_iterations: usize,

    /// Standard deviation of the initial latent.
    #[config(default = 0.01)]
    pub init_std_dev: f32,

    /// Clamp applied to predicted and target distances.
    #[config(default = 0.1)]
    pub clamp_distance: f32,

    /// Samples drawn per step.
    #[config(default = 8000)]
    pub num_samples: usize,

    /// Initial learning rate.
    #[config(default = 5e-3)]
    pub learning_rate: f64,

    /// Add an L2 penalty on the latent.
    #[config(default = true)]
    pub l2_regularization: bool,

    /// Weight of the L2 penalty.
    #[config(default = 1e-4)]
    pub l2_weight: f32,

    /// Learning rate multiplier applied every `num_iterations / 2` steps.
    #[config(default = 0.1)]
    pub decay_factor: f64,

    /// Seed for initialization and subsampling.
    #[config(default = 0)]
    pub seed: u64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconstructionConfig {
    /// Learning rate used at `iteration`.
    pub fn learning_rate_at(&self, iteration: usize) -> f64 {
        let interval = (self.num_iterations / 2).max(1);
        self.learning_rate * self.decay_factor.powi((iteration / interval) as i32)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_samples == 0 {
            return Err("num_samples must be positive".to_string());
        }
        if self.clamp_distance <= 0.0 {
            return Err("clamp_distance must be positive".to_string());
        }
        if self.learning_rate <= 0.0 {
            return Err("learning_rate must be positive".to_string());
        }
        Ok(())
    }
}


/// Configuration for reconstructing every shape of a split against a snapshot.
#[derive(Config, Debug)]
pub struct SplitReconstructionConfig {
    /// Per-shape latent optimization.
    #[config(default = "ReconstructionConfig::new()")]
    pub reconstruction: ReconstructionConfig,

    /// Grid used to mesh each fitted latent.
    #[config(default = "MeshGridConfig::new()")]
    pub mesh_grid: MeshGridConfig,

    /// Leave shapes whose latent is already on disk untouched.
    #[config(default = true)]
    pub skip_existing: bool,
}

impl Default for SplitReconstructionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SplitReconstructionConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.reconstruction.validate()?;
        self.mesh_grid.validate()
    }
}
