//! Configuration types for the auto-decoder.

mod evaluation;
mod network;
mod training;

pub use evaluation::{EvaluationConfig, MeshGridConfig, ReconstructionConfig, SplitReconstructionConfig};
pub use network::SdfDecoderConfig;
pub use training::{
    LatentInitConfig, LogVarInit, LossConfig, NonFinitePolicy, TrainingConfig,
};
