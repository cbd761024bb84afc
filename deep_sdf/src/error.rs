//! Error types for deep_sdf.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while training, resuming or evaluating a model.
#[derive(Error, Debug)]
pub enum DeepSdfError {
    /// A required file is absent.
    #[error("missing file: {}", path.display())]
    MissingFile {
        /// Path that was expected to exist.
        path: PathBuf,
    },

    /// Persisted tensor shapes disagree with the current configuration.
    #[error("dimension mismatch for {what}: expected {expected:?}, got {got:?}")]
    DimensionMismatch {
        /// Which table or parameter disagreed.
        what: String,
        /// Shape implied by the configuration.
        expected: Vec<usize>,
        /// Shape that was found.
        got: Vec<usize>,
    },

    /// Checkpoint components were written at different epochs.
    #[error("epoch mismatch: model {model} vs optimizer {optimizer} vs latent codes {latent} vs logs {logs}")]
    EpochMismatch {
        /// Epoch stored with the decoder weights.
        model: usize,
        /// Epoch stored with the optimizer state.
        optimizer: usize,
        /// Epoch stored with the latent tables.
        latent: usize,
        /// Epoch stored with the logs.
        logs: usize,
    },

    /// A loss or field value became NaN or infinite.
    #[error("non-finite value in {context}: {value}")]
    NumericDegenerate {
        /// Where the value was observed.
        context: String,
        /// The offending value.
        value: f32,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Tensors from different devices were about to be combined.
    #[error("device mismatch in {context}: tensors must be on the same device")]
    DeviceMismatch {
        /// Operation that was guarded.
        context: String,
    },

    /// Invalid or corrupted data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Mesh reading, extraction or scoring failure.
    #[error("mesh error: {0}")]
    Mesh(#[from] sdf_core::MeshError),
}

impl DeepSdfError {
    /// Shorthand for [`DeepSdfError::InvalidConfig`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Result type for deep_sdf operations.
pub type Result<T> = std::result::Result<T, DeepSdfError>;
