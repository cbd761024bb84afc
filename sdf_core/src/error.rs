//! Error types for sdf_core operations.

use thiserror::Error;

/// Errors raised while building, reading or scoring meshes.
#[derive(Error, Debug)]
pub enum MeshError {
    /// The mesh has no triangles (or zero surface area) where one is required.
    #[error("mesh is empty or has zero surface area")]
    EmptyMesh,

    /// Scalar grid dimensions disagree with the number of values supplied.
    #[error("invalid grid: {dims:?} needs {expected} values, got {got}")]
    InvalidGrid {
        /// Grid dimensions.
        dims: [usize; 3],
        /// Number of values the dimensions imply.
        expected: usize,
        /// Number of values supplied.
        got: usize,
    },

    /// Malformed mesh file.
    #[error("parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// What went wrong.
        message: String,
    },

    /// Unknown metric name.
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sdf_core operations.
pub type Result<T> = std::result::Result<T, MeshError>;
