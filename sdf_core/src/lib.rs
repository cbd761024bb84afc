//! # sdf_core
//!
//! Geometry for neural signed distance field pipelines.
//!
//! This crate holds the parts of the pipeline that never touch a tensor:
//! turning a sampled scalar field into a triangle mesh, reading and writing
//! meshes, and scoring a reconstructed mesh against a reference one.
//!
//! ## Modules
//!
//! - [`types`]: `Point3`
//! - [`mesh`]: `TriangleMesh` with OBJ I/O and an analytic sphere builder
//! - [`surface_nets`]: `ScalarGrid` and iso-surface extraction
//! - [`sampling`]: area-weighted surface sampling
//! - [`metrics`]: Chamfer distance and percentile helpers
//! - [`error`]: Error types
//!
//! ## Usage
//!
//! ```
//! use sdf_core::prelude::*;
//!
//! let grid = ScalarGrid::from_fn([24, 24, 24], Point3::splat(-1.0), 2.0 / 23.0, |p| {
//!     p.length() - 0.5
//! });
//! let mesh = extract_iso_surface(&grid, 0.0).expect("sphere crosses the grid");
//! assert!(mesh.num_triangles() > 0);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod mesh;
pub mod metrics;
pub mod sampling;
pub mod surface_nets;
pub mod types;

pub use error::{MeshError, Result};
pub use mesh::TriangleMesh;
pub use metrics::{chamfer_distance, compute_metric, percentile, Metric, DEFAULT_METRIC_SAMPLES};
pub use sampling::sample_surface;
pub use surface_nets::{extract_iso_surface, interpolate_vertex, ScalarGrid};
pub use types::Point3;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{MeshError, Result};
    pub use crate::mesh::TriangleMesh;
    pub use crate::metrics::{chamfer_distance, compute_metric, percentile, Metric};
    pub use crate::sampling::sample_surface;
    pub use crate::surface_nets::{extract_iso_surface, ScalarGrid};
    pub use crate::types::Point3;
}
