//! Shape similarity metrics between meshes.

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use rayon::prelude::*;
use rstar::RTree;

use crate::error::{MeshError, Result};
use crate::mesh::TriangleMesh;
use crate::sampling::sample_surface;
use crate::types::Point3;

/// Default number of surface samples drawn from each mesh.
pub const DEFAULT_METRIC_SAMPLES: usize = 30_000;

/// Supported mesh metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Symmetric Chamfer distance on squared nearest-neighbour distances.
    Chamfer,
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Chamfer => write!(f, "chamfer"),
        }
    }
}

impl FromStr for Metric {
    type Err = MeshError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "chamfer" | "cd" => Ok(Metric::Chamfer),
            _ => Err(MeshError::UnknownMetric(s.to_string())),
        }
    }
}

/// Score `generated` against `ground_truth`.
///
/// Both meshes are sampled with `num_samples` area-weighted surface points.
/// Returns the scalar metric and the per-point distances it was reduced from.
pub fn compute_metric<R: Rng + ?Sized>(
    ground_truth: &TriangleMesh,
    generated: &TriangleMesh,
    metric: Metric,
    num_samples: usize,
    rng: &mut R,
) -> Result<(f32, Vec<f32>)> {
    let gt_points = sample_surface(ground_truth, num_samples, rng)?;
    let gen_points = sample_surface(generated, num_samples, rng)?;

    match metric {
        Metric::Chamfer => Ok(chamfer_distance(&gt_points, &gen_points)),
    }
}

/// Chamfer distance between two point sets.
///
/// `mean(d²(gt → gen)) + mean(d²(gen → gt))`, with the per-point squared
/// distances of both directions concatenated in the second return value.
pub fn chamfer_distance(gt_points: &[Point3], gen_points: &[Point3]) -> (f32, Vec<f32>) {
    if gt_points.is_empty() || gen_points.is_empty() {
        return (f32::INFINITY, Vec::new());
    }

    let gt_to_gen = nearest_squared_distances(gt_points, gen_points);
    let gen_to_gt = nearest_squared_distances(gen_points, gt_points);

    let mean = |d: &[f32]| d.iter().map(|&v| v as f64).sum::<f64>() / d.len() as f64;
    let score = (mean(&gt_to_gen) + mean(&gen_to_gt)) as f32;

    let mut per_point = gt_to_gen;
    per_point.extend(gen_to_gt);
    (score, per_point)
}

/// Squared distance from every point of `queries` to its nearest neighbour in `targets`.
pub fn nearest_squared_distances(queries: &[Point3], targets: &[Point3]) -> Vec<f32> {
    let tree = RTree::bulk_load(targets.iter().map(|p| p.as_array()).collect::<Vec<_>>());

    queries
        .par_iter()
        .map(|q| {
            let q = q.as_array();
            tree.nearest_neighbor(&q)
                .map(|n| Point3::from(*n).distance_squared(Point3::from(q)))
                .unwrap_or(f32::INFINITY)
        })
        .collect()
}

/// Value at percentile `p` (0-100) using linear interpolation between ranks.
pub fn percentile(values: &[f32], p: f32) -> Option<f32> {
    let mut sorted: Vec<f32> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f32::total_cmp);

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f32))
}
