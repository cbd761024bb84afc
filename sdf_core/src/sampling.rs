//! Area-weighted point sampling on triangle meshes.

use rand::Rng;

use crate::error::{MeshError, Result};
use crate::mesh::TriangleMesh;
use crate::types::Point3;

/// Draw `count` points uniformly over the surface of `mesh`.
///
/// Triangles are picked with probability proportional to their area and
/// points are placed uniformly inside the picked triangle.
pub fn sample_surface<R: Rng + ?Sized>(
    mesh: &TriangleMesh,
    count: usize,
    rng: &mut R,
) -> Result<Vec<Point3>> {
    let mut cumulative = Vec::with_capacity(mesh.num_triangles());
    let mut total = 0.0f32;
    for i in 0..mesh.num_triangles() {
        total += mesh.triangle_area(i);
        cumulative.push(total);
    }

    if total.is_nan() || total <= 0.0 {
        return Err(MeshError::EmptyMesh);
    }

    let points = (0..count)
        .map(|_| {
            let target = rng.gen_range(0.0..total);
            let tri = cumulative
                .partition_point(|&area| area <= target)
                .min(cumulative.len() - 1);
            let [a, b, c] = mesh.triangle(tri);

            let r1 = libm::sqrtf(rng.gen::<f32>());
            let r2 = rng.gen::<f32>();
            a * (1.0 - r1) + b * (r1 * (1.0 - r2)) + c * (r1 * r2)
        })
        .collect();

    Ok(points)
}
