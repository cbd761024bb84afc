//! Iso-surface extraction from a dense scalar grid.
//!
//! Surface nets: one vertex per cell whose corners straddle the iso-value,
//! placed at the mean of the interpolated edge crossings, and one quad per
//! grid edge with a sign change, stitched from the four cells around it.
//! Cells are only formed inside the sampled volume, so surfaces that leave
//! the grid stay open at the boundary.

use crate::error::{MeshError, Result};
use crate::mesh::TriangleMesh;
use crate::types::Point3;

/// Corner offsets of a cell, indexed by corner number.
const CORNER_OFFSETS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

/// The twelve cell edges as corner pairs.
const CELL_EDGES: [(usize, usize); 12] = [
    (0, 1),
    (1, 2),
    (2, 3),
    (3, 0),
    (4, 5),
    (5, 6),
    (6, 7),
    (7, 4),
    (0, 4),
    (1, 5),
    (2, 6),
    (3, 7),
];

const NO_VERTEX: u32 = u32::MAX;

/// Scalar samples on a regular lattice.
///
/// Values are stored with `x` varying fastest: `values[(z * ny + y) * nx + x]`.
#[derive(Debug, Clone)]
pub struct ScalarGrid {
    dims: [usize; 3],
    origin: Point3,
    spacing: f32,
    values: Vec<f32>,
}

impl ScalarGrid {
    /// Wrap sampled values. Fails if `values.len()` does not match `dims`.
    pub fn new(dims: [usize; 3], origin: Point3, spacing: f32, values: Vec<f32>) -> Result<Self> {
        let expected = dims[0] * dims[1] * dims[2];
        if values.len() != expected {
            return Err(MeshError::InvalidGrid {
                dims,
                expected,
                got: values.len(),
            });
        }
        Ok(Self {
            dims,
            origin,
            spacing,
            values,
        })
    }

    /// Sample `f` at every lattice point.
    pub fn from_fn<F>(dims: [usize; 3], origin: Point3, spacing: f32, mut f: F) -> Self
    where
        F: FnMut(Point3) -> f32,
    {
        let mut values = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    values.push(f(lattice_point(origin, spacing, x, y, z)));
                }
            }
        }
        Self {
            dims,
            origin,
            spacing,
            values,
        }
    }

    /// Lattice dimensions `[nx, ny, nz]`.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Sampled values.
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// World position of lattice point `(x, y, z)`.
    #[inline]
    pub fn position(&self, x: usize, y: usize, z: usize) -> Point3 {
        lattice_point(self.origin, self.spacing, x, y, z)
    }

    #[inline]
    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        (z * self.dims[1] + y) * self.dims[0] + x
    }

    #[inline]
    fn value(&self, x: usize, y: usize, z: usize) -> f32 {
        self.values[self.index(x, y, z)]
    }
}

#[inline]
fn lattice_point(origin: Point3, spacing: f32, x: usize, y: usize, z: usize) -> Point3 {
    origin + Point3::new(x as f32, y as f32, z as f32) * spacing
}

/// Interpolate the iso-value crossing along an edge.
#[inline]
pub fn interpolate_vertex(p0: Point3, p1: Point3, v0: f32, v1: f32, iso_value: f32) -> Point3 {
    let denom = v1 - v0;
    if libm::fabsf(denom) < 1e-10 {
        return p0.lerp(p1, 0.5);
    }
    let t = ((iso_value - v0) / denom).clamp(0.0, 1.0);
    p0.lerp(p1, t)
}

/// Extract the `iso_value` level set of `grid`.
///
/// Samples strictly below `iso_value` count as inside. Returns `None` when no
/// cell straddles the level set.
pub fn extract_iso_surface(grid: &ScalarGrid, iso_value: f32) -> Option<TriangleMesh> {
    let [nx, ny, nz] = grid.dims;
    if nx < 2 || ny < 2 || nz < 2 {
        return None;
    }

    let (cx, cy) = (nx - 1, ny - 1);
    let cell_index = |x: usize, y: usize, z: usize| (z * cy + y) * cx + x;
    let inside = |x: usize, y: usize, z: usize| grid.value(x, y, z) < iso_value;

    let mut cell_vertex = vec![NO_VERTEX; cx * cy * (nz - 1)];
    let mut vertices = Vec::new();

    for z in 0..nz - 1 {
        for y in 0..ny - 1 {
            for x in 0..nx - 1 {
                let mut values = [0.0f32; 8];
                let mut mask = 0u8;
                for (i, [dx, dy, dz]) in CORNER_OFFSETS.iter().enumerate() {
                    values[i] = grid.value(x + dx, y + dy, z + dz);
                    if values[i] < iso_value {
                        mask |= 1 << i;
                    }
                }
                if mask == 0 || mask == u8::MAX {
                    continue;
                }

                let mut sum = Point3::ZERO;
                let mut crossings = 0u32;
                for &(a, b) in &CELL_EDGES {
                    if (mask >> a) & 1 == (mask >> b) & 1 {
                        continue;
                    }
                    let [ax, ay, az] = CORNER_OFFSETS[a];
                    let [bx, by, bz] = CORNER_OFFSETS[b];
                    sum += interpolate_vertex(
                        grid.position(x + ax, y + ay, z + az),
                        grid.position(x + bx, y + by, z + bz),
                        values[a],
                        values[b],
                        iso_value,
                    );
                    crossings += 1;
                }

                cell_vertex[cell_index(x, y, z)] = vertices.len() as u32;
                vertices.push(sum / crossings as f32);
            }
        }
    }

    if vertices.is_empty() {
        return None;
    }

    let mut faces = Vec::new();
    let mut emit = |quad: [usize; 4], flip: bool| {
        let ids = quad.map(|c| cell_vertex[c]);
        if ids.contains(&NO_VERTEX) {
            return;
        }
        let [a, b, c, d] = if flip { [ids[0], ids[3], ids[2], ids[1]] } else { ids };
        faces.push([a, b, c]);
        faces.push([a, c, d]);
    };

    // Each quad is ordered so that its normal points along +axis when the
    // lower end of the edge is inside; `flip` reverses it otherwise.
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let here = inside(x, y, z);

                let interior_y = y >= 1 && y < cy;
                let interior_z = z >= 1 && z < nz - 1;
                let interior_x = x >= 1 && x < cx;

                if x < cx && interior_y && interior_z && here != inside(x + 1, y, z) {
                    emit(
                        [
                            cell_index(x, y - 1, z - 1),
                            cell_index(x, y, z - 1),
                            cell_index(x, y, z),
                            cell_index(x, y - 1, z),
                        ],
                        !here,
                    );
                }
                if y < cy && interior_x && interior_z && here != inside(x, y + 1, z) {
                    emit(
                        [
                            cell_index(x - 1, y, z - 1),
                            cell_index(x - 1, y, z),
                            cell_index(x, y, z),
                            cell_index(x, y, z - 1),
                        ],
                        !here,
                    );
                }
                if z < nz - 1 && interior_x && interior_y && here != inside(x, y, z + 1) {
                    emit(
                        [
                            cell_index(x - 1, y - 1, z),
                            cell_index(x, y - 1, z),
                            cell_index(x, y, z),
                            cell_index(x - 1, y, z),
                        ],
                        !here,
                    );
                }
            }
        }
    }

    if faces.is_empty() {
        return None;
    }

    Some(TriangleMesh::new(vertices, faces))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere_grid(n: usize, radius: f32) -> ScalarGrid {
        let spacing = 2.0 / (n - 1) as f32;
        ScalarGrid::from_fn([n, n, n], Point3::splat(-1.0), spacing, |p| p.length() - radius)
    }

    fn signed_volume(mesh: &TriangleMesh) -> f32 {
        (0..mesh.num_triangles())
            .map(|i| {
                let [a, b, c] = mesh.triangle(i);
                a.dot(b.cross(c)) / 6.0
            })
            .sum()
    }

    #[test]
    fn test_interpolate_vertex_midpoint() {
        let p = interpolate_vertex(
            Point3::ZERO,
            Point3::new(1.0, 0.0, 0.0),
            -1.0,
            1.0,
            0.0,
        );
        assert!((p.x - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_interpolate_vertex_degenerate_edge() {
        let p = interpolate_vertex(Point3::ZERO, Point3::new(0.0, 2.0, 0.0), 0.3, 0.3, 0.0);
        assert_eq!(p, Point3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_sphere_vertices_near_surface() {
        let mesh = extract_iso_surface(&sphere_grid(32, 0.6), 0.0).unwrap();
        assert!(mesh.num_triangles() > 100);
        let spacing = 2.0 / 31.0;
        for v in &mesh.vertices {
            assert!((v.length() - 0.6).abs() < spacing, "vertex {:?}", v);
        }
    }

    #[test]
    fn test_sphere_is_closed_and_outward() {
        let mesh = extract_iso_surface(&sphere_grid(40, 0.5), 0.0).unwrap();
        let exact = 4.0 / 3.0 * std::f32::consts::PI * 0.125;
        let volume = signed_volume(&mesh);
        assert!(volume > 0.0, "normals point inwards: {volume}");
        assert!((volume - exact).abs() / exact < 0.05, "volume {volume} vs {exact}");
    }

    #[test]
    fn test_no_crossing_returns_none() {
        let grid = ScalarGrid::from_fn([8, 8, 8], Point3::ZERO, 0.1, |_| 1.0);
        assert!(extract_iso_surface(&grid, 0.0).is_none());

        let grid = ScalarGrid::from_fn([8, 8, 8], Point3::ZERO, 0.1, |_| -1.0);
        assert!(extract_iso_surface(&grid, 0.0).is_none());
    }

    #[test]
    fn test_grid_size_validation() {
        let err = ScalarGrid::new([2, 2, 2], Point3::ZERO, 1.0, vec![0.0; 7]).unwrap_err();
        assert!(matches!(err, MeshError::InvalidGrid { expected: 8, got: 7, .. }));
    }

    #[test]
    fn test_plane_in_anisotropic_grid() {
        let grid = ScalarGrid::from_fn([6, 9, 4], Point3::ZERO, 0.25, |p| p.y - 1.1);
        let mesh = extract_iso_surface(&grid, 0.0).unwrap();
        for v in &mesh.vertices {
            assert!((v.y - 1.1).abs() < 1e-4);
        }
    }
}
