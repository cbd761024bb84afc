//! Indexed triangle meshes and Wavefront OBJ I/O.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{MeshError, Result};
use crate::types::Point3;

/// An indexed triangle mesh.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    /// Vertex positions.
    pub vertices: Vec<Point3>,
    /// Triangles as indices into `vertices`, counter-clockwise when seen from outside.
    pub faces: Vec<[u32; 3]>,
}

impl TriangleMesh {
    /// Create a mesh from vertices and faces.
    pub fn new(vertices: Vec<Point3>, faces: Vec<[u32; 3]>) -> Self {
        Self { vertices, faces }
    }

    /// Whether the mesh has no triangles.
    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Number of vertices.
    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of triangles.
    pub fn num_triangles(&self) -> usize {
        self.faces.len()
    }

    /// Corner positions of triangle `index`.
    #[inline]
    pub fn triangle(&self, index: usize) -> [Point3; 3] {
        let [a, b, c] = self.faces[index];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Area of triangle `index`.
    #[inline]
    pub fn triangle_area(&self, index: usize) -> f32 {
        let [a, b, c] = self.triangle(index);
        0.5 * (b - a).cross(c - a).length()
    }

    /// Total surface area.
    pub fn surface_area(&self) -> f32 {
        (0..self.faces.len()).map(|i| self.triangle_area(i)).sum()
    }

    /// Axis-aligned bounds as `(min, max)`, or `None` for a mesh without vertices.
    pub fn bounds(&self) -> Option<(Point3, Point3)> {
        let first = *self.vertices.first()?;
        Some(self.vertices.iter().fold((first, first), |(lo, hi), p| {
            (
                Point3::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z)),
                Point3::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z)),
            )
        }))
    }

    /// Triangulated UV sphere, used as an analytic reference shape.
    ///
    /// `stacks` counts latitude bands and `slices` longitude bands; both are
    /// raised to the minimum that still encloses a volume.
    pub fn uv_sphere(center: Point3, radius: f32, stacks: usize, slices: usize) -> Self {
        use std::f32::consts::PI;

        let stacks = stacks.max(2);
        let slices = slices.max(3);

        let mut vertices = Vec::with_capacity((stacks - 1) * slices + 2);
        vertices.push(center + Point3::new(0.0, 0.0, radius));
        for i in 1..stacks {
            let phi = PI * i as f32 / stacks as f32;
            for j in 0..slices {
                let theta = 2.0 * PI * j as f32 / slices as f32;
                vertices.push(
                    center
                        + Point3::new(
                            phi.sin() * theta.cos(),
                            phi.sin() * theta.sin(),
                            phi.cos(),
                        ) * radius,
                );
            }
        }
        vertices.push(center - Point3::new(0.0, 0.0, radius));

        let ring = |i: usize, j: usize| (1 + i * slices + j % slices) as u32;
        let south = (vertices.len() - 1) as u32;

        let mut faces = Vec::with_capacity(2 * stacks * slices);
        for j in 0..slices {
            faces.push([0, ring(0, j), ring(0, j + 1)]);
        }
        for i in 0..stacks - 2 {
            for j in 0..slices {
                faces.push([ring(i, j), ring(i + 1, j), ring(i + 1, j + 1)]);
                faces.push([ring(i, j), ring(i + 1, j + 1), ring(i, j + 1)]);
            }
        }
        for j in 0..slices {
            faces.push([ring(stacks - 2, j), south, ring(stacks - 2, j + 1)]);
        }

        Self { vertices, faces }
    }

    /// Write the mesh as Wavefront OBJ.
    pub fn write_obj<W: Write>(&self, writer: &mut W) -> Result<()> {
        writeln!(writer, "# {} vertices, {} faces", self.vertices.len(), self.faces.len())?;
        for v in &self.vertices {
            writeln!(writer, "v {} {} {}", v.x, v.y, v.z)?;
        }
        // OBJ indices are 1-based
        for [a, b, c] in &self.faces {
            writeln!(writer, "f {} {} {}", a + 1, b + 1, c + 1)?;
        }
        Ok(())
    }

    /// Save the mesh to an OBJ file, creating parent directories as needed.
    pub fn save_obj(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_obj(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Parse a mesh from Wavefront OBJ text.
    ///
    /// Only `v` and `f` records are read. Polygons are fan-triangulated and
    /// `v/vt/vn` style and negative (relative) indices are accepted.
    pub fn read_obj<R: BufRead>(reader: R) -> Result<Self> {
        let mut vertices = Vec::new();
        let mut faces = Vec::new();

        for (line_idx, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = line_idx + 1;
            let mut tokens = line.split_whitespace();

            match tokens.next() {
                Some("v") => {
                    let mut coords = [0.0f32; 3];
                    for c in coords.iter_mut() {
                        *c = tokens
                            .next()
                            .and_then(|t| t.parse().ok())
                            .ok_or_else(|| MeshError::Parse {
                                line: line_no,
                                message: "expected three vertex coordinates".to_string(),
                            })?;
                    }
                    vertices.push(Point3::from(coords));
                }
                Some("f") => {
                    let indices = tokens
                        .map(|t| resolve_obj_index(t, vertices.len(), line_no))
                        .collect::<Result<Vec<u32>>>()?;
                    if indices.len() < 3 {
                        return Err(MeshError::Parse {
                            line: line_no,
                            message: "face needs at least three vertices".to_string(),
                        });
                    }
                    for k in 1..indices.len() - 1 {
                        faces.push([indices[0], indices[k], indices[k + 1]]);
                    }
                }
                _ => {}
            }
        }

        Ok(Self { vertices, faces })
    }

    /// Load a mesh from an OBJ file.
    pub fn load_obj(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::read_obj(BufReader::new(file))
    }
}

fn resolve_obj_index(token: &str, num_vertices: usize, line: usize) -> Result<u32> {
    let bad = |message: &str| MeshError::Parse {
        line,
        message: format!("{message}: '{token}'"),
    };

    let raw: i64 = token
        .split('/')
        .next()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| bad("invalid face index"))?;

    let index = match raw {
        r if r > 0 => r - 1,
        r if r < 0 => num_vertices as i64 + r,
        _ => return Err(bad("face index 0 is not valid")),
    };

    if index < 0 || index >= num_vertices as i64 {
        return Err(bad("face index out of range"));
    }
    Ok(index as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> TriangleMesh {
        TriangleMesh::new(
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
            ],
            vec![[0, 1, 2]],
        )
    }

    #[test]
    fn test_triangle_area() {
        let mesh = unit_triangle();
        assert!((mesh.surface_area() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_uv_sphere_area_converges() {
        let sphere = TriangleMesh::uv_sphere(Point3::ZERO, 1.0, 64, 128);
        let exact = 4.0 * std::f32::consts::PI;
        let area = sphere.surface_area();
        assert!((area - exact).abs() / exact < 0.01, "area {area}");
    }

    #[test]
    fn test_uv_sphere_vertices_on_surface() {
        let center = Point3::new(0.1, -0.2, 0.3);
        let sphere = TriangleMesh::uv_sphere(center, 0.5, 8, 12);
        for v in &sphere.vertices {
            assert!(((*v - center).length() - 0.5).abs() < 1e-5);
        }
        for face in &sphere.faces {
            for &i in face {
                assert!((i as usize) < sphere.num_vertices());
            }
        }
    }

    #[test]
    fn test_obj_write_then_read() {
        let mesh = TriangleMesh::uv_sphere(Point3::ZERO, 1.0, 4, 6);
        let mut buffer = Vec::new();
        mesh.write_obj(&mut buffer).unwrap();

        let parsed = TriangleMesh::read_obj(buffer.as_slice()).unwrap();
        assert_eq!(parsed.faces, mesh.faces);
        assert_eq!(parsed.num_vertices(), mesh.num_vertices());
    }

    #[test]
    fn test_obj_polygon_and_relative_indices() {
        let obj = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1/1/1 2/2/2 3/3/3 4/4/4\nf -4 -3 -2\n";
        let mesh = TriangleMesh::read_obj(obj.as_bytes()).unwrap();
        assert_eq!(mesh.faces, vec![[0, 1, 2], [0, 2, 3], [0, 1, 2]]);
    }

    #[test]
    fn test_obj_rejects_out_of_range() {
        let obj = "v 0 0 0\nv 1 0 0\nf 1 2 3\n";
        let err = TriangleMesh::read_obj(obj.as_bytes()).unwrap_err();
        assert!(matches!(err, MeshError::Parse { line: 3, .. }));
    }
}
