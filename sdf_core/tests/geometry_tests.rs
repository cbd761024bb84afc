//! End-to-end tests: scalar field to mesh to metric.

use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

use sdf_core::prelude::*;

fn sphere_field(n: usize, center: Point3, radius: f32) -> ScalarGrid {
    let spacing = 2.0 / (n - 1) as f32;
    ScalarGrid::from_fn([n, n, n], Point3::splat(-1.0), spacing, |p| {
        (p - center).length() - radius
    })
}

#[test]
fn test_extracted_sphere_matches_analytic_mesh() {
    let mesh = extract_iso_surface(&sphere_field(64, Point3::ZERO, 0.6), 0.0).unwrap();
    let reference = TriangleMesh::uv_sphere(Point3::ZERO, 0.6, 48, 96);

    let mut rng = StdRng::seed_from_u64(42);
    let (cd, per_point) = compute_metric(&reference, &mesh, Metric::Chamfer, 8_000, &mut rng).unwrap();

    assert!(cd < 2e-3, "chamfer {cd}");
    let p99 = percentile(&per_point, 99.0).unwrap();
    assert!(p99 < 0.01, "99th percentile {p99}");
}

#[test]
fn test_offset_sphere_scores_worse() {
    let reference = TriangleMesh::uv_sphere(Point3::ZERO, 0.6, 32, 64);
    let centered = extract_iso_surface(&sphere_field(40, Point3::ZERO, 0.6), 0.0).unwrap();
    let shifted =
        extract_iso_surface(&sphere_field(40, Point3::new(0.2, 0.0, 0.0), 0.6), 0.0).unwrap();

    let mut rng = StdRng::seed_from_u64(1);
    let (cd_centered, _) =
        compute_metric(&reference, &centered, Metric::Chamfer, 4_000, &mut rng).unwrap();
    let (cd_shifted, _) =
        compute_metric(&reference, &shifted, Metric::Chamfer, 4_000, &mut rng).unwrap();

    assert!(cd_centered < cd_shifted);
}

#[test]
fn test_obj_file_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("sphere.obj");

    let mesh = extract_iso_surface(&sphere_field(20, Point3::ZERO, 0.5), 0.0).unwrap();
    mesh.save_obj(&path).unwrap();

    let loaded = TriangleMesh::load_obj(&path).unwrap();
    assert_eq!(loaded.faces, mesh.faces);
    for (a, b) in loaded.vertices.iter().zip(&mesh.vertices) {
        assert!(a.distance_squared(*b) < 1e-10);
    }
}

#[test]
fn test_missing_obj_is_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = TriangleMesh::load_obj(temp_dir.path().join("absent.obj")).unwrap_err();
    assert!(matches!(err, MeshError::Io(_)));
}
