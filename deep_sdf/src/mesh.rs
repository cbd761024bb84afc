//! Iso-surface extraction from a decoder and a fixed latent code.

use burn::prelude::*;
use sdf_core::{extract_iso_surface, Point3, ScalarGrid, TriangleMesh};

use crate::config::MeshGridConfig;
use crate::error::{DeepSdfError, Result};
use crate::latent::{interpolate_latents, interpolation_weights};
use crate::nn::SdfForward;
use crate::tensor_ops::{matrix, to_vec};

/// Evaluate `decoder` with `latent` on the whole grid.
///
/// Points are ordered with `x` fastest, matching [`ScalarGrid`], and the
/// decoder sees at most `max_batch` of them per call.
pub fn sample_grid<B: Backend, D: SdfForward<B>>(
    decoder: &D,
    latent: Tensor<B, 2>,
    config: &MeshGridConfig,
) -> Result<ScalarGrid> {
    config.validate().map_err(|message| DeepSdfError::InvalidConfig { message })?;
    let [rows, latent_size] = latent.dims();
    if rows != 1 || latent_size != decoder.latent_size() {
        return Err(DeepSdfError::DimensionMismatch {
            what: "mesh latent".to_string(),
            expected: vec![1, decoder.latent_size()],
            got: vec![rows, latent_size],
        });
    }

    let n = config.resolution;
    let total = n * n * n;
    let voxel = config.voxel_size();
    let origin = Point3::splat(config.origin);
    let device = latent.device();

    let mut values = Vec::with_capacity(total);
    let mut start = 0;
    while start < total {
        let end = (start + config.max_batch).min(total);
        let count = end - start;

        let mut coords = Vec::with_capacity(count * 3);
        for index in start..end {
            let x = index % n;
            let y = (index / n) % n;
            let z = index / (n * n);
            coords.extend_from_slice(&[
                origin.x + x as f32 * voxel,
                origin.y + y as f32 * voxel,
                origin.z + z as f32 * voxel,
            ]);
        }

        let xyz = matrix::<B>(coords, count, 3, &device);
        let latents = latent.clone().repeat_dim(0, count);
        let sdf = decoder.forward_with_latents(latents, xyz);
        values.extend(to_vec(sdf)?);
        start = end;
    }

    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(DeepSdfError::NumericDegenerate {
            context: "decoded SDF grid".to_string(),
            value: *bad,
        });
    }

    Ok(ScalarGrid::new([n, n, n], origin, voxel, values)?)
}

/// Mesh the zero level set of the decoded field.
///
/// Returns `Ok(None)` when the field has no sign change inside the grid.
pub fn extract_mesh<B: Backend, D: SdfForward<B>>(
    decoder: &D,
    latent: Tensor<B, 2>,
    config: &MeshGridConfig,
) -> Result<Option<TriangleMesh>> {
    let grid = sample_grid(decoder, latent, config)?;
    let mesh = extract_iso_surface(&grid, 0.0);
    match &mesh {
        Some(m) => log::debug!(
            "extracted mesh with {} vertices, {} triangles at resolution {}",
            m.num_vertices(),
            m.num_triangles(),
            config.resolution
        ),
        None => log::debug!("no iso-surface inside the sampled volume"),
    }
    Ok(mesh)
}

/// Mesh blends of latents `a` and `b` at `steps` evenly spaced weights in `[0, 1]`.
///
/// Each entry pairs the weight with its mesh, `None` where the blended
/// shape has no surface inside the grid.
pub fn interpolation_meshes<B: Backend, D: SdfForward<B>>(
    decoder: &D,
    a: Tensor<B, 2>,
    b: Tensor<B, 2>,
    steps: usize,
    config: &MeshGridConfig,
) -> Result<Vec<(f32, Option<TriangleMesh>)>> {
    if a.dims() != b.dims() {
        return Err(DeepSdfError::DimensionMismatch {
            what: "interpolated latents".to_string(),
            expected: a.dims().to_vec(),
            got: b.dims().to_vec(),
        });
    }
    interpolation_weights(steps)
        .into_iter()
        .map(|weight| {
            let latent = interpolate_latents(a.clone(), b.clone(), weight);
            extract_mesh(decoder, latent, config).map(|mesh| (weight, mesh))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArrayDevice;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    /// `|xyz| - (radius + z0)`.
    struct SphereField;

    impl SdfForward<TestBackend> for SphereField {
        fn latent_size(&self) -> usize {
            1
        }

        fn forward(&self, input: Tensor<TestBackend, 2>) -> Tensor<TestBackend, 2> {
            let [n, _] = input.dims();
            let radius = input.clone().slice([0..n, 0..1]) + 0.5;
            let xyz = input.slice([0..n, 1..4]);
            xyz.powf_scalar(2.0).sum_dim(1).sqrt() - radius
        }
    }

    #[test]
    fn test_sphere_mesh_radius() {
        let device = NdArrayDevice::Cpu;
        let latent = Tensor::<TestBackend, 2>::from_floats([[0.1]], &device);
        let config = MeshGridConfig::new().with_resolution(24).with_max_batch(1000);

        let mesh = extract_mesh(&SphereField, latent, &config).unwrap().unwrap();
        for v in &mesh.vertices {
            assert!((v.length() - 0.6).abs() < 0.03, "vertex at radius {}", v.length());
        }
    }

    #[test]
    fn test_chunking_does_not_change_values() {
        let device = NdArrayDevice::Cpu;
        let latent = Tensor::<TestBackend, 2>::from_floats([[0.0]], &device);
        let small = MeshGridConfig::new().with_resolution(9).with_max_batch(7);
        let large = MeshGridConfig::new().with_resolution(9).with_max_batch(10_000);

        let a = sample_grid(&SphereField, latent.clone(), &small).unwrap();
        let b = sample_grid(&SphereField, latent, &large).unwrap();
        assert_eq!(a.values(), b.values());
    }

    #[test]
    fn test_empty_field_gives_none() {
        let device = NdArrayDevice::Cpu;
        let latent = Tensor::<TestBackend, 2>::from_floats([[5.0]], &device);
        let config = MeshGridConfig::new().with_resolution(8);
        assert!(extract_mesh(&SphereField, latent, &config).unwrap().is_none());
    }

    #[test]
    fn test_wrong_latent_shape() {
        let device = NdArrayDevice::Cpu;
        let latent = Tensor::<TestBackend, 2>::zeros([2, 1], &device);
        let config = MeshGridConfig::new().with_resolution(4);
        assert!(matches!(
            extract_mesh(&SphereField, latent, &config),
            Err(DeepSdfError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_interpolation_meshes_blend_radius() {
        let device = NdArrayDevice::Cpu;
        let a = Tensor::<TestBackend, 2>::from_floats([[0.0]], &device);
        let b = Tensor::<TestBackend, 2>::from_floats([[0.3]], &device);
        let config = MeshGridConfig::new().with_resolution(24);

        let meshes = interpolation_meshes(&SphereField, a, b, 3, &config).unwrap();
        assert_eq!(meshes.len(), 3);
        for ((weight, mesh), expected) in meshes.iter().zip([0.5, 0.65, 0.8]) {
            let mesh = mesh.as_ref().unwrap();
            let mean = mesh.vertices.iter().map(|v| v.length()).sum::<f32>() / mesh.num_vertices() as f32;
            assert!((mean - expected).abs() < 0.03, "weight {weight}: radius {mean}");
        }
    }

    #[test]
    fn test_interpolation_rejects_mismatched_latents() {
        let device = NdArrayDevice::Cpu;
        let a = Tensor::<TestBackend, 2>::zeros([1, 1], &device);
        let b = Tensor::<TestBackend, 2>::zeros([1, 2], &device);
        let config = MeshGridConfig::new().with_resolution(4);
        assert!(matches!(
            interpolation_meshes(&SphereField, a, b, 2, &config),
            Err(DeepSdfError::DimensionMismatch { .. })
        ));
    }
}
