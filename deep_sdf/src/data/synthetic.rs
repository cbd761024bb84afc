//! Synthetic shapes with analytic signed distances.

use rand::Rng;
use rand_distr::StandardNormal;
use sdf_core::{Point3, TriangleMesh};

use super::samples::ShapeSamples;
use super::store::InMemorySampleStore;

/// A sphere with an analytic signed distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    /// Sphere center.
    pub center: Point3,
    /// Sphere radius.
    pub radius: f32,
}

impl Sphere {
    /// Create a sphere.
    pub fn new(center: Point3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// Signed distance, negative inside.
    pub fn sdf(&self, p: Point3) -> f32 {
        (p - self.center).length() - self.radius
    }

    /// Triangulated surface for metric evaluation.
    pub fn mesh(&self, stacks: usize, slices: usize) -> TriangleMesh {
        TriangleMesh::uv_sphere(self.center, self.radius, stacks, slices)
    }

    /// Draw `count` samples the way DeepSDF preprocessing does: most points
    /// jittered around the surface, the rest uniform in `[-1, 1]³`.
    pub fn samples<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> ShapeSamples {
        let near = count * 4 / 5;

        let rows = (0..count).map(|i| {
            let p = if i < near {
                let dir = random_direction(rng);
                let r = self.radius + 0.05 * rng.sample::<f32, _>(StandardNormal);
                self.center + dir * r
            } else {
                Point3::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                )
            };
            [p.x, p.y, p.z, self.sdf(p)]
        });
        ShapeSamples::from_rows(rows.collect::<Vec<_>>())
    }
}

fn random_direction<R: Rng + ?Sized>(rng: &mut R) -> Point3 {
    loop {
        let p = Point3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let len_sq = p.length_squared();
        if len_sq > 1e-6 && len_sq <= 1.0 {
            return p / len_sq.sqrt();
        }
    }
}

/// Spheres centered at the origin with radii spread over `[min_radius, max_radius]`.
///
/// Shapes with radius above the midpoint get label 1.0, the rest 0.0.
pub fn sphere_family(count: usize, min_radius: f32, max_radius: f32) -> Vec<Sphere> {
    (0..count)
        .map(|i| {
            let t = if count > 1 {
                i as f32 / (count - 1) as f32
            } else {
                0.5
            };
            Sphere::new(Point3::ZERO, min_radius + t * (max_radius - min_radius))
        })
        .collect()
}

/// In-memory store of sphere samples, named `sphere_<i>`.
pub fn sphere_store<R: Rng + ?Sized>(
    spheres: &[Sphere],
    samples_per_shape: usize,
    rng: &mut R,
) -> InMemorySampleStore {
    let midpoint = spheres.iter().map(|s| s.radius).sum::<f32>() / spheres.len().max(1) as f32;
    let mut store = InMemorySampleStore::new();
    for (i, sphere) in spheres.iter().enumerate() {
        let label = if sphere.radius > midpoint { 1.0 } else { 0.0 };
        store.push(format!("sphere_{i}"), sphere.samples(samples_per_shape, rng), label);
    }
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_sphere_samples_have_correct_sign() {
        let sphere = Sphere::new(Point3::ZERO, 0.5);
        let mut rng = StdRng::seed_from_u64(0);
        let samples = sphere.samples(1000, &mut rng);
        assert_eq!(samples.len(), 1000);
        assert!(!samples.positive.is_empty());
        assert!(!samples.negative.is_empty());
        for row in &samples.negative {
            let p = Point3::new(row[0], row[1], row[2]);
            assert!(p.length() < 0.5 + 1e-5);
        }
    }

    #[test]
    fn test_sphere_store_labels() {
        let spheres = sphere_family(4, 0.3, 0.6);
        let mut rng = StdRng::seed_from_u64(1);
        let store = sphere_store(&spheres, 128, &mut rng);
        assert_eq!(store.len(), 4);
        assert_eq!(store.label(0), 0.0);
        assert_eq!(store.label(3), 1.0);
        assert_eq!(store.name(2), Some("sphere_2"));
    }
}
