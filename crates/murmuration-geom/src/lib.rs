//! Triangle-mesh collision queries used by the flock evasion layer.

use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use thiserror::Error;

/// Numeric gate shared by every geometric and steering branch.
pub const EPSILON: f32 = 0.005;

/// Errors emitted while constructing mesh geometry.
#[derive(Debug, Error)]
pub enum MeshError {
    /// A triangle references a vertex beyond the vertex table.
    #[error("triangle {triangle} references vertex {vertex} but only {vertices} exist")]
    VertexOutOfRange {
        triangle: usize,
        vertex: u32,
        vertices: usize,
    },
    /// A flat index stream whose length does not form whole triangles.
    #[error("index stream of length {0} does not split into triangles")]
    TruncatedIndices(usize),
}

/// Immutable triangle soup probed by collision queries.
///
/// Indices are validated once at construction; queries never touch malformed
/// data. The mesh is shared read-only across all agents for a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriangleMesh {
    vertices: Vec<Vec3>,
    triangles: Vec<[u32; 3]>,
}

impl TriangleMesh {
    /// Build a mesh, checking that every triangle references real vertices.
    pub fn new(vertices: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Result<Self, MeshError> {
        for (index, triangle) in triangles.iter().enumerate() {
            for &vertex in triangle {
                if vertex as usize >= vertices.len() {
                    return Err(MeshError::VertexOutOfRange {
                        triangle: index,
                        vertex,
                        vertices: vertices.len(),
                    });
                }
            }
        }
        Ok(Self {
            vertices,
            triangles,
        })
    }

    /// Build a mesh from a flat index stream consumed in groups of three.
    pub fn from_flat_indices(vertices: Vec<Vec3>, indices: &[u32]) -> Result<Self, MeshError> {
        if !indices.len().is_multiple_of(3) {
            return Err(MeshError::TruncatedIndices(indices.len()));
        }
        let triangles = indices
            .chunks_exact(3)
            .map(|chunk| [chunk[0], chunk[1], chunk[2]])
            .collect();
        Self::new(vertices, triangles)
    }

    /// Mesh with no triangles; every query misses.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Corner positions of the triangle at `index`.
    #[must_use]
    pub fn triangle(&self, index: usize) -> [Vec3; 3] {
        let [a, b, c] = self.triangles[index];
        [
            self.vertices[a as usize],
            self.vertices[b as usize],
            self.vertices[c as usize],
        ]
    }

    /// Number of triangles.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Vertex table.
    #[must_use]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// Triangle index table.
    #[must_use]
    pub fn triangles(&self) -> &[[u32; 3]] {
        &self.triangles
    }

    /// Returns true when the mesh holds no triangles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// Directed line segment cast as a collision probe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Vec3,
    pub end: Vec3,
}

impl Segment {
    /// Segment between two points.
    #[must_use]
    pub const fn new(start: Vec3, end: Vec3) -> Self {
        Self { start, end }
    }

    /// Segment starting at `origin` and extending `length` along `direction`.
    #[must_use]
    pub fn from_ray(origin: Vec3, direction: Vec3, length: f32) -> Self {
        Self {
            start: origin,
            end: origin + direction * length,
        }
    }

    /// Displacement from start to end.
    #[must_use]
    pub fn delta(self) -> Vec3 {
        self.end - self.start
    }
}

/// Outcome of probing geometry with a segment.
///
/// Strategies differ in how much they report: the barycentric test measures a
/// squared distance to the crossing, the Möller–Trumbore test only answers
/// yes or no. Callers that rank hits must pick a measuring strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentTest {
    /// No crossing detected.
    Miss,
    /// Crossing detected; the strategy does not measure distance.
    Hit,
    /// Crossing detected at the given squared distance from the probe start.
    HitAt { distance_sq: f32 },
}

impl SegmentTest {
    /// Returns true for either hit form.
    #[must_use]
    pub const fn is_hit(self) -> bool {
        !matches!(self, Self::Miss)
    }

    /// Squared hit distance when the strategy measured one.
    #[must_use]
    pub const fn distance_sq(self) -> Option<f32> {
        match self {
            Self::HitAt { distance_sq } => Some(distance_sq),
            _ => None,
        }
    }
}

/// Segment-triangle intersection strategy.
///
/// Implementations are pure and cheap; the evasion layer calls them once per
/// probe per triangle, from many threads at once.
pub trait IntersectionTest: Send + Sync {
    /// Short identifier used in logs and summaries.
    fn kind(&self) -> &'static str;

    /// Probe a single triangle.
    fn segment_triangle(&self, triangle: [Vec3; 3], segment: Segment) -> SegmentTest;

    /// Probe every triangle of `mesh`, keeping the nearest squared distance
    /// when the strategy reports one.
    fn segment_mesh(&self, mesh: &TriangleMesh, segment: Segment) -> SegmentTest {
        let mut nearest: Option<f32> = None;
        for index in 0..mesh.triangle_count() {
            match self.segment_triangle(mesh.triangle(index), segment) {
                SegmentTest::Miss => {}
                // Without distances there is nothing left to rank.
                SegmentTest::Hit => return SegmentTest::Hit,
                SegmentTest::HitAt { distance_sq } => {
                    nearest = Some(nearest.map_or(distance_sq, |best| best.min(distance_sq)));
                }
            }
        }
        match nearest {
            Some(distance_sq) => SegmentTest::HitAt { distance_sq },
            None => SegmentTest::Miss,
        }
    }
}

/// Plane test with edge-projected containment and distance reporting.
///
/// Degenerate triangles count as certain collisions (at the squared probe
/// length) and a coplanar parallel probe reports a zero-distance contact.
/// Containment projects onto the two edges independently, which admits a
/// region slightly wider than the true triangle near the far edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarycentricTest;

impl IntersectionTest for BarycentricTest {
    fn kind(&self) -> &'static str {
        "barycentric"
    }

    fn segment_triangle(&self, [v0, v1, v2]: [Vec3; 3], segment: Segment) -> SegmentTest {
        let dir = segment.delta();
        let u = v1 - v0;
        let v = v2 - v0;
        let normal = u.cross(v);
        if normal.length() < EPSILON {
            // No usable plane; report the whole probe as blocked.
            return SegmentTest::HitAt {
                distance_sq: dir.length_squared(),
            };
        }
        let normal = normal.normalize();
        let reach = normal.dot(v0 - segment.start);
        let along = normal.dot(dir);
        if along.abs() < EPSILON {
            return if reach.abs() < EPSILON {
                SegmentTest::HitAt { distance_sq: 0.0 }
            } else {
                SegmentTest::Miss
            };
        }
        let r = reach / along;
        if !(0.0..=1.0).contains(&r) {
            return SegmentTest::Miss;
        }
        let crossing = segment.start + dir * r;
        let w = crossing - v0;
        let m1 = u.dot(w) / u.dot(u);
        let m2 = v.dot(w) / v.dot(v);
        if (0.0..=1.0).contains(&m1) && (0.0..=1.0).contains(&m2) {
            SegmentTest::HitAt {
                distance_sq: crossing.distance_squared(segment.start),
            }
        } else {
            SegmentTest::Miss
        }
    }
}

/// Plane test with exact barycentric containment; boolean verdict only.
///
/// Degenerate triangles are skipped silently, the opposite of
/// [`BarycentricTest`]. Callers pick a policy by picking a strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct MollerTrumboreTest;

impl IntersectionTest for MollerTrumboreTest {
    fn kind(&self) -> &'static str {
        "moller-trumbore"
    }

    fn segment_triangle(&self, [v0, v1, v2]: [Vec3; 3], segment: Segment) -> SegmentTest {
        let dir = segment.delta();
        let u = v1 - v0;
        let v = v2 - v0;
        let normal = u.cross(v);
        if normal.length() < EPSILON {
            return SegmentTest::Miss;
        }
        let normal = normal.normalize();
        let reach = normal.dot(v0 - segment.start);
        let along = normal.dot(dir);
        if along.abs() < EPSILON {
            return if reach.abs() < EPSILON {
                SegmentTest::Hit
            } else {
                SegmentTest::Miss
            };
        }
        let r = reach / along;
        if !(0.0..=1.0).contains(&r) {
            return SegmentTest::Miss;
        }
        let w = segment.start + dir * r - v0;
        let uu = u.dot(u);
        let uv = u.dot(v);
        let vv = v.dot(v);
        let wu = w.dot(u);
        let wv = w.dot(v);
        // Non-degenerate triangles keep this strictly negative.
        let denom = uv * uv - uu * vv;
        let s = (uv * wv - vv * wu) / denom;
        if !(0.0..=1.0).contains(&s) {
            return SegmentTest::Miss;
        }
        let t = (uv * wu - uu * wv) / denom;
        if t < 0.0 || s + t > 1.0 {
            return SegmentTest::Miss;
        }
        SegmentTest::Hit
    }
}

/// Unit directions spread over the sphere with the golden-spiral layout.
///
/// The first direction is exactly +X and later entries drift toward -X, so
/// walking the set in order tries near-forward headings first once rotated
/// into an agent's frame.
#[must_use]
pub fn sample_directions(count: usize) -> Vec<Vec3> {
    let golden = PI * (1.0 + 5.0_f32.sqrt());
    (0..count)
        .map(|index| {
            let step = index as f32;
            let phi = (1.0 - 2.0 * step / count as f32).acos();
            let theta = golden * step;
            Vec3::new(phi.cos(), theta.sin() * phi.sin(), theta.cos() * phi.sin())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> [Vec3; 3] {
        [Vec3::ZERO, Vec3::X, Vec3::Y]
    }

    fn crossing_probe() -> Segment {
        Segment::new(Vec3::new(0.2, 0.2, -1.0), Vec3::new(0.2, 0.2, 1.0))
    }

    fn wide_probe() -> Segment {
        Segment::new(Vec3::new(5.0, 5.0, -1.0), Vec3::new(5.0, 5.0, 1.0))
    }

    #[test]
    fn strategies_agree_on_a_clean_hit() {
        let verdict = BarycentricTest.segment_triangle(unit_triangle(), crossing_probe());
        assert!(verdict.is_hit());
        let distance_sq = verdict.distance_sq().expect("barycentric reports distance");
        assert!((distance_sq - 1.0).abs() < 1e-5, "distance_sq {distance_sq}");
        assert!(
            MollerTrumboreTest
                .segment_triangle(unit_triangle(), crossing_probe())
                .is_hit()
        );
    }

    #[test]
    fn strategies_agree_on_a_clean_miss() {
        assert_eq!(
            BarycentricTest.segment_triangle(unit_triangle(), wide_probe()),
            SegmentTest::Miss
        );
        assert_eq!(
            MollerTrumboreTest.segment_triangle(unit_triangle(), wide_probe()),
            SegmentTest::Miss
        );
    }

    #[test]
    fn degenerate_triangle_policies_differ() {
        let sliver = [Vec3::ZERO, Vec3::X, Vec3::X * 2.0];
        let probe = crossing_probe();
        let conservative = BarycentricTest.segment_triangle(sliver, probe);
        assert_eq!(
            conservative.distance_sq(),
            Some(probe.delta().length_squared())
        );
        assert_eq!(
            MollerTrumboreTest.segment_triangle(sliver, probe),
            SegmentTest::Miss
        );
    }

    #[test]
    fn coplanar_parallel_probe_counts_as_contact() {
        let sliding = Segment::new(Vec3::new(-1.0, 0.2, 0.0), Vec3::new(1.0, 0.2, 0.0));
        assert_eq!(
            BarycentricTest.segment_triangle(unit_triangle(), sliding),
            SegmentTest::HitAt { distance_sq: 0.0 }
        );
        assert_eq!(
            MollerTrumboreTest.segment_triangle(unit_triangle(), sliding),
            SegmentTest::Hit
        );
        let lifted = Segment::new(Vec3::new(-1.0, 0.2, 0.5), Vec3::new(1.0, 0.2, 0.5));
        assert_eq!(
            BarycentricTest.segment_triangle(unit_triangle(), lifted),
            SegmentTest::Miss
        );
        assert_eq!(
            MollerTrumboreTest.segment_triangle(unit_triangle(), lifted),
            SegmentTest::Miss
        );
    }

    #[test]
    fn probe_stopping_short_of_the_plane_misses() {
        let short = Segment::new(Vec3::new(0.2, 0.2, -1.0), Vec3::new(0.2, 0.2, -0.5));
        assert_eq!(
            BarycentricTest.segment_triangle(unit_triangle(), short),
            SegmentTest::Miss
        );
        assert_eq!(
            MollerTrumboreTest.segment_triangle(unit_triangle(), short),
            SegmentTest::Miss
        );
    }

    #[test]
    fn segment_mesh_reports_the_nearest_crossing() {
        // Two parallel walls; the probe crosses both.
        let vertices = vec![
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(0.0, 1.0, 1.0),
            Vec3::new(-1.0, -1.0, 2.0),
            Vec3::new(1.0, -1.0, 2.0),
            Vec3::new(0.0, 1.0, 2.0),
        ];
        let mesh = TriangleMesh::new(vertices, vec![[0, 1, 2], [3, 4, 5]]).expect("mesh");
        let probe = Segment::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 3.0));
        let nearest = BarycentricTest
            .segment_mesh(&mesh, probe)
            .distance_sq()
            .expect("distance");
        assert!((nearest - 1.0).abs() < 1e-5, "nearest {nearest}");
        assert!(MollerTrumboreTest.segment_mesh(&mesh, probe).is_hit());
        assert_eq!(
            BarycentricTest.segment_mesh(&TriangleMesh::empty(), probe),
            SegmentTest::Miss
        );
    }

    #[test]
    fn mesh_construction_validates_indices() {
        let vertices = vec![Vec3::ZERO, Vec3::X, Vec3::Y];
        assert!(matches!(
            TriangleMesh::new(vertices.clone(), vec![[0, 1, 3]]),
            Err(MeshError::VertexOutOfRange { vertex: 3, .. })
        ));
        assert!(matches!(
            TriangleMesh::from_flat_indices(vertices.clone(), &[0, 1, 2, 0]),
            Err(MeshError::TruncatedIndices(4))
        ));
        let mesh = TriangleMesh::from_flat_indices(vertices, &[0, 1, 2]).expect("mesh");
        assert_eq!(mesh.triangle_count(), 1);
        assert_eq!(mesh.triangle(0)[2], Vec3::Y);
        assert!(!mesh.is_empty());
    }

    #[test]
    fn sample_directions_start_forward_and_stay_unit() {
        let samples = sample_directions(256);
        assert_eq!(samples.len(), 256);
        assert!(samples[0].abs_diff_eq(Vec3::X, 1e-6));
        for sample in &samples {
            assert!((sample.length() - 1.0).abs() < 1e-4, "sample {sample:?}");
        }
        let forward = samples.iter().filter(|sample| sample.x > 0.0).count();
        assert!(
            (120..=136).contains(&forward),
            "hemisphere balance: {forward}"
        );
    }
}
