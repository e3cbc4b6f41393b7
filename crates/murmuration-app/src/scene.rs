//! Scene assembly: obstacle meshes and initial flock state.

use anyhow::{Context, Result};
use glam::Vec3;
use murmuration_core::{AgentState, FlockConfig};
use murmuration_geom::TriangleMesh;
use rand::Rng;
use rand::rngs::SmallRng;
use std::path::Path;

/// Load every model in an OBJ file into a single triangle mesh.
pub fn load_obj_mesh(path: &Path) -> Result<TriangleMesh> {
    let (models, _materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            triangulate: true,
            single_index: true,
            ..Default::default()
        },
    )
    .with_context(|| format!("loading obstacle mesh from {}", path.display()))?;

    let mut vertices = Vec::new();
    let mut indices = Vec::new();
    for model in models {
        let base = vertices.len() as u32;
        vertices.extend(
            model
                .mesh
                .positions
                .chunks_exact(3)
                .map(|chunk| Vec3::new(chunk[0], chunk[1], chunk[2])),
        );
        indices.extend(model.mesh.indices.iter().map(|index| base + index));
    }
    TriangleMesh::from_flat_indices(vertices, &indices)
        .with_context(|| format!("building triangle mesh from {}", path.display()))
}

/// Axis-aligned box room centered on the origin.
#[must_use]
pub fn box_room(half_extent: f32) -> TriangleMesh {
    let h = half_extent;
    let vertices = vec![
        Vec3::new(-h, -h, -h),
        Vec3::new(h, -h, -h),
        Vec3::new(h, h, -h),
        Vec3::new(-h, h, -h),
        Vec3::new(-h, -h, h),
        Vec3::new(h, -h, h),
        Vec3::new(h, h, h),
        Vec3::new(-h, h, h),
    ];
    let triangles = vec![
        [0, 1, 2],
        [0, 2, 3],
        [4, 6, 5],
        [4, 7, 6],
        [0, 3, 7],
        [0, 7, 4],
        [1, 5, 6],
        [1, 6, 2],
        [3, 2, 6],
        [3, 6, 7],
        [0, 4, 5],
        [0, 5, 1],
    ];
    TriangleMesh::new(vertices, triangles).expect("box indices reference the eight corners")
}

/// Scatter `count` agents inside a sphere, cruising at the band midpoint.
pub fn seed_agents(
    rng: &mut SmallRng,
    count: usize,
    spawn_radius: f32,
    config: &FlockConfig,
) -> Vec<AgentState> {
    let cruise = 0.5 * (config.min_speed + config.max_speed);
    (0..count)
        .map(|_| {
            let position = sample_in_sphere(rng) * spawn_radius;
            let velocity = sample_on_sphere(rng) * cruise;
            AgentState::new(position, velocity)
        })
        .collect()
}

fn sample_in_sphere(rng: &mut SmallRng) -> Vec3 {
    loop {
        let candidate = Vec3::new(
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
            rng.random_range(-1.0..1.0),
        );
        if candidate.length_squared() <= 1.0 {
            return candidate;
        }
    }
}

fn sample_on_sphere(rng: &mut SmallRng) -> Vec3 {
    loop {
        let candidate = sample_in_sphere(rng);
        let length = candidate.length();
        if length > 1e-3 {
            return candidate / length;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn box_room_closes_all_six_faces() {
        let room = box_room(10.0);
        assert_eq!(room.triangle_count(), 12);
        assert_eq!(room.vertices().len(), 8);
        assert!(
            room.vertices()
                .iter()
                .all(|vertex| vertex.abs().max_element() <= 10.0)
        );
    }

    #[test]
    fn seeded_agents_spawn_inside_the_sphere_at_cruise_speed() {
        let config = FlockConfig::default();
        let mut rng = SmallRng::seed_from_u64(7);
        let agents = seed_agents(&mut rng, 128, 6.0, &config);
        assert_eq!(agents.len(), 128);
        let cruise = 0.5 * (config.min_speed + config.max_speed);
        for agent in &agents {
            assert!(agent.position.length() <= 6.0 + 1e-4);
            assert!((agent.velocity.length() - cruise).abs() < 1e-3);
        }
    }

    #[test]
    fn obj_files_round_into_triangle_meshes() {
        let path = std::env::temp_dir().join(format!(
            "murmuration-scene-test-{}.obj",
            std::process::id()
        ));
        let contents = concat!(
            "v 0.0 0.0 0.0\n",
            "v 1.0 0.0 0.0\n",
            "v 0.0 1.0 0.0\n",
            "v 0.0 0.0 1.0\n",
            "f 1 2 3\n",
            "f 1 3 4\n",
        );
        std::fs::write(&path, contents).expect("write obj fixture");
        let mesh = load_obj_mesh(&path).expect("load obj fixture");
        std::fs::remove_file(&path).expect("remove obj fixture");
        assert_eq!(mesh.triangle_count(), 2);
        assert_eq!(mesh.vertices().len(), 4);
    }
}
