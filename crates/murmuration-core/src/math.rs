//! Steering-force and quaternion helpers shared by the flocking kernel.

use crate::FlockConfig;
use glam::{Quat, Vec3};
use murmuration_geom::EPSILON;

/// Model-space forward axis; sample clouds and orientations are built on it.
pub const REFERENCE_FORWARD: Vec3 = Vec3::X;

/// Steering force toward `target`, capped at the configured maximum.
///
/// Near-zero targets and already-satisfied headings produce no force, so
/// callers can feed raw accumulators without pre-checking them.
#[must_use]
pub fn steer_towards(target: Vec3, velocity: Vec3, config: &FlockConfig) -> Vec3 {
    if target.length() < EPSILON {
        return Vec3::ZERO;
    }
    let desired = target.normalize() * config.max_speed;
    let delta = desired - velocity;
    if delta.length() < EPSILON {
        return Vec3::ZERO;
    }
    delta.clamp_length_max(config.max_steer_force)
}

/// Shortest-arc rotation carrying `from` onto `to`.
///
/// Near-zero inputs yield the identity. Near anti-parallel inputs take a
/// half-turn about an axis orthogonal to `from`, picked by comparing
/// components so the construction never degenerates.
#[must_use]
pub fn rotation_between(from: Vec3, to: Vec3) -> Quat {
    if from.length() < EPSILON || to.length() < EPSILON {
        return Quat::IDENTITY;
    }
    let from = from.normalize();
    let to = to.normalize();
    let alignment = from.dot(to);
    if alignment < EPSILON - 1.0 {
        let axis = orthogonal_to(from);
        return Quat::from_xyzw(axis.x, axis.y, axis.z, 0.0);
    }
    let axis = from.cross(to);
    Quat::from_xyzw(axis.x, axis.y, axis.z, 1.0 + alignment).normalize()
}

/// Rotate `vector` by `rotation` using the expanded two-cross form.
#[must_use]
pub fn rotate(rotation: Quat, vector: Vec3) -> Vec3 {
    let axis = Vec3::new(rotation.x, rotation.y, rotation.z);
    let doubled = 2.0 * axis.cross(vector);
    vector + rotation.w * doubled + axis.cross(doubled)
}

/// Unit vector orthogonal to `unit`, valid for any non-zero input.
fn orthogonal_to(unit: Vec3) -> Vec3 {
    if unit.x.abs() > unit.z.abs() {
        Vec3::new(-unit.y, unit.x, 0.0).normalize()
    } else {
        Vec3::new(0.0, -unit.z, unit.y).normalize()
    }
}
