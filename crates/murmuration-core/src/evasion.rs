//! Obstacle evasion backends layered over flock steering.

use crate::TickContext;
use crate::math::{REFERENCE_FORWARD, rotate, rotation_between, steer_towards};
use glam::Vec3;
use murmuration_geom::{EPSILON, Segment, SegmentTest};

/// Velocity-deflection strategy consulted after flock steering.
///
/// Implementations are pure: they read the shared tick context and return
/// the velocity to integrate, never touching other agents.
pub trait EvasionBackend: Send + Sync {
    /// Short identifier used in logs and summaries.
    fn kind(&self) -> &'static str;

    /// Deflected velocity for an agent at `position` moving at `velocity`.
    fn deflect(&self, position: Vec3, velocity: Vec3, ctx: &TickContext<'_>) -> Vec3;
}

/// Unit heading, or `None` while the agent has no usable direction.
fn heading(velocity: Vec3) -> Option<Vec3> {
    let speed = velocity.length();
    if speed < EPSILON {
        None
    } else {
        Some(velocity / speed)
    }
}

/// Reverse course whenever the forward path is blocked.
///
/// Blunt but cheap: a single probe, and the agent keeps its speed while
/// flying back the way it came.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseProbe;

impl EvasionBackend for ReverseProbe {
    fn kind(&self) -> &'static str {
        "reverse"
    }

    fn deflect(&self, position: Vec3, velocity: Vec3, ctx: &TickContext<'_>) -> Vec3 {
        let Some(forward) = heading(velocity) else {
            return velocity;
        };
        let probe = Segment::from_ray(position, forward, ctx.config.probe_distance);
        if ctx.intersection.segment_mesh(ctx.mesh, probe).is_hit() {
            -velocity
        } else {
            velocity
        }
    }
}

/// Search the shared sample cloud for a clear heading.
///
/// Samples are tried in cloud order, which is near-forward first for clouds
/// built by [`murmuration_geom::sample_directions`]. When the nearest known
/// crossing sits inside `near_field` the agent snaps straight onto the clear
/// heading at its current speed; farther out it steers smoothly with
/// `avoid_collision_weight`. Distance-blind strategies never report a
/// near-field range, so pairing them with this backend always steers. With
/// every sample blocked the velocity passes through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectionalSampling;

impl EvasionBackend for DirectionalSampling {
    fn kind(&self) -> &'static str {
        "sampled"
    }

    fn deflect(&self, position: Vec3, velocity: Vec3, ctx: &TickContext<'_>) -> Vec3 {
        let Some(forward) = heading(velocity) else {
            return velocity;
        };
        let reach = ctx.config.probe_distance;
        let ahead = ctx
            .intersection
            .segment_mesh(ctx.mesh, Segment::from_ray(position, forward, reach));
        if !ahead.is_hit() {
            return velocity;
        }

        let near_field_sq = ctx.config.near_field * ctx.config.near_field;
        let mut nearest_sq = ahead.distance_sq();
        let into_frame = rotation_between(REFERENCE_FORWARD, forward);
        for sample in ctx.samples {
            let direction = rotate(into_frame, *sample);
            let probe = Segment::from_ray(position, direction, reach);
            match ctx.intersection.segment_mesh(ctx.mesh, probe) {
                SegmentTest::Miss => {
                    if nearest_sq.is_some_and(|distance_sq| distance_sq < near_field_sq) {
                        return direction * velocity.length();
                    }
                    let steer = steer_towards(direction, velocity, ctx.config);
                    return velocity + ctx.config.avoid_collision_weight * steer * ctx.delta_time;
                }
                SegmentTest::HitAt { distance_sq } => {
                    nearest_sq = Some(nearest_sq.map_or(distance_sq, |best| best.min(distance_sq)));
                }
                SegmentTest::Hit => {}
            }
        }
        velocity
    }
}
