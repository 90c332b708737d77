//! Axis-separated collision resolution.

use crate::{BodyState, Hitbox, PhysicsConfig, PhysicsWorld, StepOutcome};
use glam::Vec2;
use relaysync_core::Rect;

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
}

impl Axis {
    fn offset(self, distance: f32) -> Vec2 {
        match self {
            Axis::X => Vec2::new(distance, 0.0),
            Axis::Y => Vec2::new(0.0, distance),
        }
    }
}

/// Whether a hitbox rectangle rests on the world floor or on a solid.
///
/// A solid counts when it overlaps a thin probe directly beneath the hitbox.
pub fn is_grounded(world: &PhysicsWorld<'_>, rect: &Rect) -> bool {
    if rect.bottom() >= world.area.bottom() {
        return true;
    }
    let probe = Rect::new(rect.x, rect.bottom(), rect.w, world.config.probe_depth);
    world.overlaps_any(&probe)
}

/// Advance a single body by `dt` seconds.
///
/// 1. grounded check, 2. gravity when airborne, 3. attempted displacement,
/// 4. diagonal fast path or X-then-Y resolution, 5. velocity response,
/// 6. clamp to the world bounds.
pub fn step(world: &PhysicsWorld<'_>, body: &BodyState, dt: f32) -> StepOutcome {
    let hitbox = body.hitbox;
    let start = body.position;
    let mut velocity = body.velocity;

    let is_grounded = is_grounded(world, &hitbox.at(start));
    if !is_grounded {
        velocity.y += world.config.effective_gravity() * body.mass * dt;
    }

    let attempted = velocity * dt;
    let mut position = start + attempted;
    let mut horizontal_blocked = false;
    let mut vertical_blocked = false;
    let mut landed = false;
    let mut impact_speed = 0.0;

    if world.overlaps_any(&hitbox.at(position)) {
        let (dx, x_blocked) = max_free_distance(world, &hitbox, start, Axis::X, attempted.x);
        let after_x = Vec2::new(start.x + dx, start.y);
        let (dy, y_blocked) = max_free_distance(world, &hitbox, after_x, Axis::Y, attempted.y);
        position = Vec2::new(after_x.x, after_x.y + dy);
        horizontal_blocked = x_blocked;
        vertical_blocked = y_blocked;

        if vertical_blocked && attempted.y > 0.0 {
            if let Some(top) = obstruction_top(world, &hitbox, position, attempted.y - dy) {
                let snapped = Vec2::new(position.x, top - hitbox.offset.y - hitbox.size.y);
                if !world.overlaps_any(&hitbox.at(snapped)) {
                    position = snapped;
                }
            }
        }
    }

    if horizontal_blocked {
        velocity.x = 0.0;
    }
    if vertical_blocked {
        if velocity.y > 0.0 {
            landed = true;
            impact_speed = velocity.y;
        }
        velocity.y = 0.0;
    }

    let clamp = clamp_to_area(world.area, &hitbox, position);
    position = clamp.position;
    if clamp.x_clamped && velocity.x != 0.0 {
        horizontal_blocked = true;
        velocity.x = 0.0;
    }
    if clamp.hit_floor && velocity.y > 0.0 {
        vertical_blocked = true;
        landed = true;
        impact_speed = velocity.y;
        velocity.y = 0.0;
    } else if clamp.hit_ceiling && velocity.y < 0.0 {
        vertical_blocked = true;
        velocity.y = 0.0;
    }

    StepOutcome {
        position,
        velocity,
        is_grounded,
        landed,
        impact_speed,
        horizontal_blocked,
        vertical_blocked,
    }
}

/// Elastic response for bouncy bodies, applied by the caller after [`step`].
///
/// When the body is on the ground while still moving down (or landed during
/// the step), vertical velocity is reflected and both components are damped by
/// the elasticity coefficient. Returns whether a bounce happened.
pub fn apply_bounce(outcome: &mut StepOutcome, config: &PhysicsConfig) -> bool {
    let incoming = if outcome.landed {
        outcome.impact_speed
    } else if outcome.is_grounded && outcome.velocity.y > 0.0 {
        outcome.velocity.y
    } else {
        return false;
    };

    let mut reflected = -incoming * config.elasticity;
    if reflected.abs() < config.rest_speed {
        reflected = 0.0;
    }
    outcome.velocity.y = reflected;
    outcome.velocity.x *= config.elasticity;
    if outcome.velocity.x.abs() < config.rest_speed {
        outcome.velocity.x = 0.0;
    }
    true
}

/// Largest displacement along `axis`, between zero and `distance`, that keeps
/// the hitbox clear of every solid. The flag reports truncation.
fn max_free_distance(
    world: &PhysicsWorld<'_>,
    hitbox: &Hitbox,
    origin: Vec2,
    axis: Axis,
    distance: f32,
) -> (f32, bool) {
    if distance == 0.0 {
        return (0.0, false);
    }
    if !world.overlaps_any(&hitbox.at(origin + axis.offset(distance))) {
        return (distance, false);
    }

    let sign = distance.signum();
    let mut free = 0.0_f32;
    let mut blocked = distance.abs();
    for _ in 0..world.config.search_iterations {
        let mid = (free + blocked) * 0.5;
        if world.overlaps_any(&hitbox.at(origin + axis.offset(sign * mid))) {
            blocked = mid;
        } else {
            free = mid;
        }
    }
    (sign * free, true)
}

/// Top edge of the highest solid directly below the hitbox within `reach`.
fn obstruction_top(
    world: &PhysicsWorld<'_>,
    hitbox: &Hitbox,
    position: Vec2,
    reach: f32,
) -> Option<f32> {
    let rect = hitbox.at(position);
    let sweep = Rect::new(rect.x, rect.bottom(), rect.w, reach.max(f32::EPSILON));
    world
        .solids
        .iter()
        .filter(|solid| solid.overlaps(&sweep) && solid.top() >= rect.bottom() - 1e-3)
        .map(|solid| solid.top())
        .min_by(|a, b| a.total_cmp(b))
}

struct Clamp {
    position: Vec2,
    x_clamped: bool,
    hit_floor: bool,
    hit_ceiling: bool,
}

fn clamp_to_area(area: Rect, hitbox: &Hitbox, position: Vec2) -> Clamp {
    let min_x = area.left() - hitbox.offset.x;
    let max_x = (area.right() - hitbox.offset.x - hitbox.size.x).max(min_x);
    let min_y = area.top() - hitbox.offset.y;
    let max_y = (area.bottom() - hitbox.offset.y - hitbox.size.y).max(min_y);

    let x = position.x.clamp(min_x, max_x);
    let y = position.y.clamp(min_y, max_y);

    Clamp {
        position: Vec2::new(x, y),
        x_clamped: x != position.x,
        hit_floor: position.y >= max_y,
        hit_ceiling: position.y < min_y,
    }
}
