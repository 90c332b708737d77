#![warn(missing_docs)]
//! Deterministic 2D physics and collision against static rectangles.
//!
//! The step function is pure: given the area bounds, the solid rectangles and
//! one body's state it returns the body's next state. Host and clients run the
//! same code, so a shadow body predicted locally stays close to the host's
//! authoritative body between updates.

mod collision;

pub use collision::{apply_bounce, is_grounded, step};

use glam::Vec2;
use relaysync_core::Rect;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Tunables for the physics step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Gravitational constant before world scaling.
    pub gravity: f32,
    /// World-specific multiplier applied to `gravity` (pixels per metre, etc.).
    pub gravity_scale: f32,
    /// Height of the probe rectangle used for the grounded check.
    pub probe_depth: f32,
    /// Fraction of speed kept after a bounce.
    pub elasticity: f32,
    /// Speeds below this after a bounce count as resting.
    pub rest_speed: f32,
    /// Binary search refinement steps per blocked axis.
    pub search_iterations: u32,
    /// Body count above which [`step_bodies_parallel`] fans out to threads.
    pub parallel_threshold: usize,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: 9.8,
            gravity_scale: 1.0,
            probe_depth: 1.0,
            elasticity: 0.5,
            rest_speed: 2.0,
            search_iterations: 16,
            parallel_threshold: 64,
        }
    }
}

impl PhysicsConfig {
    /// Gravity after world scaling.
    pub fn effective_gravity(&self) -> f32 {
        self.gravity * self.gravity_scale
    }
}

/// Collision box relative to a body's position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hitbox {
    /// Offset of the box's top-left corner from the body position.
    pub offset: Vec2,
    /// Box size.
    pub size: Vec2,
}

impl Hitbox {
    /// Hitbox whose top-left corner sits exactly at the body position.
    pub fn sized(width: f32, height: f32) -> Self {
        Self {
            offset: Vec2::ZERO,
            size: Vec2::new(width, height),
        }
    }

    /// World-space rectangle for a body at `position`.
    pub fn at(&self, position: Vec2) -> Rect {
        Rect::from_pos_size(position + self.offset, self.size)
    }
}

/// Everything the step function needs to know about one body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyState {
    /// Body position.
    pub position: Vec2,
    /// Velocity in units per second.
    pub velocity: Vec2,
    /// Collision box.
    pub hitbox: Hitbox,
    /// Mass; gravity acceleration is proportional to it.
    pub mass: f32,
}

/// Result of one physics step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutcome {
    /// Resolved position.
    pub position: Vec2,
    /// Velocity after gravity and collision response.
    pub velocity: Vec2,
    /// Whether the body stood on the floor or a solid at the start of the step.
    pub is_grounded: bool,
    /// Whether the body came to a stop on a surface while moving down this step.
    pub landed: bool,
    /// Vertical speed at the moment of landing (zero if it did not land).
    pub impact_speed: f32,
    /// Horizontal movement was truncated.
    pub horizontal_blocked: bool,
    /// Vertical movement was truncated.
    pub vertical_blocked: bool,
}

/// Read-only world view for a tick: bounds plus static solids.
#[derive(Debug, Clone, Copy)]
pub struct PhysicsWorld<'a> {
    /// Playable area; bodies never leave it.
    pub area: Rect,
    /// Solid rectangles. Never mutated by the physics step.
    pub solids: &'a [Rect],
    /// Step configuration.
    pub config: &'a PhysicsConfig,
}

impl<'a> PhysicsWorld<'a> {
    /// Bundle the per-tick inputs.
    pub fn new(area: Rect, solids: &'a [Rect], config: &'a PhysicsConfig) -> Self {
        Self {
            area,
            solids,
            config,
        }
    }

    /// Whether `rect` overlaps any solid.
    pub fn overlaps_any(&self, rect: &Rect) -> bool {
        self.solids.iter().any(|solid| solid.overlaps(rect))
    }
}

/// A simulated object that can be advanced by the physics step.
pub trait PhysicsBody {
    /// Current physical state.
    fn body_state(&self) -> BodyState;

    /// Write back the result of a step.
    fn apply_outcome(&mut self, outcome: StepOutcome, config: &PhysicsConfig);

    /// Sleeping bodies are skipped.
    fn is_simulated(&self) -> bool {
        true
    }
}

/// Advance one body.
pub fn step_body<B: PhysicsBody + ?Sized>(world: &PhysicsWorld<'_>, body: &mut B, dt: f32) {
    if !body.is_simulated() {
        return;
    }
    let outcome = step(world, &body.body_state(), dt);
    body.apply_outcome(outcome, world.config);
}

/// Advance every body on the calling thread.
pub fn step_bodies<B: PhysicsBody>(world: &PhysicsWorld<'_>, bodies: &mut [&mut B], dt: f32) {
    for body in bodies.iter_mut() {
        step_body(world, &mut **body, dt);
    }
}

/// Advance every body, splitting the set across scoped threads once it is
/// larger than `config.parallel_threshold`.
///
/// Bodies are independent given the immutable solids list, and each one is
/// only written through its own exclusive reference.
pub fn step_bodies_parallel<B: PhysicsBody + Send>(
    world: &PhysicsWorld<'_>,
    bodies: &mut [&mut B],
    dt: f32,
) {
    if bodies.len() <= world.config.parallel_threshold {
        step_bodies(world, bodies, dt);
        return;
    }

    let threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(1);
    let chunk_size = bodies.len().div_ceil(threads).max(1);
    trace!(
        "Stepping {} bodies on {} threads (chunk {})",
        bodies.len(),
        threads,
        chunk_size
    );

    std::thread::scope(|scope| {
        for chunk in bodies.chunks_mut(chunk_size) {
            scope.spawn(move || step_bodies(world, chunk, dt));
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Crate {
        state: BodyState,
        steps: u32,
    }

    impl PhysicsBody for Crate {
        fn body_state(&self) -> BodyState {
            self.state
        }

        fn apply_outcome(&mut self, outcome: StepOutcome, _config: &PhysicsConfig) {
            self.state.position = outcome.position;
            self.state.velocity = outcome.velocity;
            self.steps += 1;
        }
    }

    fn falling_crate(x: f32) -> Crate {
        Crate {
            state: BodyState {
                position: Vec2::new(x, 0.0),
                velocity: Vec2::ZERO,
                hitbox: Hitbox::sized(4.0, 4.0),
                mass: 1.0,
            },
            steps: 0,
        }
    }

    #[test]
    fn parallel_matches_serial() {
        let config = PhysicsConfig {
            parallel_threshold: 4,
            ..PhysicsConfig::default()
        };
        let solids = [Rect::new(0.0, 50.0, 1000.0, 10.0)];
        let world = PhysicsWorld::new(Rect::new(0.0, 0.0, 1000.0, 100.0), &solids, &config);

        let mut serial: Vec<Crate> = (0..32).map(|i| falling_crate(i as f32 * 8.0)).collect();
        let mut parallel: Vec<Crate> = (0..32).map(|i| falling_crate(i as f32 * 8.0)).collect();

        for _ in 0..10 {
            let mut refs: Vec<&mut Crate> = serial.iter_mut().collect();
            step_bodies(&world, &mut refs, 0.1);
            let mut refs: Vec<&mut Crate> = parallel.iter_mut().collect();
            step_bodies_parallel(&world, &mut refs, 0.1);
        }

        for (a, b) in serial.iter().zip(parallel.iter()) {
            assert_eq!(a.state, b.state);
            assert_eq!(b.steps, 10);
        }
    }

    #[test]
    fn effective_gravity_applies_scale() {
        let config = PhysicsConfig {
            gravity_scale: 10.0,
            ..PhysicsConfig::default()
        };
        assert!((config.effective_gravity() - 98.0).abs() < 1e-4);
    }
}
