//! Small, deterministic arenas for tests.

use glam::Vec2;
use relaysync_core::{PeerId, Rect};
use relaysync_net::MovementParams;
use relaysync_physics::PhysicsConfig;
use relaysync_world::{ArenaLayout, StaticGeometry, World, PLAYER_HEIGHT};

/// Test arena width.
pub const ARENA_WIDTH: f32 = 400.0;
/// Test arena height.
pub const ARENA_HEIGHT: f32 = 300.0;
/// Top edge of the test arena's floor slab.
pub const ARENA_FLOOR_Y: f32 = 280.0;
/// The raised platform in the test arena.
pub const ARENA_PLATFORM: Rect = Rect::new(150.0, 200.0, 100.0, 10.0);

/// 400x300 arena with a 20-unit floor slab and one platform.
pub fn test_layout() -> ArenaLayout {
    ArenaLayout::new(ARENA_WIDTH, ARENA_HEIGHT)
        .with_floor(ARENA_HEIGHT - ARENA_FLOOR_Y)
        .with_platform(ARENA_PLATFORM)
}

/// Geometry of [`test_layout`].
pub fn test_arena() -> StaticGeometry {
    test_layout().build()
}

/// Empty world over [`test_arena`].
pub fn test_world() -> World {
    World::from_geometry(&test_arena())
}

/// Physics scaled so bodies fall a few hundred units per second.
pub fn test_physics() -> PhysicsConfig {
    PhysicsConfig {
        gravity_scale: 60.0,
        ..PhysicsConfig::default()
    }
}

/// Y coordinate of a player standing on the arena floor.
pub fn standing_y() -> f32 {
    ARENA_FLOOR_Y - PLAYER_HEIGHT
}

/// Spawn `count` players standing on the floor, spaced apart.
pub fn populate_players(world: &mut World, count: u32) {
    for i in 0..count {
        world.spawn_player(
            PeerId(i + 1),
            &format!("bot{}", i + 1),
            Vec2::new(20.0 + i as f32 * 30.0, standing_y()),
            MovementParams::default(),
            8,
        );
    }
}
