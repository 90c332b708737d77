#![warn(missing_docs)]
//! Authoritative lobby host.
//!
//! The host owns the only writable copy of the world. Clients send requests;
//! the host validates them, mutates the world and tells everyone the outcome.

mod session;

pub use session::HostSession;

use glam::Vec2;
use relaysync_net::MovementParams;
use relaysync_physics::PhysicsConfig;
use relaysync_world::DEFAULT_INVENTORY_CAPACITY;
use serde::{Deserialize, Serialize};

/// Host tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// State broadcasts per second.
    pub broadcast_rate_hz: f32,
    /// Every n-th broadcast carries every entity.
    pub full_state_every: u64,
    /// Entity snapshots per state broadcast packet.
    pub max_entities_per_broadcast: usize,
    /// Where joining players appear.
    pub spawn_point: Vec2,
    /// Player cap, the host's own player included.
    pub max_players: usize,
    /// Items each player can carry.
    pub inventory_capacity: usize,
    /// Whether the host plays too.
    pub spawn_host_player: bool,
    /// Display name of the host's player.
    pub host_username: String,
    /// Movement tuning of the host's player.
    pub movement: MovementParams,
    /// Physics tuning.
    pub physics: PhysicsConfig,
    /// Seed for coin machine rolls.
    pub rng_seed: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            broadcast_rate_hz: 60.0,
            full_state_every: 60,
            max_entities_per_broadcast: 40,
            spawn_point: Vec2::new(40.0, 100.0),
            max_players: 16,
            inventory_capacity: DEFAULT_INVENTORY_CAPACITY,
            spawn_host_player: true,
            host_username: "host".to_string(),
            movement: MovementParams::default(),
            physics: PhysicsConfig {
                gravity_scale: 60.0,
                ..PhysicsConfig::default()
            },
            rng_seed: 0x00c0_1dea,
        }
    }
}
