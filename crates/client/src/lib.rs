#![warn(missing_docs)]
//! Joined-client side of a lobby.
//!
//! The client mirrors the host's world as shadows: remote bodies ease toward
//! the newest broadcast state, the local player is predicted and snapped back
//! when the host disagrees by too much. Every gameplay change is a request;
//! the client only applies what the host broadcasts.

mod session;

pub use session::{ClientSession, ClientState};

use relaysync_net::{InterpolationConfig, MovementParams};
use relaysync_physics::PhysicsConfig;
use serde::{Deserialize, Serialize};

/// Client tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Shadow buffering and smoothing.
    pub interpolation: InterpolationConfig,
    /// Physics used to predict the local player. Must match the host's.
    pub physics: PhysicsConfig,
    /// Distance at which the predicted local player snaps to the host state.
    pub snap_tolerance: f32,
    /// Movement tuning requested on join.
    pub movement: MovementParams,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interpolation: InterpolationConfig::default(),
            physics: PhysicsConfig {
                gravity_scale: 60.0,
                ..PhysicsConfig::default()
            },
            snap_tolerance: 12.0,
            movement: MovementParams::default(),
        }
    }
}
