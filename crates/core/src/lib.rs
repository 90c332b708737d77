#![warn(missing_docs)]
//! Core primitives shared across the workspace.

pub mod events;
pub mod geometry;
pub mod properties;
pub mod snapshot;

use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export commonly used types
pub use events::{EventBus, GameEvent};
pub use geometry::Rect;
pub use glam::Vec2;
pub use properties::{PropertySource, PropertyTable, PropertyValue};
pub use snapshot::{EntitySnapshot, ItemKind, ObjectKind};

/// Fixed simulation tick counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTick(pub u64);

impl SimTick {
    /// First tick in any timeline.
    pub const ZERO: Self = Self(0);

    /// Advance by `delta` ticks.
    pub fn advance(self, delta: u64) -> Self {
        Self(self.0 + delta)
    }
}

/// Identifier of a replicated entity (players and dropped items share one id space).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Relay-level participant identifier.
///
/// The host is always [`PeerId::HOST`]; clients receive ids from the relay
/// starting at 1. [`PeerId::BROADCAST`] is only valid as a send target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl PeerId {
    /// The lobby host.
    pub const HOST: Self = Self(0);
    /// Every client in the lobby.
    pub const BROADCAST: Self = Self(u32::MAX);

    /// Whether this id names the host.
    pub fn is_host(self) -> bool {
        self == Self::HOST
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::HOST => write!(f, "host"),
            Self::BROADCAST => write!(f, "broadcast"),
            Self(id) => write!(f, "peer-{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_advances() {
        assert_eq!(SimTick::ZERO.advance(3), SimTick(3));
    }

    #[test]
    fn peer_display_names_special_ids() {
        assert_eq!(PeerId::HOST.to_string(), "host");
        assert_eq!(PeerId::BROADCAST.to_string(), "broadcast");
        assert_eq!(PeerId(7).to_string(), "peer-7");
        assert!(PeerId::HOST.is_host());
    }
}
