//! Plain value records exchanged between the simulation and the network layer.

use crate::EntityId;
use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Kind of replicated object carried by an [`EntitySnapshot`].
///
/// Stored as a `u8` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ObjectKind {
    /// A participant-controlled player body.
    Player = 0,
    /// A dropped or spawned item lying in the world.
    Item = 1,
}

impl ObjectKind {
    /// Convert to the stable numeric representation.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert from the stable numeric representation.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Player),
            1 => Some(Self::Item),
            _ => None,
        }
    }
}

/// Item kinds known to the game. The tag doubles as the leading byte of
/// polymorphic item records on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum ItemKind {
    /// Currency paid out by coin machines.
    Coin = 1,
    /// Throwable explosive.
    Bomb = 2,
    /// Collectible with no use action.
    Gem = 3,
}

impl ItemKind {
    /// Every kind, in tag order.
    pub const ALL: [ItemKind; 3] = [ItemKind::Coin, ItemKind::Bomb, ItemKind::Gem];

    /// Convert to the stable numeric representation.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to convert from the stable numeric representation.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Coin),
            2 => Some(Self::Bomb),
            3 => Some(Self::Gem),
            _ => None,
        }
    }

    /// Canonical string key used in configs/logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Coin => "coin",
            Self::Bomb => "bomb",
            Self::Gem => "gem",
        }
    }
}

/// Replicated unit of truth for any movable object.
///
/// Produced on demand by the owning simulation object; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// What kind of object this describes.
    pub kind: ObjectKind,
    /// Entity identifier.
    pub id: EntityId,
    /// Top-left position in world units.
    pub position: Vec2,
    /// Velocity in world units per second.
    pub velocity: Vec2,
    /// Mass used by gravity.
    pub mass: f32,
    /// Whether the body is being simulated.
    pub awake: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_kind_tags_are_stable() {
        for kind in ItemKind::ALL {
            assert_eq!(ItemKind::from_u8(kind.as_u8()), Some(kind));
        }
        assert_eq!(ItemKind::from_u8(0), None);
        assert_eq!(ObjectKind::from_u8(1), Some(ObjectKind::Item));
        assert_eq!(ObjectKind::from_u8(9), None);
    }
}
