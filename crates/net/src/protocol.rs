//! Message catalog exchanged between host and clients over the relay.
//!
//! Every payload starts with a one-byte tag. Tags are kept below 0x20 so a
//! payload never classifies as a relay control string.

use crate::channel::{ChannelType, DeliveryClass};
use crate::wire::{WireError, WireReader, WireRecord, WireResult, WireWriter};
use glam::Vec2;
use relaysync_core::{EntityId, EntitySnapshot, ItemKind, ObjectKind, Rect};
use serde::{Deserialize, Serialize};

/// Protocol version folded into the schema hash.
pub const PROTOCOL_VERSION: u16 = 1;

/// Longest accepted username in bytes.
pub const MAX_USERNAME_LEN: usize = 32;

/// Longest accepted rejection reason in bytes.
pub const MAX_REASON_LEN: usize = 256;

/// Upper bound on any record list inside one message.
pub const MAX_RECORDS: usize = 1024;

/// Coin machine identifier.
pub type MachineId = u32;

/// Message tags.
pub mod tags {
    /// [`super::Message::JoinRequest`]
    pub const JOIN_REQUEST: u8 = 1;
    /// [`super::Message::JoinAccept`]
    pub const JOIN_ACCEPT: u8 = 2;
    /// [`super::Message::JoinReject`]
    pub const JOIN_REJECT: u8 = 3;
    /// [`super::Message::WorldInit`]
    pub const WORLD_INIT: u8 = 4;
    /// [`super::Message::StateBroadcast`]
    pub const STATE_BROADCAST: u8 = 5;
    /// [`super::Message::PlayerJoined`]
    pub const PLAYER_JOINED: u8 = 6;
    /// [`super::Message::PlayerLeft`]
    pub const PLAYER_LEFT: u8 = 7;
    /// [`super::Message::PlayerInput`]
    pub const PLAYER_INPUT: u8 = 8;
    /// [`super::Message::ItemPickupRequest`]
    pub const ITEM_PICKUP_REQUEST: u8 = 9;
    /// [`super::Message::ItemDropRequest`]
    pub const ITEM_DROP_REQUEST: u8 = 10;
    /// [`super::Message::ItemUseRequest`]
    pub const ITEM_USE_REQUEST: u8 = 11;
    /// [`super::Message::ItemPickupBroadcast`]
    pub const ITEM_PICKUP_BROADCAST: u8 = 12;
    /// [`super::Message::ItemDropBroadcast`]
    pub const ITEM_DROP_BROADCAST: u8 = 13;
    /// [`super::Message::ItemUseBroadcast`]
    pub const ITEM_USE_BROADCAST: u8 = 14;
    /// [`super::Message::CoinMachineRequest`]
    pub const COIN_MACHINE_REQUEST: u8 = 15;
    /// [`super::Message::ItemSpawnBroadcast`]
    pub const ITEM_SPAWN_BROADCAST: u8 = 16;
}

/// Which side of the session may originate a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The authoritative host.
    Host,
    /// A joined client.
    Client,
}

/// Per-player movement tuning sent with the join request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementParams {
    /// Horizontal speed at full input.
    pub speed: f32,
    /// Upward velocity applied on jump.
    pub jump_velocity: f32,
    /// Body mass.
    pub mass: f32,
}

impl Default for MovementParams {
    fn default() -> Self {
        Self {
            speed: 120.0,
            jump_velocity: 260.0,
            mass: 1.0,
        }
    }
}

/// Player identity plus current body state.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRecord {
    /// Display name.
    pub username: String,
    /// Body state.
    pub snapshot: EntitySnapshot,
}

/// A static rectangle as sent to joining clients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolidState {
    /// Rectangle bounds.
    pub rect: Rect,
    /// Whether bodies collide with it.
    pub solid: bool,
}

/// Kind-specific item payload.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ItemAttributes {
    /// Currency worth `value` coins.
    Coin {
        /// Coin value.
        value: u32,
    },
    /// Explosive with a fuse in seconds.
    Bomb {
        /// Fuse length.
        fuse: f32,
    },
    /// Collectible gem.
    Gem {
        /// Gem size.
        carat: u16,
    },
}

impl ItemAttributes {
    /// The kind these attributes belong to.
    pub fn kind(&self) -> ItemKind {
        match self {
            ItemAttributes::Coin { .. } => ItemKind::Coin,
            ItemAttributes::Bomb { .. } => ItemKind::Bomb,
            ItemAttributes::Gem { .. } => ItemKind::Gem,
        }
    }

    /// Default attributes for a kind.
    pub fn default_for(kind: ItemKind) -> Self {
        match kind {
            ItemKind::Coin => ItemAttributes::Coin { value: 1 },
            ItemKind::Bomb => ItemAttributes::Bomb { fuse: 3.0 },
            ItemKind::Gem => ItemAttributes::Gem { carat: 1 },
        }
    }
}

/// Full state of an item lying in the world.
///
/// On the wire the item kind is the leading byte so the receiver knows which
/// attribute payload follows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemState {
    /// Entity id.
    pub id: EntityId,
    /// Position.
    pub position: Vec2,
    /// Velocity.
    pub velocity: Vec2,
    /// Mass.
    pub mass: f32,
    /// Whether the body is simulated.
    pub awake: bool,
    /// Kind-specific data.
    pub attributes: ItemAttributes,
}

impl ItemState {
    /// Item kind.
    pub fn kind(&self) -> ItemKind {
        self.attributes.kind()
    }

    /// Replication snapshot of this item.
    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            kind: ObjectKind::Item,
            id: self.id,
            position: self.position,
            velocity: self.velocity,
            mass: self.mass,
            awake: self.awake,
        }
    }
}

/// A coin machine as sent to joining clients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MachineState {
    /// Machine id.
    pub id: MachineId,
    /// Machine bounds.
    pub rect: Rect,
    /// Coins paid per successful spin.
    pub payout: u32,
}

/// One frame of player input.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InputState {
    /// Monotonic per-client input sequence.
    pub sequence: u32,
    /// Horizontal axis in `[-1, 1]`.
    pub move_x: f32,
    /// Jump pressed.
    pub jump: bool,
}

/// Every message in the protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Client asks to join.
    JoinRequest {
        /// Display name.
        username: String,
        /// Client's catalog hash; must match the host's.
        schema_hash: u64,
        /// Requested movement tuning.
        movement: MovementParams,
    },
    /// Host admits the joiner.
    JoinAccept {
        /// The joiner's player entity.
        player_id: EntityId,
        /// Playable area.
        world_bounds: Rect,
        /// Every player currently in the session, including the joiner.
        players: Vec<PlayerRecord>,
        /// Static geometry.
        solids: Vec<SolidState>,
    },
    /// Host refuses the joiner.
    JoinReject {
        /// Why.
        reason: String,
    },
    /// Dynamic world state following an accept.
    WorldInit {
        /// Items lying in the world.
        items: Vec<ItemState>,
        /// Coin machines.
        machines: Vec<MachineState>,
    },
    /// Periodic entity state.
    StateBroadcast {
        /// Host broadcast tick.
        tick: u32,
        /// Whether every entity is included.
        full: bool,
        /// Entity snapshots.
        entities: Vec<EntitySnapshot>,
    },
    /// A player entered the session.
    PlayerJoined {
        /// The new player.
        player: PlayerRecord,
    },
    /// A player left the session.
    PlayerLeft {
        /// The departed player.
        player_id: EntityId,
    },
    /// Client input for its own player.
    PlayerInput(InputState),
    /// Ask to pick up a world item.
    ItemPickupRequest {
        /// Target item.
        item_id: EntityId,
    },
    /// Ask to drop an inventory item.
    ItemDropRequest {
        /// Inventory item.
        item_id: EntityId,
    },
    /// Ask to use an inventory item.
    ItemUseRequest {
        /// Inventory item.
        item_id: EntityId,
    },
    /// Authoritative pickup outcome.
    ItemPickupBroadcast {
        /// Requesting player.
        player_id: EntityId,
        /// Target item.
        item_id: EntityId,
        /// Whether the item moved into the inventory.
        success: bool,
    },
    /// An item was dropped back into the world.
    ItemDropBroadcast {
        /// Dropping player.
        player_id: EntityId,
        /// The item as it now lies in the world.
        item: ItemState,
    },
    /// An item was used.
    ItemUseBroadcast {
        /// Using player.
        player_id: EntityId,
        /// Used item.
        item_id: EntityId,
        /// Item kind.
        kind: ItemKind,
        /// Whether the item left the inventory.
        consumed: bool,
    },
    /// Ask a coin machine for a spin.
    CoinMachineRequest {
        /// Target machine.
        machine_id: MachineId,
        /// Monotonic per-session request id.
        request_id: u32,
    },
    /// New items spawned by a machine.
    ItemSpawnBroadcast {
        /// Source machine.
        machine_id: MachineId,
        /// Spawned items.
        items: Vec<ItemState>,
    },
}

impl Message {
    /// Leading tag byte.
    pub fn tag(&self) -> u8 {
        match self {
            Message::JoinRequest { .. } => tags::JOIN_REQUEST,
            Message::JoinAccept { .. } => tags::JOIN_ACCEPT,
            Message::JoinReject { .. } => tags::JOIN_REJECT,
            Message::WorldInit { .. } => tags::WORLD_INIT,
            Message::StateBroadcast { .. } => tags::STATE_BROADCAST,
            Message::PlayerJoined { .. } => tags::PLAYER_JOINED,
            Message::PlayerLeft { .. } => tags::PLAYER_LEFT,
            Message::PlayerInput(_) => tags::PLAYER_INPUT,
            Message::ItemPickupRequest { .. } => tags::ITEM_PICKUP_REQUEST,
            Message::ItemDropRequest { .. } => tags::ITEM_DROP_REQUEST,
            Message::ItemUseRequest { .. } => tags::ITEM_USE_REQUEST,
            Message::ItemPickupBroadcast { .. } => tags::ITEM_PICKUP_BROADCAST,
            Message::ItemDropBroadcast { .. } => tags::ITEM_DROP_BROADCAST,
            Message::ItemUseBroadcast { .. } => tags::ITEM_USE_BROADCAST,
            Message::CoinMachineRequest { .. } => tags::COIN_MACHINE_REQUEST,
            Message::ItemSpawnBroadcast { .. } => tags::ITEM_SPAWN_BROADCAST,
        }
    }

    /// Which role may send this message.
    pub fn origin(&self) -> Role {
        match self {
            Message::JoinRequest { .. }
            | Message::PlayerInput(_)
            | Message::ItemPickupRequest { .. }
            | Message::ItemDropRequest { .. }
            | Message::ItemUseRequest { .. }
            | Message::CoinMachineRequest { .. } => Role::Client,
            _ => Role::Host,
        }
    }

    /// Logical channel the message travels on.
    pub fn channel(&self) -> ChannelType {
        match self {
            Message::JoinRequest { .. }
            | Message::JoinAccept { .. }
            | Message::JoinReject { .. }
            | Message::WorldInit { .. }
            | Message::PlayerJoined { .. }
            | Message::PlayerLeft { .. } => ChannelType::Session,
            Message::StateBroadcast { .. } => ChannelType::State,
            Message::PlayerInput(_) => ChannelType::Input,
            _ => ChannelType::Items,
        }
    }

    /// Delivery class implied by the channel.
    pub fn delivery(&self) -> DeliveryClass {
        self.channel().delivery()
    }

    /// Check protocol limits that the wire format alone cannot express.
    pub fn verify(&self) -> WireResult<()> {
        match self {
            Message::JoinRequest {
                username, movement, ..
            } => {
                if username.is_empty() {
                    return Err(WireError::Invalid("empty username"));
                }
                check_len("username", username.len(), MAX_USERNAME_LEN)?;
                if !(movement.speed.is_finite()
                    && movement.jump_velocity.is_finite()
                    && movement.mass.is_finite()
                    && movement.mass > 0.0)
                {
                    return Err(WireError::Invalid("movement parameters out of range"));
                }
            }
            Message::JoinAccept {
                players, solids, ..
            } => {
                check_len("players", players.len(), MAX_RECORDS)?;
                check_len("solids", solids.len(), MAX_RECORDS)?;
            }
            Message::JoinReject { reason } => {
                check_len("reason", reason.len(), MAX_REASON_LEN)?;
            }
            Message::WorldInit { items, machines } => {
                check_len("items", items.len(), MAX_RECORDS)?;
                check_len("machines", machines.len(), MAX_RECORDS)?;
            }
            Message::StateBroadcast { entities, .. } => {
                check_len("entities", entities.len(), MAX_RECORDS)?;
                if entities
                    .iter()
                    .any(|e| !(e.position.is_finite() && e.velocity.is_finite()))
                {
                    return Err(WireError::Invalid("non-finite entity state"));
                }
            }
            Message::PlayerJoined { player } => {
                check_len("username", player.username.len(), MAX_USERNAME_LEN)?;
            }
            Message::PlayerInput(input) => {
                if !input.move_x.is_finite() || input.move_x.abs() > 1.0 {
                    return Err(WireError::Invalid("move_x out of range"));
                }
            }
            Message::ItemSpawnBroadcast { items, .. } => {
                check_len("items", items.len(), MAX_RECORDS)?;
            }
            _ => {}
        }
        Ok(())
    }
}

fn check_len(what: &'static str, len: usize, max: usize) -> WireResult<()> {
    if len > max {
        return Err(WireError::TooLong { what, len, max });
    }
    Ok(())
}

impl WireRecord for EntitySnapshot {
    fn write(&self, w: &mut WireWriter) -> WireResult<()> {
        w.put_u8(self.kind.as_u8());
        w.put_entity(self.id);
        w.put_vec2(self.position);
        w.put_vec2(self.velocity);
        w.put_f32(self.mass);
        w.put_bool(self.awake);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> WireResult<Self> {
        let raw = r.u8()?;
        let kind = ObjectKind::from_u8(raw).ok_or(WireError::InvalidDiscriminant {
            what: "object kind",
            value: raw,
        })?;
        Ok(Self {
            kind,
            id: r.entity()?,
            position: r.vec2()?,
            velocity: r.vec2()?,
            mass: r.f32()?,
            awake: r.bool()?,
        })
    }
}

impl WireRecord for PlayerRecord {
    fn write(&self, w: &mut WireWriter) -> WireResult<()> {
        w.put_str(&self.username)?;
        self.snapshot.write(w)
    }

    fn read(r: &mut WireReader<'_>) -> WireResult<Self> {
        Ok(Self {
            username: r.string()?,
            snapshot: EntitySnapshot::read(r)?,
        })
    }
}

impl WireRecord for SolidState {
    fn write(&self, w: &mut WireWriter) -> WireResult<()> {
        w.put_rect(&self.rect);
        w.put_bool(self.solid);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> WireResult<Self> {
        Ok(Self {
            rect: r.rect()?,
            solid: r.bool()?,
        })
    }
}

impl WireRecord for ItemState {
    fn write(&self, w: &mut WireWriter) -> WireResult<()> {
        w.put_u8(self.kind().as_u8());
        w.put_entity(self.id);
        w.put_vec2(self.position);
        w.put_vec2(self.velocity);
        w.put_f32(self.mass);
        w.put_bool(self.awake);
        match self.attributes {
            ItemAttributes::Coin { value } => w.put_u32(value),
            ItemAttributes::Bomb { fuse } => w.put_f32(fuse),
            ItemAttributes::Gem { carat } => w.put_u16(carat),
        }
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> WireResult<Self> {
        let kind = read_item_kind(r)?;
        let id = r.entity()?;
        let position = r.vec2()?;
        let velocity = r.vec2()?;
        let mass = r.f32()?;
        let awake = r.bool()?;
        let attributes = match kind {
            ItemKind::Coin => ItemAttributes::Coin { value: r.u32()? },
            ItemKind::Bomb => ItemAttributes::Bomb { fuse: r.f32()? },
            ItemKind::Gem => ItemAttributes::Gem { carat: r.u16()? },
        };
        Ok(Self {
            id,
            position,
            velocity,
            mass,
            awake,
            attributes,
        })
    }
}

impl WireRecord for MachineState {
    fn write(&self, w: &mut WireWriter) -> WireResult<()> {
        w.put_u32(self.id);
        w.put_rect(&self.rect);
        w.put_u32(self.payout);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> WireResult<Self> {
        Ok(Self {
            id: r.u32()?,
            rect: r.rect()?,
            payout: r.u32()?,
        })
    }
}

impl WireRecord for MovementParams {
    fn write(&self, w: &mut WireWriter) -> WireResult<()> {
        w.put_f32(self.speed);
        w.put_f32(self.jump_velocity);
        w.put_f32(self.mass);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> WireResult<Self> {
        Ok(Self {
            speed: r.f32()?,
            jump_velocity: r.f32()?,
            mass: r.f32()?,
        })
    }
}

impl WireRecord for InputState {
    fn write(&self, w: &mut WireWriter) -> WireResult<()> {
        w.put_u32(self.sequence);
        w.put_f32(self.move_x);
        w.put_bool(self.jump);
        Ok(())
    }

    fn read(r: &mut WireReader<'_>) -> WireResult<Self> {
        Ok(Self {
            sequence: r.u32()?,
            move_x: r.f32()?,
            jump: r.bool()?,
        })
    }
}

/// Read an [`ItemKind`] discriminant byte.
pub(crate) fn read_item_kind(r: &mut WireReader<'_>) -> WireResult<ItemKind> {
    let raw = r.u8()?;
    ItemKind::from_u8(raw).ok_or(WireError::InvalidDiscriminant {
        what: "item kind",
        value: raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_stay_below_printable_range() {
        for tag in tags::JOIN_REQUEST..=tags::ITEM_SPAWN_BROADCAST {
            assert!(tag < 0x20);
        }
    }

    #[test]
    fn test_origin_and_channel() {
        let input = Message::PlayerInput(InputState::default());
        assert_eq!(input.origin(), Role::Client);
        assert_eq!(input.channel(), ChannelType::Input);
        assert_eq!(input.delivery(), DeliveryClass::Unreliable);

        let state = Message::StateBroadcast {
            tick: 1,
            full: false,
            entities: vec![],
        };
        assert_eq!(state.origin(), Role::Host);
        assert_eq!(state.delivery(), DeliveryClass::Unreliable);

        let pickup = Message::ItemPickupRequest {
            item_id: EntityId(3),
        };
        assert_eq!(pickup.origin(), Role::Client);
        assert_eq!(pickup.delivery(), DeliveryClass::ReliableOrdered);
    }

    #[test]
    fn test_verify_rejects_long_username() {
        let msg = Message::JoinRequest {
            username: "x".repeat(MAX_USERNAME_LEN + 1),
            schema_hash: 0,
            movement: MovementParams::default(),
        };
        assert!(matches!(msg.verify(), Err(WireError::TooLong { .. })));
    }

    #[test]
    fn test_verify_rejects_out_of_range_input() {
        let msg = Message::PlayerInput(InputState {
            sequence: 1,
            move_x: 3.0,
            jump: false,
        });
        assert!(msg.verify().is_err());
    }

    #[test]
    fn test_item_state_carries_kind_payload() {
        let item = ItemState {
            id: EntityId(9),
            position: Vec2::new(1.0, 2.0),
            velocity: Vec2::ZERO,
            mass: 0.5,
            awake: true,
            attributes: ItemAttributes::Gem { carat: 12 },
        };
        let mut w = WireWriter::new();
        item.write(&mut w).unwrap();
        let bytes = w.finish();

        assert_eq!(bytes[0], ItemKind::Gem.as_u8());
        let mut r = WireReader::new(&bytes);
        assert_eq!(ItemState::read(&mut r).unwrap(), item);
        r.finish().unwrap();
    }
}
