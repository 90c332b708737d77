//! Message encoding and tag-dispatched decoding.
//!
//! Payload format: `[tag: u8][fields...]`. Decoding looks the tag up in a
//! [`MessageRegistry`], runs the registered decoder, rejects trailing bytes
//! and finally checks protocol limits with [`Message::verify`].

use crate::protocol::{
    tags, InputState, ItemState, MachineState, Message, MovementParams, PlayerRecord,
    SolidState, PROTOCOL_VERSION,
};
use crate::wire::{WireError, WireReader, WireRecord, WireResult, WireWriter};
use bytes::Bytes;
use std::collections::BTreeMap;

/// Decoder for one message body (the tag has already been consumed).
pub type DecodeFn = fn(&mut WireReader<'_>) -> WireResult<Message>;

#[derive(Clone, Copy)]
struct Registration {
    name: &'static str,
    decode: DecodeFn,
}

/// Tag to decoder dispatch table.
#[derive(Clone, Default)]
pub struct MessageRegistry {
    entries: BTreeMap<u8, Registration>,
}

impl std::fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(tag, r)| (tag, r.name)))
            .finish()
    }
}

impl MessageRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the whole message catalog.
    pub fn catalog() -> Self {
        let mut registry = Self::new();
        registry.register(tags::JOIN_REQUEST, "JoinRequest", decode_join_request);
        registry.register(tags::JOIN_ACCEPT, "JoinAccept", decode_join_accept);
        registry.register(tags::JOIN_REJECT, "JoinReject", decode_join_reject);
        registry.register(tags::WORLD_INIT, "WorldInit", decode_world_init);
        registry.register(tags::STATE_BROADCAST, "StateBroadcast", decode_state_broadcast);
        registry.register(tags::PLAYER_JOINED, "PlayerJoined", decode_player_joined);
        registry.register(tags::PLAYER_LEFT, "PlayerLeft", decode_player_left);
        registry.register(tags::PLAYER_INPUT, "PlayerInput", decode_player_input);
        registry.register(
            tags::ITEM_PICKUP_REQUEST,
            "ItemPickupRequest",
            decode_pickup_request,
        );
        registry.register(tags::ITEM_DROP_REQUEST, "ItemDropRequest", decode_drop_request);
        registry.register(tags::ITEM_USE_REQUEST, "ItemUseRequest", decode_use_request);
        registry.register(
            tags::ITEM_PICKUP_BROADCAST,
            "ItemPickupBroadcast",
            decode_pickup_broadcast,
        );
        registry.register(
            tags::ITEM_DROP_BROADCAST,
            "ItemDropBroadcast",
            decode_drop_broadcast,
        );
        registry.register(tags::ITEM_USE_BROADCAST, "ItemUseBroadcast", decode_use_broadcast);
        registry.register(
            tags::COIN_MACHINE_REQUEST,
            "CoinMachineRequest",
            decode_coin_machine_request,
        );
        registry.register(
            tags::ITEM_SPAWN_BROADCAST,
            "ItemSpawnBroadcast",
            decode_spawn_broadcast,
        );
        registry
    }

    /// Register (or replace) the decoder for `tag`.
    pub fn register(&mut self, tag: u8, name: &'static str, decode: DecodeFn) {
        self.entries.insert(tag, Registration { name, decode });
    }

    /// Whether `tag` has a decoder.
    pub fn contains(&self, tag: u8) -> bool {
        self.entries.contains_key(&tag)
    }

    /// Registered name for `tag`.
    pub fn name(&self, tag: u8) -> Option<&'static str> {
        self.entries.get(&tag).map(|r| r.name)
    }

    /// Number of registered messages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Decode one payload.
    pub fn decode(&self, payload: &[u8]) -> WireResult<Message> {
        let (&tag, body) = payload.split_first().ok_or(WireError::Empty)?;
        let registration = self.entries.get(&tag).ok_or(WireError::UnknownTag(tag))?;
        let mut reader = WireReader::new(body);
        let message = (registration.decode)(&mut reader)?;
        reader.finish()?;
        message.verify()?;
        Ok(message)
    }

    /// Hash of the protocol version and every registered `(tag, name)` pair.
    ///
    /// Host and client compare this during the join handshake.
    pub fn schema_hash(&self) -> u64 {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&PROTOCOL_VERSION.to_le_bytes());
        for (tag, registration) in &self.entries {
            hasher.update(&[*tag]);
            hasher.update(registration.name.as_bytes());
        }
        let hash = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }
}

/// Schema hash of the default catalog.
pub fn compute_schema_hash() -> u64 {
    MessageRegistry::catalog().schema_hash()
}

/// Encode a message as `[tag][fields]`.
pub fn encode_message(message: &Message) -> WireResult<Bytes> {
    message.verify()?;
    let mut w = WireWriter::with_capacity(64);
    w.put_u8(message.tag());
    match message {
        Message::JoinRequest {
            username,
            schema_hash,
            movement,
        } => {
            w.put_str(username)?;
            w.put_u64(*schema_hash);
            movement.write(&mut w)?;
        }
        Message::JoinAccept {
            player_id,
            world_bounds,
            players,
            solids,
        } => {
            w.put_entity(*player_id);
            w.put_rect(world_bounds);
            w.put_list(players)?;
            w.put_list(solids)?;
        }
        Message::JoinReject { reason } => w.put_str(reason)?,
        Message::WorldInit { items, machines } => {
            w.put_list(items)?;
            w.put_list(machines)?;
        }
        Message::StateBroadcast {
            tick,
            full,
            entities,
        } => {
            w.put_u32(*tick);
            w.put_bool(*full);
            w.put_list(entities)?;
        }
        Message::PlayerJoined { player } => player.write(&mut w)?,
        Message::PlayerLeft { player_id } => w.put_entity(*player_id),
        Message::PlayerInput(input) => input.write(&mut w)?,
        Message::ItemPickupRequest { item_id }
        | Message::ItemDropRequest { item_id }
        | Message::ItemUseRequest { item_id } => w.put_entity(*item_id),
        Message::ItemPickupBroadcast {
            player_id,
            item_id,
            success,
        } => {
            w.put_entity(*player_id);
            w.put_entity(*item_id);
            w.put_bool(*success);
        }
        Message::ItemDropBroadcast { player_id, item } => {
            w.put_entity(*player_id);
            item.write(&mut w)?;
        }
        Message::ItemUseBroadcast {
            player_id,
            item_id,
            kind,
            consumed,
        } => {
            w.put_entity(*player_id);
            w.put_entity(*item_id);
            w.put_u8(kind.as_u8());
            w.put_bool(*consumed);
        }
        Message::CoinMachineRequest {
            machine_id,
            request_id,
        } => {
            w.put_u32(*machine_id);
            w.put_u32(*request_id);
        }
        Message::ItemSpawnBroadcast { machine_id, items } => {
            w.put_u32(*machine_id);
            w.put_list(items)?;
        }
    }
    Ok(w.finish())
}

fn decode_join_request(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::JoinRequest {
        username: r.string()?,
        schema_hash: r.u64()?,
        movement: MovementParams::read(r)?,
    })
}

fn decode_join_accept(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::JoinAccept {
        player_id: r.entity()?,
        world_bounds: r.rect()?,
        players: r.list::<PlayerRecord>()?,
        solids: r.list::<SolidState>()?,
    })
}

fn decode_join_reject(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::JoinReject { reason: r.string()? })
}

fn decode_world_init(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::WorldInit {
        items: r.list::<ItemState>()?,
        machines: r.list::<MachineState>()?,
    })
}

fn decode_state_broadcast(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::StateBroadcast {
        tick: r.u32()?,
        full: r.bool()?,
        entities: r.list()?,
    })
}

fn decode_player_joined(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::PlayerJoined {
        player: PlayerRecord::read(r)?,
    })
}

fn decode_player_left(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::PlayerLeft {
        player_id: r.entity()?,
    })
}

fn decode_player_input(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::PlayerInput(InputState::read(r)?))
}

fn decode_pickup_request(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::ItemPickupRequest {
        item_id: r.entity()?,
    })
}

fn decode_drop_request(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::ItemDropRequest {
        item_id: r.entity()?,
    })
}

fn decode_use_request(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::ItemUseRequest {
        item_id: r.entity()?,
    })
}

fn decode_pickup_broadcast(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::ItemPickupBroadcast {
        player_id: r.entity()?,
        item_id: r.entity()?,
        success: r.bool()?,
    })
}

fn decode_drop_broadcast(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::ItemDropBroadcast {
        player_id: r.entity()?,
        item: ItemState::read(r)?,
    })
}

fn decode_use_broadcast(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::ItemUseBroadcast {
        player_id: r.entity()?,
        item_id: r.entity()?,
        kind: crate::protocol::read_item_kind(r)?,
        consumed: r.bool()?,
    })
}

fn decode_coin_machine_request(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::CoinMachineRequest {
        machine_id: r.u32()?,
        request_id: r.u32()?,
    })
}

fn decode_spawn_broadcast(r: &mut WireReader<'_>) -> WireResult<Message> {
    Ok(Message::ItemSpawnBroadcast {
        machine_id: r.u32()?,
        items: r.list()?,
    })
}
