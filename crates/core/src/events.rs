//! High-level game events for a presentation layer.

use crate::{EntityId, ItemKind};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;
use tracing::trace;

/// Events a presentation layer can subscribe to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum GameEvent {
    /// A player entered the session.
    PlayerJoined {
        /// Player entity.
        player_id: EntityId,
        /// Display name.
        username: String,
    },
    /// A player left the session.
    PlayerLeft {
        /// Player entity.
        player_id: EntityId,
    },
    /// Authoritative outcome of a pickup attempt.
    ItemPickedUp {
        /// Player that attempted the pickup.
        player_id: EntityId,
        /// Item that was targeted.
        item_id: EntityId,
        /// Whether the item moved into the player's inventory.
        success: bool,
    },
    /// An item left a player's inventory and is back in the world.
    ItemDropped {
        /// Player that dropped the item.
        player_id: EntityId,
        /// Dropped item.
        item_id: EntityId,
    },
    /// An item was used.
    ItemUsed {
        /// Player that used the item.
        player_id: EntityId,
        /// Item that was used.
        item_id: EntityId,
        /// Item kind.
        kind: ItemKind,
    },
    /// New items appeared in the world (e.g. a coin machine payout).
    ItemsSpawned {
        /// Spawned item ids.
        item_ids: Vec<EntityId>,
    },
    /// The client received its initial world state.
    WorldInitialized {
        /// The local player's entity.
        player_id: EntityId,
    },
    /// The relay connection changed state.
    ConnectionChanged {
        /// Whether the session is still usable.
        connected: bool,
        /// Human readable reason for the change.
        reason: Option<String>,
    },
}

/// Fan-out event stream. Each subscriber receives every event published after
/// it subscribed.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Sender<GameEvent>>,
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&mut self) -> Receiver<GameEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Deliver `event` to all live subscribers, pruning dropped ones.
    pub fn publish(&mut self, event: GameEvent) {
        trace!("Publishing {:?}", event);
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
