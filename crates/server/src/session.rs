//! Host-side session: request validation, join flow and state broadcasts.

use crate::HostConfig;
use anyhow::Result;
use crossbeam_channel::Receiver;
use glam::Vec2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use relaysync_core::{
    EntityId, EventBus, GameEvent, ItemKind, PeerId, PropertySource, Rect, SimTick,
};
use relaysync_net::{
    compute_schema_hash, BroadcastClock, BroadcastKind, ConnectionEvent, InboundPacket,
    InputState, ItemAttributes, ItemState, MachineId, Message, MovementParams, Outbound,
    PacketHandler, RequestLedger, Role, Target,
};
use relaysync_world::{CoinMachine, ItemCatalog, World};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// Items per `WorldInit` packet.
const WORLD_INIT_CHUNK: usize = 128;

/// Property key overriding the physics gravity scale.
const GRAVITY_SCALE_KEY: &str = "physics.gravity_scale";

/// The authoritative side of a lobby.
///
/// Every request from a client and every local action of the host's own
/// player runs through the same validation, so the host never trusts a
/// client and never takes a shortcut for itself.
pub struct HostSession {
    config: HostConfig,
    world: World,
    catalog: ItemCatalog,
    properties: Arc<dyn PropertySource + Send + Sync>,
    outbound: Arc<dyn Outbound>,
    events: EventBus,
    schema_hash: u64,
    peers: HashMap<PeerId, EntityId>,
    host_player: Option<EntityId>,
    machine_ledger: RequestLedger<(EntityId, MachineId)>,
    local_request_id: u32,
    clock: BroadcastClock,
    broadcast_tick: u32,
    tick: SimTick,
    next_machine_id: MachineId,
    rng: StdRng,
}

impl HostSession {
    /// Host over `world`. Spawns the host's own player when configured to.
    pub fn new(
        mut config: HostConfig,
        world: World,
        catalog: ItemCatalog,
        properties: Arc<dyn PropertySource + Send + Sync>,
        outbound: Arc<dyn Outbound>,
        events: EventBus,
    ) -> Self {
        config.physics.gravity_scale =
            properties.get_f32(GRAVITY_SCALE_KEY, config.physics.gravity_scale);
        let clock = BroadcastClock::new(config.broadcast_rate_hz, config.full_state_every);
        let rng = StdRng::seed_from_u64(config.rng_seed);
        let mut session = Self {
            config,
            world,
            catalog,
            properties,
            outbound,
            events,
            schema_hash: compute_schema_hash(),
            peers: HashMap::new(),
            host_player: None,
            machine_ledger: RequestLedger::new(),
            local_request_id: 0,
            clock,
            broadcast_tick: 0,
            tick: SimTick::ZERO,
            next_machine_id: 1,
            rng,
        };
        if session.config.spawn_host_player {
            let id = session.world.spawn_player(
                PeerId::HOST,
                &session.config.host_username,
                session.config.spawn_point,
                session.config.movement,
                session.config.inventory_capacity,
            );
            session.peers.insert(PeerId::HOST, id);
            session.host_player = Some(id);
        }
        session
    }

    /// Host tuning, after property overrides.
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// The simulated world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// The simulated world, mutably (level setup).
    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Item capability table.
    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    /// The host's own player.
    pub fn host_player(&self) -> Option<EntityId> {
        self.host_player
    }

    /// Player controlled by `peer`.
    pub fn player_for(&self, peer: PeerId) -> Option<EntityId> {
        self.peers.get(&peer).copied()
    }

    /// Number of joined clients (the host's own player excluded).
    pub fn client_count(&self) -> usize {
        self.peers.keys().filter(|peer| !peer.is_host()).count()
    }

    /// Schema hash joiners must match.
    pub fn schema_hash(&self) -> u64 {
        self.schema_hash
    }

    /// Simulation ticks run so far.
    pub fn current_tick(&self) -> SimTick {
        self.tick
    }

    /// State broadcasts sent so far.
    pub fn broadcast_tick(&self) -> u32 {
        self.broadcast_tick
    }

    /// Subscribe to game events.
    pub fn subscribe(&mut self) -> Receiver<GameEvent> {
        self.events.subscribe()
    }

    /// Place a coin machine tuned from the game properties.
    pub fn add_coin_machine(&mut self, rect: Rect) -> MachineId {
        let id = self.next_machine_id;
        self.next_machine_id += 1;
        let machine = CoinMachine::from_properties(id, rect, self.properties.as_ref());
        debug!(
            "Coin machine {} at {:?} (chance {:.2}, payout {})",
            id,
            rect,
            machine.spawn_chance(),
            machine.state().payout
        );
        self.world.add_machine(machine);
        id
    }

    /// Spawn a resting item (level setup).
    pub fn spawn_item(&mut self, attributes: ItemAttributes, position: Vec2) -> EntityId {
        self.world
            .spawn_item(&self.catalog, attributes, position, Vec2::ZERO)
    }

    fn send(&self, target: Target, message: &Message) {
        if let Err(e) = self.outbound.send(target, message) {
            warn!("Failed to send tag {} to {:?}: {:#}", message.tag(), target, e);
        }
    }

    fn handle_join(&mut self, peer: PeerId, username: String, schema_hash: u64, movement: MovementParams) {
        if schema_hash != self.schema_hash {
            info!(
                "Rejecting {} ({}): schema {:#x} != {:#x}",
                peer, username, schema_hash, self.schema_hash
            );
            self.send(
                Target::Peer(peer),
                &Message::JoinReject {
                    reason: "protocol schema mismatch".into(),
                },
            );
            return;
        }

        if let Some(&player_id) = self.peers.get(&peer) {
            debug!("{} re-sent its join request; re-accepting {}", peer, player_id);
            // A re-join starts a new client session with fresh counters.
            self.machine_ledger.forget_where(|(player, _)| *player == player_id);
            if let Some(player) = self.world.player_mut(player_id) {
                player.reset_input_sequence();
            }
            self.send_welcome(peer, player_id);
            return;
        }

        if self.world.player_count() >= self.config.max_players {
            info!("Rejecting {} ({}): lobby full", peer, username);
            self.send(
                Target::Peer(peer),
                &Message::JoinReject {
                    reason: "lobby is full".into(),
                },
            );
            return;
        }

        let player_id = self.world.spawn_player(
            peer,
            &username,
            self.config.spawn_point,
            movement,
            self.config.inventory_capacity,
        );
        self.peers.insert(peer, player_id);
        info!("{} joined as {} ({})", peer, player_id, username);

        self.send_welcome(peer, player_id);
        if let Some(player) = self.world.player(player_id) {
            self.send(
                Target::Broadcast,
                &Message::PlayerJoined {
                    player: player.record(),
                },
            );
        }
        self.events.publish(GameEvent::PlayerJoined { player_id, username });
    }

    fn send_welcome(&self, peer: PeerId, player_id: EntityId) {
        self.send(
            Target::Peer(peer),
            &Message::JoinAccept {
                player_id,
                world_bounds: self.world.bounds(),
                players: self.world.player_records(),
                solids: self.world.solids().to_vec(),
            },
        );

        let items = self.world.item_states();
        let machines = self.world.machine_states();
        let mut chunks = items.chunks(WORLD_INIT_CHUNK);
        self.send(
            Target::Peer(peer),
            &Message::WorldInit {
                items: chunks.next().map(<[ItemState]>::to_vec).unwrap_or_default(),
                machines,
            },
        );
        for chunk in chunks {
            self.send(
                Target::Peer(peer),
                &Message::WorldInit {
                    items: chunk.to_vec(),
                    machines: Vec::new(),
                },
            );
        }
    }

    fn handle_input(&mut self, player_id: EntityId, input: InputState) -> bool {
        match self.world.player_mut(player_id) {
            Some(player) => player.apply_input(input),
            None => false,
        }
    }

    /// Authoritative pickup. The outcome is broadcast either way.
    fn pickup(&mut self, player_id: EntityId, item_id: EntityId) -> bool {
        let success = self.try_pickup(player_id, item_id);
        self.send(
            Target::Broadcast,
            &Message::ItemPickupBroadcast {
                player_id,
                item_id,
                success,
            },
        );
        self.events.publish(GameEvent::ItemPickedUp {
            player_id,
            item_id,
            success,
        });
        success
    }

    fn try_pickup(&mut self, player_id: EntityId, item_id: EntityId) -> bool {
        let Some(player) = self.world.player(player_id) else {
            debug!("Pickup by unknown player {}", player_id);
            return false;
        };
        let Some(item) = self.world.item(item_id) else {
            debug!("Player {} asked for missing item {}", player_id, item_id);
            return false;
        };
        if !self.catalog.can_pickup(item.state(), player) {
            debug!("Player {} cannot pick up item {}", player_id, item_id);
            return false;
        }
        if player.inventory().is_full() {
            debug!("Player {} inventory full", player_id);
            return false;
        }

        let Some(item) = self.world.remove_item(item_id) else {
            return false;
        };
        let mut state = item.into_state();
        state.velocity = Vec2::ZERO;
        state.awake = false;
        match self.world.player_mut(player_id) {
            Some(player) => match player.inventory_mut().insert(state) {
                Ok(()) => true,
                Err(state) => {
                    self.world.insert_item(self.catalog.create(state));
                    false
                }
            },
            None => {
                self.world.insert_item(self.catalog.create(state));
                false
            }
        }
    }

    fn drop_item(&mut self, player_id: EntityId, item_id: EntityId) -> bool {
        let Some(player) = self.world.player(player_id) else {
            return false;
        };
        let Some(kind) = player.inventory().get(item_id).map(ItemState::kind) else {
            debug!("Player {} does not carry item {}", player_id, item_id);
            return false;
        };
        if !self.catalog.is_droppable(kind) {
            debug!("Item {} ({}) cannot be dropped", item_id, kind.as_str());
            return false;
        }

        let Some(mut state) = self
            .world
            .player_mut(player_id)
            .and_then(|player| player.inventory_mut().take(item_id))
        else {
            return false;
        };
        if let Some(player) = self.world.player(player_id) {
            self.catalog.release(&mut state, player);
        }
        self.world.insert_item(self.catalog.create(state));
        self.send(
            Target::Broadcast,
            &Message::ItemDropBroadcast {
                player_id,
                item: state,
            },
        );
        self.events.publish(GameEvent::ItemDropped { player_id, item_id });
        true
    }

    fn use_item(&mut self, player_id: EntityId, item_id: EntityId) -> bool {
        let Some(player) = self.world.player_mut(player_id) else {
            return false;
        };
        let Some(state) = player.inventory().get(item_id).copied() else {
            debug!("Player {} does not carry item {}", player_id, item_id);
            return false;
        };
        let Some(effect) = self.catalog.use_item(&state, player) else {
            debug!("Item {} ({}) has no use", item_id, state.kind().as_str());
            return false;
        };
        if effect.consumed {
            player.inventory_mut().take(item_id);
        }

        let kind = state.kind();
        self.send(
            Target::Broadcast,
            &Message::ItemUseBroadcast {
                player_id,
                item_id,
                kind,
                consumed: effect.consumed,
            },
        );
        self.events.publish(GameEvent::ItemUsed {
            player_id,
            item_id,
            kind,
        });
        true
    }

    fn spin_machine(&mut self, player_id: EntityId, machine_id: MachineId, request_id: u32) -> Vec<EntityId> {
        let Some(machine) = self.world.machine(machine_id).cloned() else {
            debug!("Player {} asked for missing machine {}", player_id, machine_id);
            return Vec::new();
        };
        if !self.machine_ledger.accept((player_id, machine_id), request_id) {
            debug!(
                "Ignoring repeated spin {} from {} on machine {}",
                request_id, player_id, machine_id
            );
            return Vec::new();
        }

        let count = machine.spin(&mut self.rng);
        if count == 0 {
            debug!("Machine {} paid nothing to {}", machine_id, player_id);
            return Vec::new();
        }

        let ids: Vec<EntityId> = (0..count)
            .map(|index| {
                self.world.spawn_item(
                    &self.catalog,
                    ItemAttributes::default_for(ItemKind::Coin),
                    machine.spawn_point(index, count),
                    Vec2::ZERO,
                )
            })
            .collect();
        let items: Vec<ItemState> = ids
            .iter()
            .filter_map(|id| self.world.item(*id).map(|item| *item.state()))
            .collect();
        info!("Machine {} paid {} coins to {}", machine_id, count, player_id);
        self.send(
            Target::Broadcast,
            &Message::ItemSpawnBroadcast { machine_id, items },
        );
        self.events.publish(GameEvent::ItemsSpawned {
            item_ids: ids.clone(),
        });
        ids
    }

    /// Apply the host player's own input.
    pub fn local_input(&mut self, input: InputState) -> bool {
        match self.host_player {
            Some(id) => self.handle_input(id, input),
            None => false,
        }
    }

    /// Host player picks up an item.
    pub fn local_pickup(&mut self, item_id: EntityId) -> bool {
        match self.host_player {
            Some(id) => self.pickup(id, item_id),
            None => false,
        }
    }

    /// Host player drops a carried item.
    pub fn local_drop(&mut self, item_id: EntityId) -> bool {
        match self.host_player {
            Some(id) => self.drop_item(id, item_id),
            None => false,
        }
    }

    /// Host player uses a carried item.
    pub fn local_use(&mut self, item_id: EntityId) -> bool {
        match self.host_player {
            Some(id) => self.use_item(id, item_id),
            None => false,
        }
    }

    /// Host player spins a coin machine; returns the spawned coins.
    pub fn local_coin_spin(&mut self, machine_id: MachineId) -> Vec<EntityId> {
        let Some(id) = self.host_player else {
            return Vec::new();
        };
        self.local_request_id = self.local_request_id.wrapping_add(1);
        self.spin_machine(id, machine_id, self.local_request_id)
    }

    /// React to relay-level events.
    pub fn handle_connection_event(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::PeerJoined(peer) => {
                debug!("{} connected; waiting for its join request", peer);
            }
            ConnectionEvent::PeerLeft(peer) => self.remove_peer(*peer),
            ConnectionEvent::LobbyCreated(code) => {
                info!("Lobby {} is open", code);
                self.events.publish(GameEvent::ConnectionChanged {
                    connected: true,
                    reason: Some(format!("hosting lobby {}", code)),
                });
            }
            ConnectionEvent::RelayError(message) => {
                warn!("Relay error: {}", message);
            }
            ConnectionEvent::LinkClosed(reason) => {
                warn!("Relay link closed: {}", reason);
                self.events.publish(GameEvent::ConnectionChanged {
                    connected: false,
                    reason: Some(reason.clone()),
                });
            }
            ConnectionEvent::Joined(_) | ConnectionEvent::HostDisconnected => {
                trace!("Ignoring client-side event {:?}", event);
            }
        }
    }

    /// Remove a departed peer's player. Carried items fall back into the world.
    fn remove_peer(&mut self, peer: PeerId) {
        let Some(player_id) = self.peers.remove(&peer) else {
            debug!("{} left before joining", peer);
            return;
        };
        let Some(mut player) = self.world.remove_player(player_id) else {
            return;
        };
        for mut state in player.inventory_mut().drain() {
            if !self.catalog.release(&mut state, &player) {
                state.position = player.position();
                state.awake = true;
            }
            self.world.insert_item(self.catalog.create(state));
            self.send(
                Target::Broadcast,
                &Message::ItemDropBroadcast {
                    player_id,
                    item: state,
                },
            );
        }
        self.machine_ledger
            .forget_where(|(player, _)| *player == player_id);

        info!("{} left; removed player {}", peer, player_id);
        self.send(Target::Broadcast, &Message::PlayerLeft { player_id });
        self.events.publish(GameEvent::PlayerLeft { player_id });
    }

    /// Advance the simulation.
    pub fn step_physics(&mut self, dt: f32) {
        self.world.step_physics(&self.config.physics, dt);
        self.tick = self.tick.advance(1);
    }

    /// Broadcast entity state if the clock says one is due.
    pub fn replicate(&mut self, dt: f32) -> Option<BroadcastKind> {
        let kind = self.clock.advance(dt)?;
        let full = kind == BroadcastKind::Full;
        let entities = if full {
            self.world.collect_all()
        } else {
            self.world.collect_dirty()
        };
        let tick = self.broadcast_tick;
        self.broadcast_tick = self.broadcast_tick.wrapping_add(1);

        trace!("Broadcast {} ({:?}): {} entities", tick, kind, entities.len());
        for chunk in entities.chunks(self.config.max_entities_per_broadcast.max(1)) {
            self.send(
                Target::Broadcast,
                &Message::StateBroadcast {
                    tick,
                    full,
                    entities: chunk.to_vec(),
                },
            );
        }
        Some(kind)
    }

    /// One fixed step: physics, then replication.
    #[instrument(skip(self), fields(tick = self.tick.0, players = self.world.player_count()))]
    pub fn tick(&mut self, dt: f32) -> Option<BroadcastKind> {
        self.step_physics(dt);
        self.replicate(dt)
    }
}

impl PacketHandler for HostSession {
    fn handle_packet(&mut self, packet: InboundPacket) -> Result<()> {
        let Some(peer) = packet.source else {
            warn!("Dropping packet without a source peer");
            return Ok(());
        };
        if packet.message.origin() != Role::Client {
            warn!(
                "Dropping host-only message tag {} from {}",
                packet.message.tag(),
                peer
            );
            return Ok(());
        }

        if let Message::JoinRequest {
            username,
            schema_hash,
            movement,
        } = packet.message
        {
            self.handle_join(peer, username, schema_hash, movement);
            return Ok(());
        }

        let Some(player_id) = self.player_for(peer) else {
            debug!(
                "Dropping tag {} from {} which has not joined",
                packet.message.tag(),
                peer
            );
            return Ok(());
        };
        match packet.message {
            Message::PlayerInput(input) => {
                self.handle_input(player_id, input);
            }
            Message::ItemPickupRequest { item_id } => {
                self.pickup(player_id, item_id);
            }
            Message::ItemDropRequest { item_id } => {
                self.drop_item(player_id, item_id);
            }
            Message::ItemUseRequest { item_id } => {
                self.use_item(player_id, item_id);
            }
            Message::CoinMachineRequest {
                machine_id,
                request_id,
            } => {
                self.spin_machine(player_id, machine_id, request_id);
            }
            other => trace!("No handler for tag {}", other.tag()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaysync_core::{PropertyTable, PropertyValue};
    use relaysync_net::protocol::tags;
    use relaysync_testkit::{test_world, RecordingOutbound};
    use relaysync_world::{COINS_PER_SPIN_KEY, SPAWN_CHANCE_KEY};

    fn host_with(properties: PropertyTable) -> (HostSession, Arc<RecordingOutbound>) {
        let outbound = Arc::new(RecordingOutbound::new());
        let session = HostSession::new(
            HostConfig::default(),
            test_world(),
            ItemCatalog::standard(),
            Arc::new(properties),
            outbound.clone(),
            EventBus::new(),
        );
        (session, outbound)
    }

    fn host() -> (HostSession, Arc<RecordingOutbound>) {
        host_with(PropertyTable::new())
    }

    fn packet(peer: PeerId, message: Message) -> InboundPacket {
        InboundPacket {
            source: Some(peer),
            channel: message.channel(),
            delivery: message.delivery(),
            message,
        }
    }

    fn join(session: &mut HostSession, peer: PeerId) -> EntityId {
        let request = Message::JoinRequest {
            username: format!("p{}", peer.0),
            schema_hash: compute_schema_hash(),
            movement: MovementParams::default(),
        };
        session.handle_packet(packet(peer, request)).unwrap();
        session.player_for(peer).expect("joined")
    }

    fn item_near_spawn(session: &mut HostSession, attributes: ItemAttributes) -> EntityId {
        let spawn = session.config().spawn_point;
        session.spawn_item(attributes, spawn + Vec2::new(4.0, 4.0))
    }

    #[test]
    fn test_join_sends_welcome_and_announces() {
        let (mut session, outbound) = host();
        let player_id = join(&mut session, PeerId(1));

        let to_joiner = outbound.sent_to(Target::Peer(PeerId(1)));
        assert!(matches!(
            &to_joiner[0],
            Message::JoinAccept { player_id: id, players, .. } if *id == player_id && players.len() == 2
        ));
        assert!(matches!(&to_joiner[1], Message::WorldInit { .. }));
        assert_eq!(outbound.count_tag(tags::PLAYER_JOINED), 1);
        assert_eq!(session.client_count(), 1);
    }

    #[test]
    fn test_joined_player_falls_under_gravity() {
        let (mut session, outbound) = host();
        let spawn = session.config().spawn_point;
        let player_id = join(&mut session, PeerId(1));

        let to_joiner = outbound.sent_to(Target::Peer(PeerId(1)));
        let Message::JoinAccept { players, .. } = &to_joiner[0] else {
            panic!("expected JoinAccept, got {:?}", to_joiner[0]);
        };
        let record = players
            .iter()
            .find(|record| record.snapshot.id == player_id)
            .expect("joiner listed");
        assert!(record.snapshot.awake);
        assert_eq!(record.snapshot.position, spawn);

        session.world_mut().collect_dirty();
        let dt = 1.0 / 60.0;
        session.step_physics(dt);

        let player = session.world().player(player_id).expect("player");
        let expected_vy =
            session.config().physics.effective_gravity() * MovementParams::default().mass * dt;
        assert!((player.velocity().y - expected_vy).abs() < 1e-4);
        assert!(player.position().y > spawn.y);
        let dirty = session.world_mut().collect_dirty();
        assert!(dirty.iter().any(|snapshot| snapshot.id == player_id));
    }

    #[test]
    fn test_repeated_join_is_idempotent() {
        let (mut session, outbound) = host();
        let first = join(&mut session, PeerId(1));
        let second = join(&mut session, PeerId(1));
        assert_eq!(first, second);
        assert_eq!(session.world().player_count(), 2);
        assert_eq!(outbound.count_tag(tags::JOIN_ACCEPT), 2);
        assert_eq!(outbound.count_tag(tags::PLAYER_JOINED), 1);
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let (mut session, outbound) = host();
        session
            .handle_packet(packet(
                PeerId(2),
                Message::JoinRequest {
                    username: "old".into(),
                    schema_hash: 1,
                    movement: MovementParams::default(),
                },
            ))
            .unwrap();
        assert!(session.player_for(PeerId(2)).is_none());
        assert_eq!(outbound.count_tag(tags::JOIN_REJECT), 1);
    }

    #[test]
    fn test_full_lobby_rejected() {
        let outbound = Arc::new(RecordingOutbound::new());
        let mut session = HostSession::new(
            HostConfig {
                max_players: 2,
                ..HostConfig::default()
            },
            test_world(),
            ItemCatalog::standard(),
            Arc::new(PropertyTable::new()),
            outbound.clone(),
            EventBus::new(),
        );
        join(&mut session, PeerId(1));
        session
            .handle_packet(packet(
                PeerId(2),
                Message::JoinRequest {
                    username: "late".into(),
                    schema_hash: compute_schema_hash(),
                    movement: MovementParams::default(),
                },
            ))
            .unwrap();
        assert!(session.player_for(PeerId(2)).is_none());
        assert_eq!(outbound.count_tag(tags::JOIN_REJECT), 1);
    }

    #[test]
    fn test_host_only_messages_from_clients_are_dropped() {
        let (mut session, outbound) = host();
        join(&mut session, PeerId(1));
        outbound.take();
        session
            .handle_packet(packet(
                PeerId(1),
                Message::PlayerLeft {
                    player_id: session.host_player().unwrap(),
                },
            ))
            .unwrap();
        assert!(outbound.is_empty());
        assert_eq!(session.world().player_count(), 2);
    }

    #[test]
    fn test_requests_before_join_are_ignored() {
        let (mut session, outbound) = host();
        let item = item_near_spawn(&mut session, ItemAttributes::Gem { carat: 1 });
        session
            .handle_packet(packet(PeerId(5), Message::ItemPickupRequest { item_id: item }))
            .unwrap();
        assert!(outbound.is_empty());
        assert!(session.world().item(item).is_some());
    }

    #[test]
    fn test_pickup_race_has_one_winner() {
        let (mut session, outbound) = host();
        let a = join(&mut session, PeerId(1));
        let b = join(&mut session, PeerId(2));
        let item = item_near_spawn(&mut session, ItemAttributes::Gem { carat: 3 });
        let events = session.subscribe();
        outbound.take();

        session
            .handle_packet(packet(PeerId(1), Message::ItemPickupRequest { item_id: item }))
            .unwrap();
        session
            .handle_packet(packet(PeerId(2), Message::ItemPickupRequest { item_id: item }))
            .unwrap();

        let outcomes: Vec<(EntityId, bool)> = outbound
            .take()
            .into_iter()
            .filter_map(|(_, m)| match m {
                Message::ItemPickupBroadcast {
                    player_id, success, ..
                } => Some((player_id, success)),
                _ => None,
            })
            .collect();
        assert_eq!(outcomes, vec![(a, true), (b, false)]);
        assert!(session.world().item(item).is_none());
        assert!(session.world().player(a).unwrap().inventory().contains(item));
        assert!(session.world().player(b).unwrap().inventory().is_empty());
        let published: Vec<bool> = events
            .try_iter()
            .filter_map(|event| match event {
                GameEvent::ItemPickedUp { success, .. } => Some(success),
                _ => None,
            })
            .collect();
        assert_eq!(published, vec![true, false]);
    }

    #[test]
    fn test_pickup_out_of_reach_fails_without_mutation() {
        let (mut session, outbound) = host();
        join(&mut session, PeerId(1));
        let far = session.spawn_item(ItemAttributes::Gem { carat: 1 }, Vec2::new(380.0, 10.0));
        outbound.take();
        session
            .handle_packet(packet(PeerId(1), Message::ItemPickupRequest { item_id: far }))
            .unwrap();
        assert!(session.world().item(far).is_some());
        assert!(matches!(
            outbound.take().as_slice(),
            [(Target::Broadcast, Message::ItemPickupBroadcast { success: false, .. })]
        ));
    }

    #[test]
    fn test_use_and_drop() {
        let (mut session, outbound) = host();
        let coin = item_near_spawn(&mut session, ItemAttributes::Coin { value: 4 });
        let gem = item_near_spawn(&mut session, ItemAttributes::Gem { carat: 1 });
        assert!(session.local_pickup(coin));
        assert!(session.local_pickup(gem));

        assert!(!session.local_use(gem), "gems have no use");
        assert!(session.local_use(coin));
        let host_id = session.host_player().unwrap();
        let player = session.world().player(host_id).unwrap();
        assert_eq!(player.coins(), 4);
        assert!(!player.inventory().contains(coin));

        assert!(session.local_drop(gem));
        assert!(!session.local_drop(gem), "already dropped");
        assert!(session.world().item(gem).unwrap().is_awake());
        assert_eq!(outbound.count_tag(tags::ITEM_USE_BROADCAST), 1);
        assert_eq!(outbound.count_tag(tags::ITEM_DROP_BROADCAST), 1);
    }

    #[test]
    fn test_coin_machine_request_ids_apply_once() {
        let (mut session, outbound) = host_with(
            PropertyTable::new()
                .with(SPAWN_CHANCE_KEY, PropertyValue::Float(1.0))
                .with(COINS_PER_SPIN_KEY, PropertyValue::Int(2)),
        );
        let machine = session.add_coin_machine(Rect::new(200.0, 240.0, 30.0, 40.0));
        join(&mut session, PeerId(1));
        let spin = |request_id| {
            packet(
                PeerId(1),
                Message::CoinMachineRequest {
                    machine_id: machine,
                    request_id,
                },
            )
        };

        session.handle_packet(spin(1)).unwrap();
        session.handle_packet(spin(1)).unwrap();
        session.handle_packet(spin(0)).unwrap();
        assert_eq!(session.world().item_count(), 2);
        assert_eq!(outbound.count_tag(tags::ITEM_SPAWN_BROADCAST), 1);

        session.handle_packet(spin(2)).unwrap();
        assert_eq!(session.world().item_count(), 4);

        // The host's own counter is a separate ledger key.
        assert_eq!(session.local_coin_spin(machine).len(), 2);
    }

    #[test]
    fn test_rejoin_restarts_request_and_input_counters() {
        let (mut session, _outbound) = host_with(
            PropertyTable::new()
                .with(SPAWN_CHANCE_KEY, PropertyValue::Float(1.0))
                .with(COINS_PER_SPIN_KEY, PropertyValue::Int(1)),
        );
        let machine = session.add_coin_machine(Rect::new(200.0, 240.0, 30.0, 40.0));
        let player = join(&mut session, PeerId(1));
        let spin = |request_id| {
            packet(
                PeerId(1),
                Message::CoinMachineRequest {
                    machine_id: machine,
                    request_id,
                },
            )
        };
        let input = |sequence, move_x| {
            packet(
                PeerId(1),
                Message::PlayerInput(InputState {
                    sequence,
                    move_x,
                    jump: false,
                }),
            )
        };

        for id in 1..=3 {
            session.handle_packet(spin(id)).unwrap();
        }
        for sequence in 1..=5 {
            session.handle_packet(input(sequence, 0.0)).unwrap();
        }
        assert_eq!(session.world().item_count(), 3);

        assert_eq!(join(&mut session, PeerId(1)), player);
        session.handle_packet(spin(1)).unwrap();
        session.handle_packet(input(1, 1.0)).unwrap();

        assert_eq!(session.world().item_count(), 4, "first spin of the new session");
        assert_eq!(session.world().player(player).unwrap().input().move_x, 1.0);

        session.handle_packet(spin(1)).unwrap();
        assert_eq!(session.world().item_count(), 4, "still deduplicated within a session");
    }

    #[test]
    fn test_peer_left_removes_player_and_drops_items() {
        let (mut session, outbound) = host();
        let player = join(&mut session, PeerId(1));
        let gem = item_near_spawn(&mut session, ItemAttributes::Gem { carat: 1 });
        session
            .handle_packet(packet(PeerId(1), Message::ItemPickupRequest { item_id: gem }))
            .unwrap();
        outbound.take();

        session.handle_connection_event(&ConnectionEvent::PeerLeft(PeerId(1)));
        assert!(session.world().player(player).is_none());
        assert!(session.world().item(gem).is_some());
        assert_eq!(outbound.count_tag(tags::PLAYER_LEFT), 1);
        assert_eq!(outbound.count_tag(tags::ITEM_DROP_BROADCAST), 1);
        assert_eq!(session.client_count(), 0);
    }

    #[test]
    fn test_replicate_full_then_deltas_in_chunks() {
        let outbound = Arc::new(RecordingOutbound::new());
        let mut session = HostSession::new(
            HostConfig {
                max_entities_per_broadcast: 2,
                ..HostConfig::default()
            },
            test_world(),
            ItemCatalog::standard(),
            Arc::new(PropertyTable::new()),
            outbound.clone(),
            EventBus::new(),
        );
        for i in 0..4 {
            session.spawn_item(ItemAttributes::Coin { value: 1 }, Vec2::new(20.0 * i as f32, 10.0));
        }

        let dt = 1.0 / 60.0;
        assert_eq!(session.replicate(dt), Some(BroadcastKind::Full));
        let sent = outbound.take();
        assert_eq!(sent.len(), 3, "5 entities in chunks of 2");
        assert!(sent.iter().all(|(target, m)| *target == Target::Broadcast
            && matches!(m, Message::StateBroadcast { full: true, tick: 0, .. })));

        assert_eq!(session.replicate(dt), Some(BroadcastKind::Delta));
        assert!(outbound.is_empty(), "nothing changed since the full broadcast");

        session.step_physics(dt);
        session.replicate(dt);
        let entities: usize = outbound
            .take()
            .into_iter()
            .map(|(_, m)| match m {
                Message::StateBroadcast { entities, full: false, .. } => entities.len(),
                _ => 0,
            })
            .sum();
        assert_eq!(entities, 5, "every body fell during the step");
        assert_eq!(session.broadcast_tick(), 3);
    }
}
