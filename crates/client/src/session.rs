//! Client-side session: join flow, shadow state and local prediction.

use crate::ClientConfig;
use anyhow::{bail, Result};
use crossbeam_channel::Receiver;
use glam::Vec2;
use relaysync_core::{
    EntityId, EntitySnapshot, EventBus, GameEvent, ItemKind, ObjectKind, PeerId, Rect,
};
use relaysync_net::{
    compute_schema_hash, ConnectionEvent, InboundPacket, InputState, ItemState, MachineId,
    MachineState, Message, MovementParams, Outbound, PacketHandler, PlayerRecord, Replicated,
    Role, ShadowInterpolator, SolidState, Target,
};
use relaysync_world::{ItemCatalog, Player, World};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// Where the client is in the join flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientState {
    /// Not in a lobby.
    Idle,
    /// Join request sent, waiting for the host.
    Joining,
    /// Accepted; shadows are live.
    Joined,
    /// The host refused the join.
    Rejected(String),
    /// The host or the relay went away.
    Disconnected(String),
}

/// A joined (or joining) client.
pub struct ClientSession {
    config: ClientConfig,
    catalog: ItemCatalog,
    outbound: Arc<dyn Outbound>,
    events: EventBus,
    state: ClientState,
    peer: Option<PeerId>,
    player_id: Option<EntityId>,
    world: World,
    machines: BTreeMap<MachineId, MachineState>,
    interpolator: ShadowInterpolator,
    movement: MovementParams,
    input_sequence: u32,
    request_id: u32,
    world_initialized: bool,
    corrections: u64,
}

impl ClientSession {
    /// Idle client sending through `outbound`.
    pub fn new(
        config: ClientConfig,
        catalog: ItemCatalog,
        outbound: Arc<dyn Outbound>,
        events: EventBus,
    ) -> Self {
        let interpolator = ShadowInterpolator::new(config.interpolation.clone());
        let movement = config.movement;
        Self {
            config,
            catalog,
            outbound,
            events,
            state: ClientState::Idle,
            peer: None,
            player_id: None,
            world: World::new(Rect::new(0.0, 0.0, 0.0, 0.0)),
            machines: BTreeMap::new(),
            interpolator,
            movement,
            input_sequence: 0,
            request_id: 0,
            world_initialized: false,
            corrections: 0,
        }
    }

    /// Join state.
    pub fn state(&self) -> &ClientState {
        &self.state
    }

    /// Whether the host accepted us.
    pub fn is_joined(&self) -> bool {
        self.state == ClientState::Joined
    }

    /// Our relay peer id, once the relay has told us.
    pub fn peer(&self) -> Option<PeerId> {
        self.peer
    }

    /// Our player entity.
    pub fn player_id(&self) -> Option<EntityId> {
        self.player_id
    }

    /// Our player.
    pub fn local_player(&self) -> Option<&Player> {
        self.player_id.and_then(|id| self.world.player(id))
    }

    /// The shadow world.
    pub fn world(&self) -> &World {
        &self.world
    }

    /// Known coin machines.
    pub fn machines(&self) -> impl Iterator<Item = &MachineState> {
        self.machines.values()
    }

    /// Shadow buffers.
    pub fn interpolator(&self) -> &ShadowInterpolator {
        &self.interpolator
    }

    /// Times the predicted local player was snapped to the host state.
    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    /// Item capability table.
    pub fn catalog(&self) -> &ItemCatalog {
        &self.catalog
    }

    /// Subscribe to game events.
    pub fn subscribe(&mut self) -> Receiver<GameEvent> {
        self.events.subscribe()
    }

    fn send(&self, message: Message) -> Result<()> {
        self.outbound.send(Target::Host, &message)
    }

    fn reset(&mut self) {
        self.player_id = None;
        self.world = World::new(Rect::new(0.0, 0.0, 0.0, 0.0));
        self.machines.clear();
        self.interpolator.clear();
        self.input_sequence = 0;
        self.request_id = 0;
        self.world_initialized = false;
    }

    /// Ask the host to let us in. Any previous session state is dropped.
    pub fn begin_join(&mut self, username: &str, movement: MovementParams) -> Result<()> {
        self.reset();
        self.movement = movement;
        self.state = ClientState::Joining;
        info!("Requesting to join as {}", username);
        self.send(Message::JoinRequest {
            username: username.to_string(),
            schema_hash: compute_schema_hash(),
            movement,
        })
    }

    fn joined_player(&self) -> Result<EntityId> {
        match (self.is_joined(), self.player_id) {
            (true, Some(id)) => Ok(id),
            _ => bail!("not joined to a lobby"),
        }
    }

    /// Send one frame of input and apply it to the predicted player.
    pub fn send_input(&mut self, move_x: f32, jump: bool) -> Result<InputState> {
        let player_id = self.joined_player()?;
        self.input_sequence = self.input_sequence.wrapping_add(1);
        let input = InputState {
            sequence: self.input_sequence,
            move_x: move_x.clamp(-1.0, 1.0),
            jump,
        };
        if let Some(player) = self.world.player_mut(player_id) {
            player.apply_input(input);
        }
        self.send(Message::PlayerInput(input))?;
        Ok(input)
    }

    /// Ask to pick up a world item.
    pub fn request_pickup(&mut self, item_id: EntityId) -> Result<()> {
        self.joined_player()?;
        self.send(Message::ItemPickupRequest { item_id })
    }

    /// Ask to drop a carried item.
    pub fn request_drop(&mut self, item_id: EntityId) -> Result<()> {
        self.joined_player()?;
        self.send(Message::ItemDropRequest { item_id })
    }

    /// Ask to use a carried item.
    pub fn request_use(&mut self, item_id: EntityId) -> Result<()> {
        self.joined_player()?;
        self.send(Message::ItemUseRequest { item_id })
    }

    /// Ask a coin machine for a spin. Returns the request id used.
    pub fn request_coin_spin(&mut self, machine_id: MachineId) -> Result<u32> {
        self.joined_player()?;
        self.request_id = self.request_id.wrapping_add(1);
        let request_id = self.request_id;
        self.send(Message::CoinMachineRequest {
            machine_id,
            request_id,
        })?;
        Ok(request_id)
    }

    fn handle_accept(
        &mut self,
        player_id: EntityId,
        world_bounds: Rect,
        players: Vec<PlayerRecord>,
        solids: Vec<SolidState>,
    ) {
        match self.state {
            ClientState::Joining => {}
            ClientState::Joined if self.player_id == Some(player_id) => {
                debug!("Duplicate accept for {}", player_id);
                return;
            }
            _ => {
                warn!("Unexpected join accept in state {:?}", self.state);
                return;
            }
        }

        self.world.set_geometry(world_bounds, solids);
        for record in &players {
            let player = if record.snapshot.id == player_id {
                Player::from_record(record, self.peer.unwrap_or(PeerId::HOST), self.movement)
            } else {
                Self::remote_player(record)
            };
            self.world.insert_player(player);
        }
        self.player_id = Some(player_id);
        self.state = ClientState::Joined;
        info!(
            "Joined as {} with {} players and {} solids",
            player_id,
            players.len(),
            self.world.solids().len()
        );
    }

    /// Remote players carry the broadcast peer id; the relay never tells us
    /// which peer controls them.
    fn remote_player(record: &PlayerRecord) -> Player {
        Player::from_record(record, PeerId::BROADCAST, MovementParams::default())
    }

    fn handle_world_init(&mut self, items: Vec<ItemState>, machines: Vec<MachineState>) {
        for state in items {
            self.world.insert_item(self.catalog.create(state));
        }
        for machine in machines {
            self.machines.insert(machine.id, machine);
        }
        if !self.world_initialized {
            if let Some(player_id) = self.player_id {
                self.world_initialized = true;
                self.events.publish(GameEvent::WorldInitialized { player_id });
            }
        }
    }

    fn handle_state(&mut self, tick: u32, full: bool, entities: Vec<EntitySnapshot>) {
        trace!(
            "Broadcast {} ({}): {} entities",
            tick,
            if full { "full" } else { "delta" },
            entities.len()
        );
        for snapshot in &entities {
            match snapshot.kind {
                ObjectKind::Player if Some(snapshot.id) == self.player_id => {
                    self.reconcile(snapshot);
                }
                ObjectKind::Player => {
                    if self.world.player(snapshot.id).is_none() {
                        trace!("State for unknown player {}", snapshot.id);
                        continue;
                    }
                    self.interpolator
                        .record(snapshot.id, snapshot.position, snapshot.velocity, tick);
                }
                ObjectKind::Item => {
                    let Some(item) = self.world.item_mut(snapshot.id) else {
                        trace!("State for unknown item {}", snapshot.id);
                        continue;
                    };
                    if !self
                        .interpolator
                        .record(snapshot.id, snapshot.position, snapshot.velocity, tick)
                    {
                        continue;
                    }
                    // Position is eased in by `tick`; sleep state applies now.
                    item.apply_snapshot(&EntitySnapshot {
                        position: item.position(),
                        ..*snapshot
                    });
                }
            }
        }
    }

    /// Keep the prediction unless the host disagrees by more than the
    /// tolerance.
    fn reconcile(&mut self, snapshot: &EntitySnapshot) {
        let tolerance = self.config.snap_tolerance;
        let Some(player) = self.player_id.and_then(|id| self.world.player_mut(id)) else {
            return;
        };
        let error = player.position().distance(snapshot.position);
        if error > tolerance {
            debug!(
                "Snapping {} by {:.1} to host position {:?}",
                snapshot.id, error, snapshot.position
            );
            player.apply_snapshot(snapshot);
            self.corrections += 1;
        }
    }

    fn handle_player_joined(&mut self, record: PlayerRecord) {
        let player_id = record.snapshot.id;
        if Some(player_id) == self.player_id || self.world.player(player_id).is_some() {
            return;
        }
        debug!("{} ({}) joined", player_id, record.username);
        self.world.insert_player(Self::remote_player(&record));
        self.events.publish(GameEvent::PlayerJoined {
            player_id,
            username: record.username,
        });
    }

    fn handle_player_left(&mut self, player_id: EntityId) {
        if self.world.remove_player(player_id).is_none() {
            return;
        }
        self.interpolator.remove(player_id);
        debug!("{} left", player_id);
        self.events.publish(GameEvent::PlayerLeft { player_id });
    }

    fn handle_pickup(&mut self, player_id: EntityId, item_id: EntityId, success: bool) {
        if success {
            self.interpolator.remove(item_id);
            let removed = self.world.remove_item(item_id);
            if Some(player_id) == self.player_id {
                match (removed, self.world.player_mut(player_id)) {
                    (Some(item), Some(player)) => {
                        if player.inventory_mut().insert(item.into_state()).is_err() {
                            warn!("Local inventory full; item {} not mirrored", item_id);
                        }
                    }
                    _ => warn!("Picked up item {} missing from the shadow world", item_id),
                }
            }
        }
        self.events.publish(GameEvent::ItemPickedUp {
            player_id,
            item_id,
            success,
        });
    }

    fn handle_drop(&mut self, player_id: EntityId, item: ItemState) {
        if Some(player_id) == self.player_id {
            if let Some(player) = self.world.player_mut(player_id) {
                player.inventory_mut().take(item.id);
            }
        }
        self.interpolator.remove(item.id);
        self.world.insert_item(self.catalog.create(item));
        self.events.publish(GameEvent::ItemDropped {
            player_id,
            item_id: item.id,
        });
    }

    fn handle_use(&mut self, player_id: EntityId, item_id: EntityId, kind: ItemKind, consumed: bool) {
        if Some(player_id) == self.player_id {
            if let Some(player) = self.world.player_mut(player_id) {
                if let Some(state) = player.inventory().get(item_id).copied() {
                    // Mirror the effect (e.g. a coin's value) on our own player.
                    self.catalog.use_item(&state, player);
                    if consumed {
                        player.inventory_mut().take(item_id);
                    }
                }
            }
        }
        self.events.publish(GameEvent::ItemUsed {
            player_id,
            item_id,
            kind,
        });
    }

    fn handle_spawn(&mut self, machine_id: MachineId, items: Vec<ItemState>) {
        debug!("Machine {} spawned {} items", machine_id, items.len());
        let item_ids = items.iter().map(|item| item.id).collect();
        for state in items {
            self.world.insert_item(self.catalog.create(state));
        }
        self.events.publish(GameEvent::ItemsSpawned { item_ids });
    }

    /// React to relay-level events.
    pub fn handle_connection_event(&mut self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Joined(peer) => {
                info!("Relay assigned us {}", peer);
                self.peer = Some(*peer);
                self.events.publish(GameEvent::ConnectionChanged {
                    connected: true,
                    reason: None,
                });
            }
            ConnectionEvent::HostDisconnected => self.disconnect("host disconnected".into()),
            ConnectionEvent::LinkClosed(reason) => self.disconnect(reason.clone()),
            ConnectionEvent::RelayError(message) => warn!("Relay error: {}", message),
            ConnectionEvent::LobbyCreated(_)
            | ConnectionEvent::PeerJoined(_)
            | ConnectionEvent::PeerLeft(_) => {
                trace!("Ignoring host-side event {:?}", event);
            }
        }
    }

    fn disconnect(&mut self, reason: String) {
        warn!("Session ended: {}", reason);
        self.reset();
        self.state = ClientState::Disconnected(reason.clone());
        self.events.publish(GameEvent::ConnectionChanged {
            connected: false,
            reason: Some(reason),
        });
    }

    /// One frame: age the buffers, ease shadows toward their targets and
    /// predict our own player.
    #[instrument(skip(self), fields(tracked = self.interpolator.tracked()))]
    pub fn tick(&mut self, dt: f32) {
        if !self.is_joined() {
            return;
        }
        self.interpolator.advance(dt);

        let remote: Vec<EntityId> = self
            .world
            .players()
            .map(|player| player.id())
            .filter(|id| Some(*id) != self.player_id)
            .collect();
        for id in remote {
            let Some(target) = self.interpolator.target(id) else {
                continue;
            };
            if let Some(player) = self.world.player_mut(id) {
                let mut snapshot = player.snapshot();
                snapshot.position = self.interpolator.smooth(player.position(), target.position, dt);
                snapshot.velocity = target.velocity;
                player.apply_snapshot(&snapshot);
            }
        }

        let items: Vec<EntityId> = self.world.items().map(|item| item.id()).collect();
        for id in items {
            let Some(target) = self.interpolator.target(id) else {
                continue;
            };
            if let Some(item) = self.world.item_mut(id) {
                let mut snapshot = item.snapshot();
                snapshot.position = self.interpolator.smooth(item.position(), target.position, dt);
                item.apply_snapshot(&snapshot);
            }
        }

        if let Some(id) = self.player_id {
            self.world.step_player(&self.config.physics, id, dt);
        }
    }

    /// Position a shadow is currently drawn at.
    pub fn shadow_position(&self, id: EntityId) -> Option<Vec2> {
        self.world
            .player(id)
            .map(Player::position)
            .or_else(|| self.world.item(id).map(|item| item.position()))
    }
}

impl PacketHandler for ClientSession {
    fn handle_packet(&mut self, packet: InboundPacket) -> Result<()> {
        if packet.message.origin() != Role::Host {
            warn!(
                "Dropping client-only message tag {} from {:?}",
                packet.message.tag(),
                packet.source
            );
            return Ok(());
        }

        match packet.message {
            Message::JoinAccept {
                player_id,
                world_bounds,
                players,
                solids,
            } => self.handle_accept(player_id, world_bounds, players, solids),
            Message::JoinReject { reason } => {
                warn!("Join rejected: {}", reason);
                self.reset();
                self.state = ClientState::Rejected(reason.clone());
                self.events.publish(GameEvent::ConnectionChanged {
                    connected: false,
                    reason: Some(reason),
                });
            }
            message if !self.is_joined() => {
                trace!("Dropping tag {} before join", message.tag());
            }
            Message::WorldInit { items, machines } => self.handle_world_init(items, machines),
            Message::StateBroadcast {
                tick,
                full,
                entities,
            } => self.handle_state(tick, full, entities),
            Message::PlayerJoined { player } => self.handle_player_joined(player),
            Message::PlayerLeft { player_id } => self.handle_player_left(player_id),
            Message::ItemPickupBroadcast {
                player_id,
                item_id,
                success,
            } => self.handle_pickup(player_id, item_id, success),
            Message::ItemDropBroadcast { player_id, item } => self.handle_drop(player_id, item),
            Message::ItemUseBroadcast {
                player_id,
                item_id,
                kind,
                consumed,
            } => self.handle_use(player_id, item_id, kind, consumed),
            Message::ItemSpawnBroadcast { machine_id, items } => {
                self.handle_spawn(machine_id, items)
            }
            other => trace!("No handler for tag {}", other.tag()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaysync_net::protocol::tags;
    use relaysync_net::ItemAttributes;
    use relaysync_testkit::{test_arena, RecordingOutbound, ARENA_HEIGHT, ARENA_WIDTH};
    use relaysync_world::GeometryProvider;

    const OWN: EntityId = EntityId(2);
    const OTHER: EntityId = EntityId(1);

    fn client() -> (ClientSession, Arc<RecordingOutbound>) {
        let outbound = Arc::new(RecordingOutbound::new());
        let session = ClientSession::new(
            ClientConfig::default(),
            ItemCatalog::standard(),
            outbound.clone(),
            EventBus::new(),
        );
        (session, outbound)
    }

    fn from_host(message: Message) -> InboundPacket {
        InboundPacket {
            source: Some(PeerId::HOST),
            channel: message.channel(),
            delivery: message.delivery(),
            message,
        }
    }

    fn record(id: EntityId, name: &str, position: Vec2) -> PlayerRecord {
        PlayerRecord {
            username: name.into(),
            snapshot: EntitySnapshot {
                kind: ObjectKind::Player,
                id,
                position,
                velocity: Vec2::ZERO,
                mass: 1.0,
                awake: true,
            },
        }
    }

    fn gem(id: u32, position: Vec2) -> ItemState {
        ItemState {
            id: EntityId(id),
            position,
            velocity: Vec2::ZERO,
            mass: 1.0,
            awake: false,
            attributes: ItemAttributes::Gem { carat: 1 },
        }
    }

    fn accept() -> Message {
        let arena = test_arena();
        Message::JoinAccept {
            player_id: OWN,
            world_bounds: arena.bounds(),
            players: vec![
                record(OTHER, "host", Vec2::new(100.0, 200.0)),
                record(OWN, "me", Vec2::new(40.0, 100.0)),
            ],
            solids: arena.solids().collect(),
        }
    }

    fn joined() -> (ClientSession, Arc<RecordingOutbound>) {
        let (mut session, outbound) = client();
        session.handle_connection_event(&ConnectionEvent::Joined(PeerId(3)));
        session.begin_join("me", MovementParams::default()).unwrap();
        session.handle_packet(from_host(accept())).unwrap();
        session
            .handle_packet(from_host(Message::WorldInit {
                items: vec![gem(10, Vec2::new(44.0, 104.0))],
                machines: Vec::new(),
            }))
            .unwrap();
        outbound.take();
        (session, outbound)
    }

    fn state(tick: u32, snapshot: EntitySnapshot) -> Message {
        Message::StateBroadcast {
            tick,
            full: false,
            entities: vec![snapshot],
        }
    }

    #[test]
    fn test_requests_need_a_joined_session() {
        let (mut session, outbound) = client();
        assert!(session.request_pickup(EntityId(1)).is_err());
        assert!(session.send_input(1.0, false).is_err());
        assert!(outbound.is_empty());

        session.begin_join("me", MovementParams::default()).unwrap();
        assert_eq!(session.state(), &ClientState::Joining);
        assert!(matches!(
            outbound.sent_to(Target::Host).as_slice(),
            [Message::JoinRequest { schema_hash, .. }] if *schema_hash == compute_schema_hash()
        ));
    }

    #[test]
    fn test_accept_builds_the_shadow_world() {
        let (mut session, _outbound) = client();
        let events = session.subscribe();
        session.begin_join("me", MovementParams::default()).unwrap();
        session.handle_packet(from_host(accept())).unwrap();
        session
            .handle_packet(from_host(Message::WorldInit {
                items: vec![gem(10, Vec2::new(60.0, 270.0))],
                machines: vec![MachineState {
                    id: 1,
                    rect: Rect::new(300.0, 240.0, 30.0, 40.0),
                    payout: 3,
                }],
            }))
            .unwrap();
        session
            .handle_packet(from_host(Message::WorldInit {
                items: vec![gem(11, Vec2::new(70.0, 270.0))],
                machines: Vec::new(),
            }))
            .unwrap();

        assert!(session.is_joined());
        assert_eq!(session.player_id(), Some(OWN));
        assert_eq!(session.world().bounds(), Rect::new(0.0, 0.0, ARENA_WIDTH, ARENA_HEIGHT));
        assert_eq!(session.world().player_count(), 2);
        assert_eq!(session.world().item_count(), 2);
        assert_eq!(session.machines().count(), 1);
        let initialized = events
            .try_iter()
            .filter(|e| matches!(e, GameEvent::WorldInitialized { player_id } if *player_id == OWN))
            .count();
        assert_eq!(initialized, 1);

        // A repeated accept changes nothing.
        session.handle_packet(from_host(accept())).unwrap();
        assert_eq!(session.world().item_count(), 2);
    }

    #[test]
    fn test_reject_ends_the_attempt() {
        let (mut session, _outbound) = client();
        session.begin_join("me", MovementParams::default()).unwrap();
        session
            .handle_packet(from_host(Message::JoinReject {
                reason: "lobby is full".into(),
            }))
            .unwrap();
        assert_eq!(session.state(), &ClientState::Rejected("lobby is full".into()));
        assert!(session.request_coin_spin(1).is_err());
    }

    #[test]
    fn test_messages_before_accept_are_dropped() {
        let (mut session, _outbound) = client();
        session
            .handle_packet(from_host(Message::PlayerJoined {
                player: record(EntityId(7), "early", Vec2::ZERO),
            }))
            .unwrap();
        assert_eq!(session.world().player_count(), 0);
    }

    #[test]
    fn test_client_messages_are_dropped() {
        let (mut session, _outbound) = joined();
        session
            .handle_packet(from_host(Message::ItemPickupRequest { item_id: EntityId(10) }))
            .unwrap();
        assert!(session.world().item(EntityId(10)).is_some());
    }

    #[test]
    fn test_remote_players_ease_toward_broadcast_state() {
        let (mut session, _outbound) = joined();
        let target = Vec2::new(160.0, 200.0);
        let mut snapshot = record(OTHER, "host", target).snapshot;
        snapshot.velocity = Vec2::new(120.0, 0.0);
        session.handle_packet(from_host(state(5, snapshot))).unwrap();

        let start = session.shadow_position(OTHER).unwrap();
        session.tick(1.0 / 60.0);
        let after_one = session.shadow_position(OTHER).unwrap();
        assert!(after_one.x > start.x && after_one.x < target.x);

        for _ in 0..10 {
            session.tick(1.0 / 60.0);
        }
        let later = session.shadow_position(OTHER).unwrap();
        assert!(later.distance(target) < after_one.distance(target));

        // A late packet from an older broadcast is not buffered.
        let stale = record(OTHER, "host", Vec2::ZERO).snapshot;
        session.handle_packet(from_host(state(4, stale))).unwrap();
        assert_eq!(session.interpolator().target(OTHER).unwrap().tick, 5);
    }

    #[test]
    fn test_stale_states_stop_driving_shadows() {
        let (mut session, _outbound) = joined();
        let snapshot = record(OTHER, "host", Vec2::new(160.0, 200.0)).snapshot;
        session.handle_packet(from_host(state(1, snapshot))).unwrap();
        for _ in 0..15 {
            session.tick(1.0 / 60.0);
        }
        assert!(session.interpolator().target(OTHER).is_none(), "older than 200 ms");
    }

    #[test]
    fn test_own_player_snaps_only_past_tolerance() {
        let (mut session, _outbound) = joined();
        let local = session.local_player().unwrap().position();

        let near = record(OWN, "me", local + Vec2::new(3.0, 0.0)).snapshot;
        session.handle_packet(from_host(state(1, near))).unwrap();
        assert_eq!(session.corrections(), 0);
        assert_eq!(session.local_player().unwrap().position(), local);

        let far = record(OWN, "me", local + Vec2::new(50.0, 0.0)).snapshot;
        session.handle_packet(from_host(state(2, far))).unwrap();
        assert_eq!(session.corrections(), 1);
        assert_eq!(session.local_player().unwrap().position(), far.position);
        assert!(session.interpolator().target(OWN).is_none(), "own player is not a shadow");
    }

    #[test]
    fn test_local_player_is_predicted() {
        let (mut session, outbound) = joined();
        let start = session.local_player().unwrap().position();
        let input = session.send_input(1.0, false).unwrap();
        assert_eq!(input.sequence, 1);
        session.tick(1.0 / 60.0);
        let moved = session.local_player().unwrap().position();
        assert!(moved.x > start.x);
        assert!(moved.y > start.y, "gravity applies while airborne");
        assert_eq!(outbound.count_tag(tags::PLAYER_INPUT), 1);
    }

    #[test]
    fn test_pickup_outcomes() {
        let (mut session, _outbound) = joined();
        let events = session.subscribe();
        session
            .handle_packet(from_host(Message::ItemPickupBroadcast {
                player_id: OTHER,
                item_id: EntityId(10),
                success: false,
            }))
            .unwrap();
        assert!(session.world().item(EntityId(10)).is_some());

        session
            .handle_packet(from_host(Message::ItemPickupBroadcast {
                player_id: OWN,
                item_id: EntityId(10),
                success: true,
            }))
            .unwrap();
        assert!(session.world().item(EntityId(10)).is_none());
        assert!(session.local_player().unwrap().inventory().contains(EntityId(10)));
        assert_eq!(events.try_iter().count(), 2);

        let mut dropped = gem(10, Vec2::new(50.0, 120.0));
        dropped.awake = true;
        session
            .handle_packet(from_host(Message::ItemDropBroadcast {
                player_id: OWN,
                item: dropped,
            }))
            .unwrap();
        assert!(session.local_player().unwrap().inventory().is_empty());
        assert!(session.world().item(EntityId(10)).unwrap().is_awake());
    }

    #[test]
    fn test_used_coins_are_mirrored() {
        let (mut session, _outbound) = joined();
        let coin = ItemState {
            attributes: ItemAttributes::Coin { value: 5 },
            ..gem(20, Vec2::new(44.0, 104.0))
        };
        session
            .handle_packet(from_host(Message::ItemSpawnBroadcast {
                machine_id: 1,
                items: vec![coin],
            }))
            .unwrap();
        session
            .handle_packet(from_host(Message::ItemPickupBroadcast {
                player_id: OWN,
                item_id: coin.id,
                success: true,
            }))
            .unwrap();
        session
            .handle_packet(from_host(Message::ItemUseBroadcast {
                player_id: OWN,
                item_id: coin.id,
                kind: ItemKind::Coin,
                consumed: true,
            }))
            .unwrap();
        let player = session.local_player().unwrap();
        assert_eq!(player.coins(), 5);
        assert!(!player.inventory().contains(coin.id));
    }

    #[test]
    fn test_coin_spin_ids_restart_per_session() {
        let (mut session, _outbound) = joined();
        assert_eq!(session.request_coin_spin(1).unwrap(), 1);
        assert_eq!(session.request_coin_spin(1).unwrap(), 2);

        session.begin_join("me", MovementParams::default()).unwrap();
        session.handle_packet(from_host(accept())).unwrap();
        assert_eq!(session.request_coin_spin(1).unwrap(), 1);
    }

    #[test]
    fn test_players_join_and_leave() {
        let (mut session, _outbound) = joined();
        let newcomer = record(EntityId(9), "late", Vec2::new(40.0, 100.0));
        session
            .handle_packet(from_host(Message::PlayerJoined { player: newcomer.clone() }))
            .unwrap();
        session
            .handle_packet(from_host(Message::PlayerJoined { player: newcomer }))
            .unwrap();
        assert_eq!(session.world().player_count(), 3);

        session
            .handle_packet(from_host(Message::PlayerLeft { player_id: EntityId(9) }))
            .unwrap();
        assert!(session.world().player(EntityId(9)).is_none());
    }

    #[test]
    fn test_host_disconnect_clears_the_session() {
        let (mut session, _outbound) = joined();
        let events = session.subscribe();
        session.handle_connection_event(&ConnectionEvent::HostDisconnected);
        assert_eq!(
            session.state(),
            &ClientState::Disconnected("host disconnected".into())
        );
        assert_eq!(session.world().player_count(), 0);
        assert!(matches!(
            events.try_recv(),
            Ok(GameEvent::ConnectionChanged { connected: false, .. })
        ));
    }
}
