#![warn(missing_docs)]
//! Simulation state for the platformer: static geometry, players, dropped
//! items, coin machines and the per-tick physics pass over them.

mod geometry;
mod inventory;
mod item;
mod machine;
mod player;

pub use geometry::{ArenaLayout, GeometryProvider, StaticGeometry};
pub use inventory::{Inventory, DEFAULT_INVENTORY_CAPACITY};
pub use item::{
    CashIn, Collectible, Detonate, DropBehavior, DroppedItem, ItemCatalog, ItemDefinition,
    ItemFactory, PickupBehavior, Toss, UseBehavior, UseEffect, DEFAULT_PICKUP_REACH, ITEM_SIZE,
};
pub use machine::{CoinMachine, COINS_PER_SPIN_KEY, SPAWN_CHANCE_KEY};
pub use player::{Player, PLAYER_HEIGHT, PLAYER_WIDTH};

use glam::Vec2;
use relaysync_core::{EntityId, EntitySnapshot, PeerId, Rect};
use relaysync_net::{
    collect_all, collect_dirty, ItemAttributes, ItemState, MachineId, MachineState,
    MovementParams, PlayerRecord, SolidState,
};
use relaysync_physics::{step_bodies_parallel, step_body, PhysicsConfig, PhysicsWorld};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Everything the host simulates.
///
/// Entities live in ordered maps so iteration (and therefore broadcasts and
/// physics) is deterministic.
#[derive(Debug, Clone)]
pub struct World {
    bounds: Rect,
    geometry: Vec<SolidState>,
    collidable: Vec<Rect>,
    players: BTreeMap<EntityId, Player>,
    items: BTreeMap<EntityId, DroppedItem>,
    machines: BTreeMap<MachineId, CoinMachine>,
    next_id: u32,
}

impl World {
    /// Empty world with `bounds` and no solids.
    pub fn new(bounds: Rect) -> Self {
        Self {
            bounds,
            geometry: Vec::new(),
            collidable: Vec::new(),
            players: BTreeMap::new(),
            items: BTreeMap::new(),
            machines: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// World built from a geometry provider.
    pub fn from_geometry(provider: &dyn GeometryProvider) -> Self {
        let mut world = Self::new(provider.bounds());
        world.set_geometry(provider.bounds(), provider.solids().collect());
        world
    }

    /// Replace bounds and static geometry (clients receive them on join).
    pub fn set_geometry(&mut self, bounds: Rect, solids: Vec<SolidState>) {
        self.bounds = bounds;
        self.collidable = solids.iter().filter(|s| s.solid).map(|s| s.rect).collect();
        self.geometry = solids;
        debug!(
            "World geometry: {} rectangles ({} collidable)",
            self.geometry.len(),
            self.collidable.len()
        );
    }

    /// Playable area.
    pub fn bounds(&self) -> Rect {
        self.bounds
    }

    /// Every static rectangle.
    pub fn solids(&self) -> &[SolidState] {
        &self.geometry
    }

    /// Rectangles bodies collide with.
    pub fn collidable(&self) -> &[Rect] {
        &self.collidable
    }

    /// Next unused entity id.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Make sure freshly allocated ids stay above `id` (clients mirror host ids).
    pub fn reserve_id(&mut self, id: EntityId) {
        self.next_id = self.next_id.max(id.0.saturating_add(1));
    }

    /// Spawn a player controlled by `peer`.
    pub fn spawn_player(
        &mut self,
        peer: PeerId,
        username: &str,
        position: Vec2,
        movement: MovementParams,
        inventory_capacity: usize,
    ) -> EntityId {
        let id = self.allocate_id();
        let player = Player::new(
            id,
            peer,
            username,
            position,
            movement,
            Inventory::with_capacity(inventory_capacity),
        );
        self.players.insert(id, player);
        debug!("Spawned player {} ({}) for {}", id, username, peer);
        id
    }

    /// Insert an existing player, keeping its id.
    pub fn insert_player(&mut self, player: Player) {
        self.reserve_id(player.id());
        self.players.insert(player.id(), player);
    }

    /// Remove a player.
    pub fn remove_player(&mut self, id: EntityId) -> Option<Player> {
        self.players.remove(&id)
    }

    /// Look up a player.
    pub fn player(&self, id: EntityId) -> Option<&Player> {
        self.players.get(&id)
    }

    /// Look up a player mutably.
    pub fn player_mut(&mut self, id: EntityId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    /// Player controlled by `peer`.
    pub fn player_for_peer(&self, peer: PeerId) -> Option<EntityId> {
        self.players
            .values()
            .find(|player| player.peer() == peer)
            .map(Player::id)
    }

    /// Players in id order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Number of players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Records of every player, for join accepts.
    pub fn player_records(&self) -> Vec<PlayerRecord> {
        self.players.values().map(Player::record).collect()
    }

    /// Spawn a fresh, awake item.
    pub fn spawn_item(
        &mut self,
        catalog: &ItemCatalog,
        attributes: ItemAttributes,
        position: Vec2,
        velocity: Vec2,
    ) -> EntityId {
        let id = self.allocate_id();
        let state = ItemState {
            id,
            position,
            velocity,
            mass: 1.0,
            awake: true,
            attributes,
        };
        self.items.insert(id, catalog.create(state));
        trace!("Spawned {:?} item {} at {:?}", attributes.kind(), id, position);
        id
    }

    /// Insert an item, keeping its id.
    pub fn insert_item(&mut self, item: DroppedItem) {
        self.reserve_id(item.id());
        self.items.insert(item.id(), item);
    }

    /// Remove an item from the world.
    pub fn remove_item(&mut self, id: EntityId) -> Option<DroppedItem> {
        self.items.remove(&id)
    }

    /// Look up an item.
    pub fn item(&self, id: EntityId) -> Option<&DroppedItem> {
        self.items.get(&id)
    }

    /// Look up an item mutably.
    pub fn item_mut(&mut self, id: EntityId) -> Option<&mut DroppedItem> {
        self.items.get_mut(&id)
    }

    /// Items in id order.
    pub fn items(&self) -> impl Iterator<Item = &DroppedItem> {
        self.items.values()
    }

    /// Number of items in the world.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Wire states of every world item.
    pub fn item_states(&self) -> Vec<ItemState> {
        self.items.values().map(|item| *item.state()).collect()
    }

    /// Add a coin machine.
    pub fn add_machine(&mut self, machine: CoinMachine) {
        self.machines.insert(machine.id(), machine);
    }

    /// Look up a coin machine.
    pub fn machine(&self, id: MachineId) -> Option<&CoinMachine> {
        self.machines.get(&id)
    }

    /// Wire states of every machine.
    pub fn machine_states(&self) -> Vec<MachineState> {
        self.machines.values().map(CoinMachine::state).collect()
    }

    /// Advance players and awake items by `dt`.
    ///
    /// Players first turn their latest input into velocity. Items bounce and
    /// fall asleep once at rest.
    pub fn step_physics(&mut self, config: &PhysicsConfig, dt: f32) {
        let physics = PhysicsWorld::new(self.bounds, &self.collidable, config);

        let mut players: Vec<&mut Player> = self.players.values_mut().collect();
        for player in players.iter_mut() {
            player.apply_controls();
        }
        step_bodies_parallel(&physics, &mut players, dt);

        let mut items: Vec<&mut DroppedItem> = self
            .items
            .values_mut()
            .filter(|item| item.is_awake())
            .collect();
        step_bodies_parallel(&physics, &mut items, dt);
    }

    /// Advance a single player, leaving every other body untouched.
    ///
    /// Clients use this to predict their own player between broadcasts.
    pub fn step_player(&mut self, config: &PhysicsConfig, id: EntityId, dt: f32) -> bool {
        let physics = PhysicsWorld::new(self.bounds, &self.collidable, config);
        match self.players.get_mut(&id) {
            Some(player) => {
                player.apply_controls();
                step_body(&physics, player, dt);
                true
            }
            None => false,
        }
    }

    /// Snapshots of every dirty entity, clearing the flags.
    pub fn collect_dirty(&mut self) -> Vec<EntitySnapshot> {
        let mut snapshots = collect_dirty(self.players.values_mut());
        snapshots.extend(collect_dirty(self.items.values_mut()));
        snapshots
    }

    /// Snapshots of every entity, clearing the flags.
    pub fn collect_all(&mut self) -> Vec<EntitySnapshot> {
        let mut snapshots = collect_all(self.players.values_mut());
        snapshots.extend(collect_all(self.items.values_mut()));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaysync_net::{InputState, Replicated};

    fn arena() -> World {
        World::from_geometry(&ArenaLayout::new(400.0, 300.0).with_floor(20.0).build())
    }

    fn config() -> PhysicsConfig {
        PhysicsConfig {
            gravity_scale: 60.0,
            ..PhysicsConfig::default()
        }
    }

    #[test]
    fn test_ids_are_unique_across_kinds() {
        let mut world = arena();
        let catalog = ItemCatalog::standard();
        let player = world.spawn_player(PeerId(1), "a", Vec2::ZERO, MovementParams::default(), 8);
        let item = world.spawn_item(
            &catalog,
            ItemAttributes::Gem { carat: 2 },
            Vec2::new(50.0, 0.0),
            Vec2::ZERO,
        );
        assert_ne!(player, item);
        assert_eq!(world.player_for_peer(PeerId(1)), Some(player));
    }

    #[test]
    fn test_player_lands_on_floor() {
        let mut world = arena();
        let id = world.spawn_player(
            PeerId(1),
            "a",
            Vec2::new(100.0, 50.0),
            MovementParams::default(),
            8,
        );
        for _ in 0..240 {
            world.step_physics(&config(), 1.0 / 60.0);
        }
        let player = world.player(id).unwrap();
        assert_eq!(player.position().y, 280.0 - PLAYER_HEIGHT);
        assert!(player.is_grounded());
    }

    #[test]
    fn test_input_moves_player() {
        let mut world = arena();
        let id = world.spawn_player(
            PeerId(1),
            "a",
            Vec2::new(100.0, 280.0 - PLAYER_HEIGHT),
            MovementParams::default(),
            8,
        );
        world.player_mut(id).unwrap().apply_input(InputState {
            sequence: 1,
            move_x: 1.0,
            jump: false,
        });
        world.step_physics(&config(), 0.1);
        assert!(world.player(id).unwrap().position().x > 100.0);
    }

    #[test]
    fn test_collect_dirty_clears_flags() {
        let mut world = arena();
        let catalog = ItemCatalog::standard();
        world.spawn_player(PeerId(1), "a", Vec2::ZERO, MovementParams::default(), 8);
        world.spawn_item(
            &catalog,
            ItemAttributes::Coin { value: 1 },
            Vec2::new(10.0, 0.0),
            Vec2::ZERO,
        );

        assert_eq!(world.collect_dirty().len(), 2);
        assert!(world.collect_dirty().is_empty());
        assert_eq!(world.collect_all().len(), 2);
    }

    #[test]
    fn test_sleeping_items_stay_clean() {
        let mut world = arena();
        let catalog = ItemCatalog::standard();
        let id = world.spawn_item(
            &catalog,
            ItemAttributes::Coin { value: 1 },
            Vec2::new(10.0, 200.0),
            Vec2::ZERO,
        );
        for _ in 0..600 {
            world.step_physics(&config(), 1.0 / 60.0);
        }
        assert!(!world.item(id).unwrap().is_awake());
        world.collect_dirty();
        world.step_physics(&config(), 1.0 / 60.0);
        assert!(!world.item(id).unwrap().is_dirty());
    }

    #[test]
    fn test_state_lists() {
        let mut world = arena();
        world.add_machine(CoinMachine::new(3, Rect::new(0.0, 0.0, 10.0, 10.0), 1.0, 2));
        assert_eq!(world.machine_states().len(), 1);
        assert_eq!(world.solids().len(), 1);
        assert_eq!(world.collidable().len(), 1);
        assert!(world.machine(3).is_some());
    }

    #[test]
    fn test_step_player_moves_only_that_player() {
        let mut world = arena();
        let a = world.spawn_player(PeerId(1), "a", Vec2::new(20.0, 50.0), MovementParams::default(), 8);
        let b = world.spawn_player(PeerId(2), "b", Vec2::new(80.0, 50.0), MovementParams::default(), 8);

        assert!(world.step_player(&config(), a, 1.0 / 60.0));
        assert!(world.player(a).unwrap().position().y > 50.0);
        assert_eq!(world.player(b).unwrap().position().y, 50.0);
        assert!(!world.step_player(&config(), EntityId(99), 1.0 / 60.0));
    }
}
