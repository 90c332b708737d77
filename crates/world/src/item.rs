//! Dropped items and the item capability table.
//!
//! Item kinds are not a class hierarchy. Each kind is described by an
//! [`ItemDefinition`] composed of optional behaviors (pickup, use, drop) plus a
//! factory that turns wire state into a simulated [`DroppedItem`].

use crate::player::{Player, PLAYER_HEIGHT, PLAYER_WIDTH};
use glam::Vec2;
use relaysync_core::{EntityId, EntitySnapshot, ItemKind};
use relaysync_net::{ItemAttributes, ItemState, Replicated};
use relaysync_physics::{apply_bounce, BodyState, Hitbox, PhysicsBody, PhysicsConfig, StepOutcome};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace};

/// Default pickup reach, measured between centers.
pub const DEFAULT_PICKUP_REACH: f32 = 64.0;

/// Item collision box edge length.
pub const ITEM_SIZE: f32 = 8.0;

/// An item lying in the world.
///
/// Items fall asleep once they come to rest on a surface; sleeping items are
/// skipped by the physics step until woken by a drop or spawn.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedItem {
    state: ItemState,
    hitbox: Hitbox,
    dirty: bool,
}

impl DroppedItem {
    /// Simulated item from wire state with the default hitbox.
    pub fn new(state: ItemState) -> Self {
        Self::with_hitbox(state, Hitbox::sized(ITEM_SIZE, ITEM_SIZE))
    }

    /// Simulated item with a custom hitbox.
    pub fn with_hitbox(state: ItemState, hitbox: Hitbox) -> Self {
        Self {
            state,
            hitbox,
            dirty: true,
        }
    }

    /// Entity id.
    pub fn id(&self) -> EntityId {
        self.state.id
    }

    /// Item kind.
    pub fn kind(&self) -> ItemKind {
        self.state.kind()
    }

    /// Full item state.
    pub fn state(&self) -> &ItemState {
        &self.state
    }

    /// Position.
    pub fn position(&self) -> Vec2 {
        self.state.position
    }

    /// Velocity.
    pub fn velocity(&self) -> Vec2 {
        self.state.velocity
    }

    /// Whether the item is being simulated.
    pub fn is_awake(&self) -> bool {
        self.state.awake
    }

    /// Collision box.
    pub fn hitbox(&self) -> Hitbox {
        self.hitbox
    }

    /// Start simulating again with `velocity`.
    pub fn wake(&mut self, velocity: Vec2) {
        self.state.velocity = velocity;
        self.state.awake = true;
        self.dirty = true;
    }

    /// Take position, velocity and sleep state from a snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &EntitySnapshot) {
        if self.state.position != snapshot.position
            || self.state.velocity != snapshot.velocity
            || self.state.awake != snapshot.awake
        {
            self.state.position = snapshot.position;
            self.state.velocity = snapshot.velocity;
            self.state.awake = snapshot.awake;
            self.dirty = true;
        }
    }

    /// Hand the item state over (for an inventory).
    pub fn into_state(self) -> ItemState {
        self.state
    }
}

impl Replicated for DroppedItem {
    fn entity_id(&self) -> EntityId {
        self.state.id
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn snapshot(&self) -> EntitySnapshot {
        self.state.snapshot()
    }

    fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl PhysicsBody for DroppedItem {
    fn body_state(&self) -> BodyState {
        BodyState {
            position: self.state.position,
            velocity: self.state.velocity,
            hitbox: self.hitbox,
            mass: self.state.mass,
        }
    }

    fn apply_outcome(&mut self, mut outcome: StepOutcome, config: &PhysicsConfig) {
        let bounced = apply_bounce(&mut outcome, config);
        let on_surface = outcome.is_grounded || outcome.landed;
        if on_surface && !bounced && outcome.velocity.y == 0.0 {
            // Ground friction.
            outcome.velocity.x *= config.elasticity;
            if outcome.velocity.x.abs() < config.rest_speed {
                outcome.velocity.x = 0.0;
            }
        }

        if self.state.position != outcome.position || self.state.velocity != outcome.velocity {
            self.state.position = outcome.position;
            self.state.velocity = outcome.velocity;
            self.dirty = true;
        }
        if on_surface && outcome.velocity == Vec2::ZERO {
            trace!("Item {} came to rest at {:?}", self.state.id, outcome.position);
            self.state.awake = false;
            self.dirty = true;
        }
    }

    fn is_simulated(&self) -> bool {
        self.state.awake
    }
}

/// Decides whether a player may pick an item up.
pub trait PickupBehavior: Send + Sync {
    /// Whether `player` may take `item`.
    fn can_pickup(&self, item: &ItemState, player: &Player) -> bool;
}

/// What using an item did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UseEffect {
    /// Whether the item leaves the inventory.
    pub consumed: bool,
}

/// Effect of using a carried item.
pub trait UseBehavior: Send + Sync {
    /// Apply the item to `player`.
    fn apply(&self, item: &ItemState, player: &mut Player) -> UseEffect;
}

/// Placement of an item leaving an inventory.
pub trait DropBehavior: Send + Sync {
    /// Position and launch `item` relative to the dropping `player`.
    fn release(&self, item: &mut ItemState, player: &Player);
}

/// Builds the simulated item for a kind.
pub type ItemFactory = Box<dyn Fn(ItemState) -> DroppedItem + Send + Sync>;

/// Pickup allowed within a center-to-center reach.
#[derive(Debug, Clone, Copy)]
pub struct Collectible {
    /// Maximum distance; `None` means anywhere.
    pub reach: Option<f32>,
}

impl PickupBehavior for Collectible {
    fn can_pickup(&self, item: &ItemState, player: &Player) -> bool {
        let Some(reach) = self.reach else {
            return true;
        };
        let player_center = player.hitbox().at(player.position()).center();
        let item_center = item.position + Vec2::splat(ITEM_SIZE * 0.5);
        player_center.distance(item_center) <= reach
    }
}

/// Coins turn into balance when used.
#[derive(Debug, Clone, Copy, Default)]
pub struct CashIn;

impl UseBehavior for CashIn {
    fn apply(&self, item: &ItemState, player: &mut Player) -> UseEffect {
        if let ItemAttributes::Coin { value } = item.attributes {
            player.add_coins(u64::from(value));
        }
        UseEffect { consumed: true }
    }
}

/// Bombs blast their user upward and are spent on use. A bomb whose fuse
/// has burnt out is a dud.
#[derive(Debug, Clone, Copy)]
pub struct Detonate {
    /// Upward launch speed.
    pub blast: f32,
}

impl Default for Detonate {
    fn default() -> Self {
        Self { blast: 180.0 }
    }
}

impl UseBehavior for Detonate {
    fn apply(&self, item: &ItemState, player: &mut Player) -> UseEffect {
        match item.attributes {
            ItemAttributes::Bomb { fuse } if fuse > 0.0 => {
                debug!("Player {} detonated bomb {}", player.id(), item.id);
                let velocity = player.velocity();
                player.set_velocity(Vec2::new(velocity.x, -self.blast));
            }
            _ => debug!("Bomb {} used by {} was a dud", item.id, player.id()),
        }
        UseEffect { consumed: true }
    }
}

/// Drop at the player's feet with a small launch velocity in the facing
/// direction.
#[derive(Debug, Clone, Copy)]
pub struct Toss {
    /// Launch velocity for a player facing right; x is mirrored when facing left.
    pub launch: Vec2,
}

impl Default for Toss {
    fn default() -> Self {
        Self {
            launch: Vec2::new(40.0, -60.0),
        }
    }
}

impl DropBehavior for Toss {
    fn release(&self, item: &mut ItemState, player: &Player) {
        let facing = if player.input().move_x < 0.0 { -1.0 } else { 1.0 };
        item.position = player.position()
            + Vec2::new(
                (PLAYER_WIDTH - ITEM_SIZE) * 0.5,
                PLAYER_HEIGHT - ITEM_SIZE,
            );
        item.velocity = Vec2::new(self.launch.x * facing, self.launch.y);
        item.awake = true;
    }
}

/// Capabilities of one item kind.
#[derive(Default)]
pub struct ItemDefinition {
    /// Pickup rule; `None` means the item cannot be picked up.
    pub pickup: Option<Box<dyn PickupBehavior>>,
    /// Use effect; `None` means the item cannot be used.
    pub usage: Option<Box<dyn UseBehavior>>,
    /// Drop placement; `None` means the item cannot be dropped.
    pub drop: Option<Box<dyn DropBehavior>>,
    /// Simulated item constructor; `None` uses [`DroppedItem::new`].
    pub factory: Option<ItemFactory>,
}

impl fmt::Debug for ItemDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemDefinition")
            .field("pickup", &self.pickup.is_some())
            .field("usage", &self.usage.is_some())
            .field("drop", &self.drop.is_some())
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

impl ItemDefinition {
    /// Definition with no capabilities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow pickup.
    pub fn with_pickup(mut self, behavior: impl PickupBehavior + 'static) -> Self {
        self.pickup = Some(Box::new(behavior));
        self
    }

    /// Allow use.
    pub fn with_usage(mut self, behavior: impl UseBehavior + 'static) -> Self {
        self.usage = Some(Box::new(behavior));
        self
    }

    /// Allow drop.
    pub fn with_drop(mut self, behavior: impl DropBehavior + 'static) -> Self {
        self.drop = Some(Box::new(behavior));
        self
    }

    /// Custom simulated-item constructor.
    pub fn with_factory(
        mut self,
        factory: impl Fn(ItemState) -> DroppedItem + Send + Sync + 'static,
    ) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }
}

/// Kind to capability table.
#[derive(Debug, Default)]
pub struct ItemCatalog {
    definitions: BTreeMap<ItemKind, ItemDefinition>,
}

impl ItemCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Coins cash in, bombs detonate, gems are only collected.
    pub fn standard() -> Self {
        let reach = Collectible {
            reach: Some(DEFAULT_PICKUP_REACH),
        };
        let mut catalog = Self::new();
        catalog.register(
            ItemKind::Coin,
            ItemDefinition::new()
                .with_pickup(reach)
                .with_usage(CashIn)
                .with_drop(Toss::default()),
        );
        catalog.register(
            ItemKind::Bomb,
            ItemDefinition::new()
                .with_pickup(reach)
                .with_usage(Detonate::default())
                .with_drop(Toss::default())
                .with_factory(|state| DroppedItem::with_hitbox(state, Hitbox::sized(10.0, 10.0))),
        );
        catalog.register(
            ItemKind::Gem,
            ItemDefinition::new()
                .with_pickup(reach)
                .with_drop(Toss::default()),
        );
        catalog
    }

    /// Add or replace a kind's definition.
    pub fn register(&mut self, kind: ItemKind, definition: ItemDefinition) {
        self.definitions.insert(kind, definition);
    }

    /// Definition for `kind`.
    pub fn definition(&self, kind: ItemKind) -> Option<&ItemDefinition> {
        self.definitions.get(&kind)
    }

    /// Registered kinds in tag order.
    pub fn kinds(&self) -> impl Iterator<Item = ItemKind> + '_ {
        self.definitions.keys().copied()
    }

    /// Whether `kind` has a use effect.
    pub fn is_usable(&self, kind: ItemKind) -> bool {
        self.definition(kind).is_some_and(|d| d.usage.is_some())
    }

    /// Whether `kind` can leave an inventory.
    pub fn is_droppable(&self, kind: ItemKind) -> bool {
        self.definition(kind).is_some_and(|d| d.drop.is_some())
    }

    /// Whether `player` may pick `item` up.
    pub fn can_pickup(&self, item: &ItemState, player: &Player) -> bool {
        self.definition(item.kind())
            .and_then(|d| d.pickup.as_ref())
            .is_some_and(|pickup| pickup.can_pickup(item, player))
    }

    /// Apply a use; `None` if the kind is not usable.
    pub fn use_item(&self, item: &ItemState, player: &mut Player) -> Option<UseEffect> {
        let usage = self.definition(item.kind())?.usage.as_ref()?;
        Some(usage.apply(item, player))
    }

    /// Place `item` for dropping; false if the kind cannot be dropped.
    pub fn release(&self, item: &mut ItemState, player: &Player) -> bool {
        match self.definition(item.kind()).and_then(|d| d.drop.as_ref()) {
            Some(drop) => {
                drop.release(item, player);
                true
            }
            None => false,
        }
    }

    /// Build the simulated item for `state`.
    pub fn create(&self, state: ItemState) -> DroppedItem {
        match self.definition(state.kind()).and_then(|d| d.factory.as_ref()) {
            Some(factory) => factory(state),
            None => DroppedItem::new(state),
        }
    }
}
