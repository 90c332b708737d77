//! Player entities.

use crate::inventory::Inventory;
use glam::Vec2;
use relaysync_core::{EntityId, EntitySnapshot, ObjectKind, PeerId};
use relaysync_net::{InputState, MovementParams, PlayerRecord, Replicated};
use relaysync_physics::{BodyState, Hitbox, PhysicsBody, PhysicsConfig, StepOutcome};
use tracing::trace;

/// Player collision box width.
pub const PLAYER_WIDTH: f32 = 16.0;
/// Player collision box height.
pub const PLAYER_HEIGHT: f32 = 24.0;

/// A participant-controlled body.
///
/// Every mutation of replicated state goes through a method that marks the
/// player dirty.
#[derive(Debug, Clone)]
pub struct Player {
    id: EntityId,
    peer: PeerId,
    username: String,
    position: Vec2,
    velocity: Vec2,
    hitbox: Hitbox,
    movement: MovementParams,
    input: InputState,
    last_sequence: Option<u32>,
    grounded: bool,
    inventory: Inventory,
    coins: u64,
    dirty: bool,
}

impl Player {
    /// New player at `position`, dirty so it goes out in the next broadcast.
    pub fn new(
        id: EntityId,
        peer: PeerId,
        username: impl Into<String>,
        position: Vec2,
        movement: MovementParams,
        inventory: Inventory,
    ) -> Self {
        Self {
            id,
            peer,
            username: username.into(),
            position,
            velocity: Vec2::ZERO,
            hitbox: Hitbox::sized(PLAYER_WIDTH, PLAYER_HEIGHT),
            movement,
            input: InputState::default(),
            last_sequence: None,
            grounded: false,
            inventory,
            coins: 0,
            dirty: true,
        }
    }

    /// Rebuild a player from a replicated record (client side).
    pub fn from_record(record: &PlayerRecord, peer: PeerId, movement: MovementParams) -> Self {
        let mut player = Self::new(
            record.snapshot.id,
            peer,
            record.username.clone(),
            record.snapshot.position,
            movement,
            Inventory::default(),
        );
        player.velocity = record.snapshot.velocity;
        player.movement.mass = record.snapshot.mass;
        player
    }

    /// Entity id.
    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Relay peer controlling this player.
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Display name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Position.
    pub fn position(&self) -> Vec2 {
        self.position
    }

    /// Velocity.
    pub fn velocity(&self) -> Vec2 {
        self.velocity
    }

    /// Collision box.
    pub fn hitbox(&self) -> Hitbox {
        self.hitbox
    }

    /// Movement tuning.
    pub fn movement(&self) -> MovementParams {
        self.movement
    }

    /// Whether the player stood on something after the last step.
    pub fn is_grounded(&self) -> bool {
        self.grounded
    }

    /// Teleport.
    pub fn set_position(&mut self, position: Vec2) {
        if self.position != position {
            self.position = position;
            self.dirty = true;
        }
    }

    /// Overwrite velocity.
    pub fn set_velocity(&mut self, velocity: Vec2) {
        if self.velocity != velocity {
            self.velocity = velocity;
            self.dirty = true;
        }
    }

    /// Take position and velocity from an authoritative snapshot.
    pub fn apply_snapshot(&mut self, snapshot: &EntitySnapshot) {
        self.set_position(snapshot.position);
        self.set_velocity(snapshot.velocity);
    }

    /// Force the player into the next delta broadcast.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Latest accepted input.
    pub fn input(&self) -> InputState {
        self.input
    }

    /// Forget the last accepted input sequence. The next input is accepted
    /// whatever its sequence.
    pub fn reset_input_sequence(&mut self) {
        self.last_sequence = None;
    }

    /// Store `input` if its sequence is newer than the last accepted one.
    pub fn apply_input(&mut self, input: InputState) -> bool {
        if matches!(self.last_sequence, Some(last) if input.sequence <= last) {
            trace!(
                "Player {} dropped stale input {} (last {:?})",
                self.id,
                input.sequence,
                self.last_sequence
            );
            return false;
        }
        self.last_sequence = Some(input.sequence);
        self.input = input;
        true
    }

    /// Turn the stored input into velocity. Jumping needs ground contact.
    pub fn apply_controls(&mut self) {
        let mut velocity = self.velocity;
        velocity.x = self.input.move_x.clamp(-1.0, 1.0) * self.movement.speed;
        if self.input.jump && self.grounded {
            velocity.y = -self.movement.jump_velocity;
            self.grounded = false;
        }
        self.set_velocity(velocity);
    }

    /// Carried items.
    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Carried items, mutably.
    pub fn inventory_mut(&mut self) -> &mut Inventory {
        &mut self.inventory
    }

    /// Coin balance.
    pub fn coins(&self) -> u64 {
        self.coins
    }

    /// Add to the coin balance.
    pub fn add_coins(&mut self, amount: u64) {
        self.coins = self.coins.saturating_add(amount);
    }

    /// Identity plus current body state.
    pub fn record(&self) -> PlayerRecord {
        PlayerRecord {
            username: self.username.clone(),
            snapshot: self.snapshot(),
        }
    }
}

impl Replicated for Player {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            kind: ObjectKind::Player,
            id: self.id,
            position: self.position,
            velocity: self.velocity,
            mass: self.movement.mass,
            awake: true,
        }
    }

    fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl PhysicsBody for Player {
    fn body_state(&self) -> BodyState {
        BodyState {
            position: self.position,
            velocity: self.velocity,
            hitbox: self.hitbox,
            mass: self.movement.mass,
        }
    }

    fn apply_outcome(&mut self, outcome: StepOutcome, _config: &PhysicsConfig) {
        self.grounded = outcome.is_grounded || outcome.landed;
        self.set_position(outcome.position);
        self.set_velocity(outcome.velocity);
    }
}
