//! Coin machines: static fixtures that pay out coins on a lucky spin.

use crate::item::ITEM_SIZE;
use glam::Vec2;
use rand::Rng;
use relaysync_core::{PropertySource, Rect};
use relaysync_net::{MachineId, MachineState};
use tracing::trace;

/// Property key for the probability that a spin pays out.
pub const SPAWN_CHANCE_KEY: &str = "coin_machine.spawn_chance";
/// Property key for coins paid per successful spin.
pub const COINS_PER_SPIN_KEY: &str = "coin_machine.coins_per_spin";

const DEFAULT_SPAWN_CHANCE: f32 = 0.5;
const DEFAULT_COINS_PER_SPIN: i64 = 3;

/// A coin machine.
#[derive(Debug, Clone, PartialEq)]
pub struct CoinMachine {
    state: MachineState,
    spawn_chance: f32,
}

impl CoinMachine {
    /// Machine with explicit tuning.
    pub fn new(id: MachineId, rect: Rect, spawn_chance: f32, payout: u32) -> Self {
        Self {
            state: MachineState { id, rect, payout },
            spawn_chance: spawn_chance.clamp(0.0, 1.0),
        }
    }

    /// Machine tuned from game properties.
    pub fn from_properties(id: MachineId, rect: Rect, properties: &dyn PropertySource) -> Self {
        let chance = properties.get_f32(SPAWN_CHANCE_KEY, DEFAULT_SPAWN_CHANCE);
        let payout = properties
            .get_i64(COINS_PER_SPIN_KEY, DEFAULT_COINS_PER_SPIN)
            .clamp(0, i64::from(u32::MAX)) as u32;
        Self::new(id, rect, chance, payout)
    }

    /// Machine id.
    pub fn id(&self) -> MachineId {
        self.state.id
    }

    /// Machine bounds.
    pub fn rect(&self) -> Rect {
        self.state.rect
    }

    /// Probability that a spin pays out.
    pub fn spawn_chance(&self) -> f32 {
        self.spawn_chance
    }

    /// Wire description.
    pub fn state(&self) -> MachineState {
        self.state
    }

    /// Roll one spin; returns the number of coins to spawn.
    pub fn spin(&self, rng: &mut impl Rng) -> u32 {
        let roll: f32 = rng.gen();
        let payout = if roll < self.spawn_chance {
            self.state.payout
        } else {
            0
        };
        trace!(
            "Machine {} rolled {:.3} against {:.3}: {} coins",
            self.state.id,
            roll,
            self.spawn_chance,
            payout
        );
        payout
    }

    /// Where the `index`-th coin of a payout appears: a row just above the
    /// machine, centered on it.
    pub fn spawn_point(&self, index: u32, count: u32) -> Vec2 {
        let rect = self.state.rect;
        let spacing = ITEM_SIZE * 1.5;
        let row_width = spacing * count.saturating_sub(1) as f32;
        let x = rect.center().x - row_width * 0.5 + spacing * index as f32 - ITEM_SIZE * 0.5;
        Vec2::new(x, rect.top() - ITEM_SIZE - 1.0)
    }
}
