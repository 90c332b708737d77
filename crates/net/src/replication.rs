//! Dirty-flag state replication and broadcast pacing.
//!
//! Entities mark themselves dirty whenever an authoritative mutation happens.
//! At each broadcast the host collects snapshots of dirty entities and clears
//! their flags in the same pass, so a change is sent exactly once.

use relaysync_core::{EntityId, EntitySnapshot};
use tracing::trace;

/// An entity whose state is replicated to clients.
pub trait Replicated {
    /// Stable id.
    fn entity_id(&self) -> EntityId;
    /// Whether the entity changed since its last broadcast.
    fn is_dirty(&self) -> bool;
    /// Current replicated state.
    fn snapshot(&self) -> EntitySnapshot;
    /// Reset the dirty flag.
    fn clear_dirty(&mut self);
}

/// Snapshot every dirty entity and clear its flag.
pub fn collect_dirty<'a, T, I>(entities: I) -> Vec<EntitySnapshot>
where
    T: Replicated + ?Sized + 'a,
    I: IntoIterator<Item = &'a mut T>,
{
    let mut snapshots = Vec::new();
    for entity in entities {
        if entity.is_dirty() {
            snapshots.push(entity.snapshot());
            entity.clear_dirty();
        }
    }
    trace!("Collected {} dirty entities", snapshots.len());
    snapshots
}

/// Snapshot every entity, clearing all dirty flags.
pub fn collect_all<'a, T, I>(entities: I) -> Vec<EntitySnapshot>
where
    T: Replicated + ?Sized + 'a,
    I: IntoIterator<Item = &'a mut T>,
{
    entities
        .into_iter()
        .map(|entity| {
            let snapshot = entity.snapshot();
            entity.clear_dirty();
            snapshot
        })
        .collect()
}

/// What a broadcast should contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastKind {
    /// Only entities that changed.
    Delta,
    /// Every entity.
    Full,
}

/// Gates broadcasts to a fixed rate regardless of frame rate.
#[derive(Debug, Clone)]
pub struct BroadcastClock {
    interval: f32,
    accumulator: f32,
    full_every: u64,
    sent: u64,
    /// Broadcasts since the last full one.
    since_full: u64,
}

impl BroadcastClock {
    /// Clock firing `rate_hz` times per second; every `full_every`-th
    /// broadcast (starting with the first) is full.
    pub fn new(rate_hz: f32, full_every: u64) -> Self {
        Self {
            interval: 1.0 / rate_hz.max(f32::EPSILON),
            accumulator: 0.0,
            full_every: full_every.max(1),
            sent: 0,
            since_full: 0,
        }
    }

    /// Seconds between broadcasts.
    pub fn interval(&self) -> f32 {
        self.interval
    }

    /// Broadcasts issued so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Advance by `dt`; returns the kind of broadcast due, if any.
    ///
    /// At most one broadcast fires per call and the carried-over remainder is
    /// capped at one interval, so a long frame never causes a burst.
    pub fn advance(&mut self, dt: f32) -> Option<BroadcastKind> {
        self.accumulator += dt;
        if self.accumulator < self.interval {
            return None;
        }
        self.accumulator = (self.accumulator - self.interval).min(self.interval);
        let kind = if self.since_full % self.full_every == 0 {
            self.since_full = 0;
            BroadcastKind::Full
        } else {
            BroadcastKind::Delta
        };
        self.since_full += 1;
        self.sent += 1;
        Some(kind)
    }

    /// Make the next broadcast full (e.g. after a player joins).
    pub fn force_full(&mut self) {
        self.since_full = 0;
    }
}
