//! Client-side smoothing of remote entities.
//!
//! Each shadow entity keeps a short buffer of host states stamped with the
//! client's local receipt time. Entries older than the max age are evicted
//! and the shadow eases toward the newest remaining entry.

use glam::Vec2;
use relaysync_core::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Interpolation tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    /// States kept per entity.
    pub depth: usize,
    /// Age in milliseconds after which a state is discarded.
    pub max_age_ms: u64,
    /// Smoothing rate per second.
    pub speed: f32,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            depth: 5,
            max_age_ms: 200,
            speed: 10.0,
        }
    }
}

impl InterpolationConfig {
    fn max_age_secs(&self) -> f64 {
        self.max_age_ms as f64 / 1000.0
    }
}

/// One received host state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferedState {
    /// Position.
    pub position: Vec2,
    /// Velocity.
    pub velocity: Vec2,
    /// Local receipt time in seconds.
    pub timestamp: f64,
    /// Host broadcast tick.
    pub tick: u32,
}

/// Bounded FIFO of host states for one entity.
#[derive(Debug, Clone)]
pub struct StateBuffer {
    entries: VecDeque<BufferedState>,
    depth: usize,
    max_age: f64,
}

impl StateBuffer {
    /// Buffer holding up to `depth` entries, each valid for `max_age` seconds.
    pub fn new(depth: usize, max_age: f64) -> Self {
        let depth = depth.max(1);
        Self {
            entries: VecDeque::with_capacity(depth),
            depth,
            max_age,
        }
    }

    /// Append a state, evicting the oldest when full.
    ///
    /// States from an older host tick than the newest buffered one arrived
    /// out of order and are discarded; returns whether the state was kept.
    pub fn push(&mut self, state: BufferedState) -> bool {
        if let Some(newest) = self.entries.back() {
            if state.tick < newest.tick {
                return false;
            }
        }
        if self.entries.len() >= self.depth {
            self.entries.pop_front();
        }
        self.entries.push_back(state);
        true
    }

    /// Drop entries older than the max age at local time `now`.
    pub fn evict_stale(&mut self, now: f64) -> usize {
        let before = self.entries.len();
        let max_age = self.max_age;
        self.entries.retain(|entry| now - entry.timestamp <= max_age);
        before - self.entries.len()
    }

    /// Newest valid entry.
    pub fn target(&self) -> Option<&BufferedState> {
        self.entries.back()
    }

    /// Highest buffered host tick.
    pub fn latest_tick(&self) -> Option<u32> {
        self.entries.back().map(|e| e.tick)
    }

    /// Entries oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &BufferedState> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Per-entity buffers plus the local clock used to stamp them.
#[derive(Debug, Clone)]
pub struct ShadowInterpolator {
    config: InterpolationConfig,
    clock: f64,
    buffers: HashMap<EntityId, StateBuffer>,
}

impl ShadowInterpolator {
    /// Empty interpolator with its clock at zero.
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            clock: 0.0,
            buffers: HashMap::new(),
        }
    }

    /// Current local time in seconds.
    pub fn clock(&self) -> f64 {
        self.clock
    }

    /// Tuning in use.
    pub fn config(&self) -> &InterpolationConfig {
        &self.config
    }

    /// Advance the local clock and evict stale entries everywhere.
    pub fn advance(&mut self, dt: f32) {
        self.clock += f64::from(dt);
        let now = self.clock;
        for buffer in self.buffers.values_mut() {
            buffer.evict_stale(now);
        }
    }

    /// Buffer a host state received now.
    pub fn record(&mut self, id: EntityId, position: Vec2, velocity: Vec2, tick: u32) -> bool {
        let depth = self.config.depth;
        let max_age = self.config.max_age_secs();
        let state = BufferedState {
            position,
            velocity,
            timestamp: self.clock,
            tick,
        };
        self.buffers
            .entry(id)
            .or_insert_with(|| StateBuffer::new(depth, max_age))
            .push(state)
    }

    /// Newest valid state for `id`.
    pub fn target(&self, id: EntityId) -> Option<BufferedState> {
        self.buffers.get(&id).and_then(|b| b.target().copied())
    }

    /// Buffer for `id`.
    pub fn buffer(&self, id: EntityId) -> Option<&StateBuffer> {
        self.buffers.get(&id)
    }

    /// Stop tracking `id`.
    pub fn remove(&mut self, id: EntityId) {
        self.buffers.remove(&id);
    }

    /// Forget every entity.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// Number of tracked entities.
    pub fn tracked(&self) -> usize {
        self.buffers.len()
    }

    /// Ease `current` toward `target` at the configured speed.
    pub fn smooth(&self, current: Vec2, target: Vec2, dt: f32) -> Vec2 {
        smooth(current, target, self.config.speed, dt)
    }
}

/// Exponential smoothing step: `lerp(current, target, clamp(speed * dt, 0, 1))`.
pub fn smooth(current: Vec2, target: Vec2, speed: f32, dt: f32) -> Vec2 {
    current.lerp(target, (speed * dt).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(x: f32, timestamp: f64, tick: u32) -> BufferedState {
        BufferedState {
            position: Vec2::new(x, 0.0),
            velocity: Vec2::ZERO,
            timestamp,
            tick,
        }
    }

    #[test]
    fn test_buffer_keeps_newest_five() {
        let mut buffer = StateBuffer::new(5, 0.2);
        for i in 0..6 {
            buffer.push(state(i as f32, 0.0, i));
        }
        assert_eq!(buffer.len(), 5);
        let xs: Vec<f32> = buffer.iter().map(|s| s.position.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_stale_entries_are_never_returned() {
        let mut buffer = StateBuffer::new(5, 0.2);
        buffer.push(state(1.0, 0.0, 1));
        buffer.push(state(2.0, 0.1, 2));

        assert_eq!(buffer.evict_stale(0.25), 1);
        assert_eq!(buffer.target().map(|s| s.position.x), Some(2.0));

        assert_eq!(buffer.evict_stale(0.31), 1);
        assert!(buffer.target().is_none());
    }

    #[test]
    fn test_late_ticks_are_discarded() {
        let mut buffer = StateBuffer::new(5, 0.2);
        assert!(buffer.push(state(1.0, 0.0, 10)));
        assert!(!buffer.push(state(0.0, 0.01, 9)));
        assert_eq!(buffer.latest_tick(), Some(10));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_interpolator_uses_local_clock() {
        let mut interp = ShadowInterpolator::new(InterpolationConfig::default());
        let id = EntityId(3);
        interp.advance(0.05);
        interp.record(id, Vec2::new(10.0, 0.0), Vec2::ZERO, 1);
        assert_eq!(interp.target(id).map(|s| s.timestamp), Some(interp.clock()));

        // 0.25s later the entry is older than 200ms.
        interp.advance(0.25);
        assert!(interp.target(id).is_none());
    }

    #[test]
    fn test_smoothing_converges_without_overshoot() {
        let target = Vec2::new(100.0, 0.0);
        let mut current = Vec2::ZERO;
        for _ in 0..60 {
            current = smooth(current, target, 10.0, 1.0 / 60.0);
            assert!(current.x <= target.x);
        }
        assert!((target.x - current.x) < 1.0);

        // A huge dt snaps straight to the target.
        assert_eq!(smooth(Vec2::ZERO, target, 10.0, 5.0), target);
    }
}
