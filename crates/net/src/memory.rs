//! In-process relay with synchronous delivery.
//!
//! Routes through the same [`LobbyRouter`] as the QUIC relay server. Used for
//! the local demo and for tests that need a host and clients in one process.

use crate::channel::{Frame, FrameSink, RelayLink};
use crate::relay::{Delivery, LobbyRouter, ParticipantId};
use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

const DEFAULT_SEED: u64 = 0x5eed_1e55;

struct RelayState {
    router: LobbyRouter,
    sinks: HashMap<ParticipantId, Arc<dyn FrameSink>>,
    next_participant: ParticipantId,
}

/// Shared in-process relay.
#[derive(Clone)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl Default for MemoryRelay {
    fn default() -> Self {
        Self::with_seed(DEFAULT_SEED)
    }
}

impl MemoryRelay {
    /// Relay with the default lobby-code seed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Relay whose lobby codes are derived from `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(RelayState {
                router: LobbyRouter::new(seed),
                sinks: HashMap::new(),
                next_participant: 1,
            })),
        }
    }

    /// Attach a participant whose inbound frames go to `sink`.
    pub fn connect(&self, sink: Arc<dyn FrameSink>) -> MemoryLink {
        let mut state = self.lock();
        let participant = state.next_participant;
        state.next_participant += 1;
        state.sinks.insert(participant, sink);
        debug!("Memory relay participant {} connected", participant);
        MemoryLink {
            relay: self.clone(),
            participant,
            open: AtomicBool::new(true),
        }
    }

    /// Number of open lobbies.
    pub fn lobby_count(&self) -> usize {
        self.lock().router.lobby_count()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        // Routing state stays consistent even if a sink panicked elsewhere.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn route(&self, from: ParticipantId, frame: Frame) {
        let deliveries = self.lock().router.route(from, frame);
        self.deliver(deliveries);
    }

    fn disconnect(&self, participant: ParticipantId) {
        let deliveries = {
            let mut state = self.lock();
            state.sinks.remove(&participant);
            state.router.disconnect(participant)
        };
        debug!("Memory relay participant {} disconnected", participant);
        self.deliver(deliveries);
    }

    fn deliver(&self, deliveries: Vec<Delivery>) {
        // Sinks run outside the lock so they may send in turn.
        let targets: Vec<(Arc<dyn FrameSink>, Frame)> = {
            let state = self.lock();
            deliveries
                .into_iter()
                .filter_map(|d| state.sinks.get(&d.to).map(|sink| (sink.clone(), d.frame)))
                .collect()
        };
        for (sink, frame) in targets {
            trace!("Delivering {} bytes from {}", frame.payload.len(), frame.peer);
            sink.on_frame(frame);
        }
    }
}

/// One participant's link into a [`MemoryRelay`].
pub struct MemoryLink {
    relay: MemoryRelay,
    participant: ParticipantId,
    open: AtomicBool,
}

impl MemoryLink {
    /// Relay-side id of this participant.
    pub fn participant(&self) -> ParticipantId {
        self.participant
    }
}

impl RelayLink for MemoryLink {
    fn send(&self, frame: Frame) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            bail!("Memory link {} is closed", self.participant);
        }
        self.relay.route(self.participant, frame);
        Ok(())
    }

    fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.relay.disconnect(self.participant);
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.close();
    }
}
