//! QUIC relay server.
//!
//! Accepts participant connections, runs a [`ChannelManager`] per participant
//! and forwards frames through a shared [`LobbyRouter`].

use crate::channel::{ChannelManager, Frame, FrameSink};
use crate::relay::{Delivery, LobbyRouter, ParticipantId};
use crate::transport::ServerEndpoint;
use anyhow::Result;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

#[derive(Default)]
struct Participants {
    links: Mutex<HashMap<ParticipantId, Arc<ChannelManager>>>,
}

impl Participants {
    fn lock(&self) -> MutexGuard<'_, HashMap<ParticipantId, Arc<ChannelManager>>> {
        self.links.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            let link = self.lock().get(&delivery.to).cloned();
            match link {
                Some(link) => {
                    if let Err(e) = link.send(&delivery.frame) {
                        warn!("Relay send to participant {} failed: {:#}", delivery.to, e);
                    }
                }
                None => debug!("Participant {} already gone", delivery.to),
            }
        }
    }
}

struct ParticipantSink {
    id: ParticipantId,
    router: Arc<Mutex<LobbyRouter>>,
    participants: Arc<Participants>,
}

impl ParticipantSink {
    fn router(&self) -> MutexGuard<'_, LobbyRouter> {
        self.router.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FrameSink for ParticipantSink {
    fn on_frame(&self, frame: Frame) {
        let deliveries = self.router().route(self.id, frame);
        self.participants.dispatch(deliveries);
    }

    fn on_closed(&self, reason: &str) {
        info!("Participant {} disconnected: {}", self.id, reason);
        self.participants.lock().remove(&self.id);
        let deliveries = self.router().disconnect(self.id);
        self.participants.dispatch(deliveries);
    }
}

/// Relay server bound to a UDP address.
pub struct QuicRelayServer {
    endpoint: ServerEndpoint,
    router: Arc<Mutex<LobbyRouter>>,
    participants: Arc<Participants>,
    next_id: AtomicU64,
}

impl QuicRelayServer {
    /// Bind the relay; lobby codes are seeded from `seed`.
    pub fn bind(addr: SocketAddr, seed: u64) -> Result<Self> {
        Ok(Self {
            endpoint: ServerEndpoint::bind(addr)?,
            router: Arc::new(Mutex::new(LobbyRouter::new(seed))),
            participants: Arc::new(Participants::default()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    /// Accept participants until the endpoint closes.
    pub async fn run(&self) -> Result<()> {
        info!("Relay listening on {}", self.local_addr());
        while let Some(incoming) = self.endpoint.accept().await {
            let connection = match incoming.await {
                Ok(connection) => connection,
                Err(e) => {
                    warn!("Incoming connection failed: {}", e);
                    continue;
                }
            };
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            info!(
                "Participant {} connected from {}",
                id,
                connection.remote_address()
            );
            let channels = Arc::new(ChannelManager::new(connection));
            self.participants.lock().insert(id, channels.clone());
            channels.spawn_receivers(Arc::new(ParticipantSink {
                id,
                router: self.router.clone(),
                participants: self.participants.clone(),
            }));
        }
        info!("Relay endpoint closed");
        Ok(())
    }

    /// Stop accepting participants.
    pub fn close(&self) {
        self.endpoint.close();
    }
}
