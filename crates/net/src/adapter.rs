//! Transport adapter: the game-facing side of a relay link.
//!
//! Inbound frames arrive on the link's thread. Control strings update the
//! connection state and queue [`ConnectionEvent`]s for the main thread;
//! everything else goes into the packet pipeline. Outbound messages are
//! encoded and handed to the link fire-and-forget.

use crate::channel::{Frame, FrameSink, RelayLink};
use crate::codec::encode_message;
use crate::pipeline::PacketIngress;
use crate::protocol::Message;
use crate::relay::{classify, ControlMessage};
use anyhow::{Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use relaysync_core::PeerId;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

/// Disconnect reason recorded when the lobby host leaves.
pub const HOST_DISCONNECTED_REASON: &str = "host disconnected";

/// Relay session state as seen by a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Link up, no lobby yet (or a register/join is in flight).
    Connecting,
    /// Hosting the lobby with this code.
    Registered {
        /// Lobby code.
        lobby: String,
    },
    /// Joined a lobby as this peer.
    Joined {
        /// Relay-assigned peer id.
        peer: PeerId,
    },
    /// The session ended.
    Disconnected {
        /// Why.
        reason: String,
    },
    /// The relay refused a request.
    Failed {
        /// Relay error message.
        reason: String,
    },
}

impl ConnectionState {
    /// Whether game traffic can flow.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Registered { .. } | Self::Joined { .. })
    }
}

/// Relay-level happenings for the main thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Our lobby was created.
    LobbyCreated(String),
    /// We joined a lobby.
    Joined(PeerId),
    /// A client joined our lobby.
    PeerJoined(PeerId),
    /// A client left our lobby.
    PeerLeft(PeerId),
    /// The lobby host went away.
    HostDisconnected,
    /// The relay reported an error.
    RelayError(String),
    /// The link itself closed.
    LinkClosed(String),
}

/// Where an outbound message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The lobby host.
    Host,
    /// One client.
    Peer(PeerId),
    /// Every client.
    Broadcast,
}

impl Target {
    /// Relay peer id for this target.
    pub fn peer_id(self) -> PeerId {
        match self {
            Target::Host => PeerId::HOST,
            Target::Peer(peer) => peer,
            Target::Broadcast => PeerId::BROADCAST,
        }
    }
}

/// Fire-and-forget message sending.
pub trait Outbound: Send + Sync {
    /// Encode and send `message` to `target`.
    fn send(&self, target: Target, message: &Message) -> Result<()>;
}

/// Receives a link's inbound frames. Create it first, hand it to the link,
/// then wrap both in a [`TransportAdapter`].
pub struct AdapterSink {
    state: Mutex<ConnectionState>,
    events_tx: Sender<ConnectionEvent>,
    events_rx: Receiver<ConnectionEvent>,
    ingress: PacketIngress,
}

impl AdapterSink {
    /// Sink feeding game payloads into `ingress`.
    pub fn new(ingress: PacketIngress) -> Arc<Self> {
        let (events_tx, events_rx) = unbounded();
        Arc::new(Self {
            state: Mutex::new(ConnectionState::Connecting),
            events_tx,
            events_rx,
            ingress,
        })
    }

    fn lock_state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: ConnectionState) {
        let mut state = self.lock_state();
        if *state != next {
            info!("Connection state {:?} -> {:?}", *state, next);
            *state = next;
        }
    }

    fn emit(&self, event: ConnectionEvent) {
        // The receiver lives in `self`, so this cannot fail.
        let _ = self.events_tx.send(event);
    }

    fn handle_control(&self, control: ControlMessage) {
        match control {
            ControlMessage::LobbyCreated(code) => {
                self.set_state(ConnectionState::Registered {
                    lobby: code.clone(),
                });
                self.emit(ConnectionEvent::LobbyCreated(code));
            }
            ControlMessage::ClientJoined(peer) => {
                let hosting = matches!(*self.lock_state(), ConnectionState::Registered { .. });
                if hosting {
                    self.emit(ConnectionEvent::PeerJoined(peer));
                } else {
                    self.set_state(ConnectionState::Joined { peer });
                    self.emit(ConnectionEvent::Joined(peer));
                }
            }
            ControlMessage::ClientLeft(peer) => self.emit(ConnectionEvent::PeerLeft(peer)),
            ControlMessage::HostDisconnected => {
                self.set_state(ConnectionState::Disconnected {
                    reason: HOST_DISCONNECTED_REASON.into(),
                });
                self.emit(ConnectionEvent::HostDisconnected);
            }
            ControlMessage::Error(message) => {
                warn!("Relay error: {}", message);
                if !self.lock_state().is_active() {
                    self.set_state(ConnectionState::Failed {
                        reason: message.clone(),
                    });
                }
                self.emit(ConnectionEvent::RelayError(message));
            }
            ControlMessage::KeepAlive => trace!("Keep-alive"),
            other => warn!("Ignoring relay-bound control message {}", other),
        }
    }
}

impl FrameSink for AdapterSink {
    fn on_frame(&self, frame: Frame) {
        if let Some(control) = classify(&frame.payload) {
            debug!("Control from relay: {}", control);
            self.handle_control(control);
            return;
        }
        let delivery = frame.channel.delivery();
        self.ingress
            .enqueue(Some(frame.peer), &frame.payload, frame.channel, delivery);
    }

    fn on_closed(&self, reason: &str) {
        let ended = matches!(
            *self.lock_state(),
            ConnectionState::Disconnected { .. } | ConnectionState::Failed { .. }
        );
        if !ended {
            self.set_state(ConnectionState::Disconnected {
                reason: reason.to_string(),
            });
        }
        self.emit(ConnectionEvent::LinkClosed(reason.to_string()));
    }
}

/// A relay link plus its inbound sink.
pub struct TransportAdapter {
    sink: Arc<AdapterSink>,
    link: Box<dyn RelayLink>,
}

impl TransportAdapter {
    /// Wrap a link that was connected with `sink`.
    pub fn new(sink: Arc<AdapterSink>, link: Box<dyn RelayLink>) -> Self {
        Self { sink, link }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.sink.lock_state().clone()
    }

    /// Send a relay control message. Register and join requests move the
    /// state back to `Connecting` until the relay answers.
    pub fn send_control(&self, control: ControlMessage) -> Result<()> {
        if matches!(
            control,
            ControlMessage::HostRegister | ControlMessage::ClientJoin(_)
        ) {
            self.sink.set_state(ConnectionState::Connecting);
        }
        self.link
            .send(control.to_frame(PeerId::HOST))
            .with_context(|| format!("Failed to send {}", control))
    }

    /// Send a liveness ping to the relay.
    pub fn keep_alive(&self) -> Result<()> {
        self.send_control(ControlMessage::KeepAlive)
    }

    /// Take every queued connection event.
    pub fn poll_events(&self) -> Vec<ConnectionEvent> {
        self.sink.events_rx.try_iter().collect()
    }

    /// Whether the underlying link is open.
    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }

    /// Close the link.
    pub fn close(&self) {
        self.link.close();
        self.sink.set_state(ConnectionState::Disconnected {
            reason: "closed locally".into(),
        });
    }
}

impl Outbound for TransportAdapter {
    fn send(&self, target: Target, message: &Message) -> Result<()> {
        let payload = encode_message(message)
            .with_context(|| format!("Failed to encode message tag {}", message.tag()))?;
        trace!(
            "Sending tag {} ({} bytes) to {:?}",
            message.tag(),
            payload.len(),
            target
        );
        self.link
            .send(Frame::new(target.peer_id(), message.channel(), payload))
    }
}
