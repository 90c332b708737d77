//! Relay control plane: control strings and lobby routing.
//!
//! The relay only understands a handful of ASCII control strings. Everything
//! else is forwarded opaquely between a lobby's host and its clients.

use crate::channel::{ChannelType, Frame};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relaysync_core::PeerId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::{debug, info, warn};

/// Characters used in lobby codes (no 0/O or 1/I).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of generated lobby codes.
pub const LOBBY_CODE_LEN: usize = 6;

/// Shortest byte string that can classify as control.
const MIN_CONTROL_LEN: usize = 4;

/// Messages understood by the relay itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Host asks for a new lobby.
    HostRegister,
    /// Client asks to join the lobby with this code.
    ClientJoin(String),
    /// Relay assigned a lobby code to the host.
    LobbyCreated(String),
    /// A client joined. Sent to the joiner and to the host.
    ClientJoined(PeerId),
    /// A client left. Sent to the host.
    ClientLeft(PeerId),
    /// The host went away; the lobby is gone.
    HostDisconnected,
    /// Relay-side failure.
    Error(String),
    /// Liveness ping; carries no state.
    KeepAlive,
}

impl ControlMessage {
    /// Parse a control string. Returns `None` for anything not exactly a
    /// known token or known prefix.
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "HOST_REGISTER" => return Some(Self::HostRegister),
            "HOST_DISCONNECTED" => return Some(Self::HostDisconnected),
            "KEEP_ALIVE" => return Some(Self::KeepAlive),
            _ => {}
        }
        let (prefix, arg) = text.split_once(':')?;
        match prefix {
            "CLIENT_JOIN" if !arg.is_empty() => Some(Self::ClientJoin(arg.to_string())),
            "LOBBY_CREATED" if !arg.is_empty() => Some(Self::LobbyCreated(arg.to_string())),
            "CLIENT_JOINED" => arg.parse().ok().map(|id| Self::ClientJoined(PeerId(id))),
            "CLIENT_LEFT" => arg.parse().ok().map(|id| Self::ClientLeft(PeerId(id))),
            "ERROR" => Some(Self::Error(arg.to_string())),
            _ => None,
        }
    }

    /// Encoded payload bytes.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_string())
    }

    /// Wrap in a control-channel frame.
    pub fn to_frame(&self, peer: PeerId) -> Frame {
        Frame::new(peer, ChannelType::Control, self.to_bytes())
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HostRegister => write!(f, "HOST_REGISTER"),
            Self::ClientJoin(code) => write!(f, "CLIENT_JOIN:{}", code),
            Self::LobbyCreated(code) => write!(f, "LOBBY_CREATED:{}", code),
            Self::ClientJoined(peer) => write!(f, "CLIENT_JOINED:{}", peer.0),
            Self::ClientLeft(peer) => write!(f, "CLIENT_LEFT:{}", peer.0),
            Self::HostDisconnected => write!(f, "HOST_DISCONNECTED"),
            Self::Error(message) => write!(f, "ERROR:{}", message),
            Self::KeepAlive => write!(f, "KEEP_ALIVE"),
        }
    }
}

/// Decide whether a received payload is a control string.
///
/// Control strings are at least four bytes of printable ASCII and match a
/// known token or prefix exactly. Game payloads start with a tag below 0x20,
/// so they never qualify.
pub fn classify(bytes: &[u8]) -> Option<ControlMessage> {
    if bytes.len() < MIN_CONTROL_LEN || !bytes.iter().all(|b| (0x20..=0x7e).contains(b)) {
        return None;
    }
    let text = std::str::from_utf8(bytes).ok()?;
    ControlMessage::parse(text)
}

/// Relay-side handle for one connected participant.
pub type ParticipantId = u64;

/// A frame the router wants delivered to a participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Receiving participant.
    pub to: ParticipantId,
    /// Frame, with `peer` set to the source as seen by the receiver.
    pub frame: Frame,
}

#[derive(Debug)]
struct Lobby {
    host: ParticipantId,
    clients: BTreeMap<PeerId, ParticipantId>,
    next_peer: u32,
}

#[derive(Debug, Clone)]
enum Membership {
    Host { code: String },
    Client { code: String, peer: PeerId },
}

/// Lobby bookkeeping and forwarding rules shared by every relay implementation.
#[derive(Debug)]
pub struct LobbyRouter {
    lobbies: HashMap<String, Lobby>,
    members: HashMap<ParticipantId, Membership>,
    rng: StdRng,
}

impl LobbyRouter {
    /// Router whose lobby codes come from a seeded generator.
    pub fn new(seed: u64) -> Self {
        Self {
            lobbies: HashMap::new(),
            members: HashMap::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Number of open lobbies.
    pub fn lobby_count(&self) -> usize {
        self.lobbies.len()
    }

    /// Number of clients in a lobby.
    pub fn client_count(&self, code: &str) -> usize {
        self.lobbies.get(code).map_or(0, |l| l.clients.len())
    }

    /// Route one frame received from `from`.
    pub fn route(&mut self, from: ParticipantId, frame: Frame) -> Vec<Delivery> {
        if let Some(control) = classify(&frame.payload) {
            return self.handle_control(from, control);
        }
        if frame.channel == ChannelType::Control {
            warn!("Unrecognised control frame from participant {}", from);
            return vec![error_to(from, "unrecognised control message")];
        }

        match self.members.get(&from).cloned() {
            Some(Membership::Host { code }) => self.forward_from_host(&code, frame),
            Some(Membership::Client { code, peer }) => {
                let Some(lobby) = self.lobbies.get(&code) else {
                    return Vec::new();
                };
                vec![Delivery {
                    to: lobby.host,
                    frame: Frame {
                        peer,
                        ..frame
                    },
                }]
            }
            None => {
                debug!("Participant {} sent data outside a lobby", from);
                vec![error_to(from, "not in a lobby")]
            }
        }
    }

    /// Remove a participant and notify whoever needs to know.
    pub fn disconnect(&mut self, participant: ParticipantId) -> Vec<Delivery> {
        match self.members.remove(&participant) {
            Some(Membership::Host { code }) => {
                let Some(lobby) = self.lobbies.remove(&code) else {
                    return Vec::new();
                };
                info!(
                    "Host of lobby {} disconnected; closing {} client(s)",
                    code,
                    lobby.clients.len()
                );
                lobby
                    .clients
                    .into_iter()
                    .map(|(peer, to)| {
                        self.members.remove(&to);
                        Delivery {
                            to,
                            frame: ControlMessage::HostDisconnected.to_frame(peer),
                        }
                    })
                    .collect()
            }
            Some(Membership::Client { code, peer }) => {
                let Some(lobby) = self.lobbies.get_mut(&code) else {
                    return Vec::new();
                };
                lobby.clients.remove(&peer);
                info!("{} left lobby {}", peer, code);
                vec![Delivery {
                    to: lobby.host,
                    frame: ControlMessage::ClientLeft(peer).to_frame(PeerId::HOST),
                }]
            }
            None => Vec::new(),
        }
    }

    fn handle_control(&mut self, from: ParticipantId, control: ControlMessage) -> Vec<Delivery> {
        match control {
            ControlMessage::HostRegister => {
                if self.members.contains_key(&from) {
                    return vec![error_to(from, "already in a lobby")];
                }
                let code = self.fresh_code();
                self.lobbies.insert(
                    code.clone(),
                    Lobby {
                        host: from,
                        clients: BTreeMap::new(),
                        next_peer: 1,
                    },
                );
                self.members
                    .insert(from, Membership::Host { code: code.clone() });
                info!("Lobby {} created", code);
                vec![Delivery {
                    to: from,
                    frame: ControlMessage::LobbyCreated(code).to_frame(PeerId::HOST),
                }]
            }
            ControlMessage::ClientJoin(code) => {
                if self.members.contains_key(&from) {
                    return vec![error_to(from, "already in a lobby")];
                }
                let Some(lobby) = self.lobbies.get_mut(&code) else {
                    debug!("Join for unknown lobby {}", code);
                    return vec![error_to(from, &format!("unknown lobby {}", code))];
                };
                let peer = PeerId(lobby.next_peer);
                lobby.next_peer += 1;
                lobby.clients.insert(peer, from);
                let host = lobby.host;
                self.members.insert(
                    from,
                    Membership::Client {
                        code: code.clone(),
                        peer,
                    },
                );
                info!("{} joined lobby {}", peer, code);
                vec![
                    Delivery {
                        to: from,
                        frame: ControlMessage::ClientJoined(peer).to_frame(PeerId::HOST),
                    },
                    Delivery {
                        to: host,
                        frame: ControlMessage::ClientJoined(peer).to_frame(peer),
                    },
                ]
            }
            ControlMessage::KeepAlive => Vec::new(),
            other => {
                warn!("Participant {} sent relay-only message {}", from, other);
                Vec::new()
            }
        }
    }

    fn forward_from_host(&self, code: &str, frame: Frame) -> Vec<Delivery> {
        let Some(lobby) = self.lobbies.get(code) else {
            return Vec::new();
        };
        let target = frame.peer;
        let stamped = Frame {
            peer: PeerId::HOST,
            ..frame
        };
        if target == PeerId::BROADCAST {
            return lobby
                .clients
                .values()
                .map(|&to| Delivery {
                    to,
                    frame: stamped.clone(),
                })
                .collect();
        }
        match lobby.clients.get(&target) {
            Some(&to) => vec![Delivery { to, frame: stamped }],
            None => {
                debug!("Dropping frame for unknown {} in lobby {}", target, code);
                Vec::new()
            }
        }
    }

    fn fresh_code(&mut self) -> String {
        loop {
            let code: String = (0..LOBBY_CODE_LEN)
                .map(|_| CODE_ALPHABET[self.rng.gen_range(0..CODE_ALPHABET.len())] as char)
                .collect();
            if !self.lobbies.contains_key(&code) {
                return code;
            }
        }
    }
}

fn error_to(to: ParticipantId, message: &str) -> Delivery {
    Delivery {
        to,
        frame: ControlMessage::Error(message.to_string()).to_frame(PeerId::HOST),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOST: ParticipantId = 10;
    const ALICE: ParticipantId = 11;
    const BOB: ParticipantId = 12;

    fn control(text: &str) -> Frame {
        Frame::new(PeerId::HOST, ChannelType::Control, Bytes::from(text.to_string()))
    }

    fn open_lobby(router: &mut LobbyRouter) -> String {
        let out = router.route(HOST, ControlMessage::HostRegister.to_frame(PeerId::HOST));
        match classify(&out[0].frame.payload) {
            Some(ControlMessage::LobbyCreated(code)) => code,
            other => panic!("expected LOBBY_CREATED, got {:?}", other),
        }
    }

    #[test]
    fn test_control_strings_parse_back() {
        let all = [
            ControlMessage::HostRegister,
            ControlMessage::ClientJoin("ABC234".into()),
            ControlMessage::LobbyCreated("ABC234".into()),
            ControlMessage::ClientJoined(PeerId(3)),
            ControlMessage::ClientLeft(PeerId(4)),
            ControlMessage::HostDisconnected,
            ControlMessage::Error("lobby full".into()),
            ControlMessage::KeepAlive,
        ];
        for message in all {
            assert_eq!(classify(&message.to_bytes()), Some(message));
        }
    }

    #[test]
    fn test_classify_rejects_payloads() {
        assert_eq!(classify(b"HOS"), None);
        assert_eq!(classify(b"HELLO"), None);
        assert_eq!(classify(b"CLIENT_JOINED:x"), None);
        assert_eq!(classify(b"CLIENT_JOIN:"), None);
        assert_eq!(classify(&[1, b'H', b'O', b'S', b'T']), None);
        assert_eq!(classify(b"KEEP_ALIVE\n"), None);
    }

    #[test]
    fn test_register_and_join() {
        let mut router = LobbyRouter::new(7);
        let code = open_lobby(&mut router);
        assert_eq!(code.len(), LOBBY_CODE_LEN);

        let out = router.route(ALICE, control(&format!("CLIENT_JOIN:{}", code)));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].to, ALICE);
        assert_eq!(
            classify(&out[0].frame.payload),
            Some(ControlMessage::ClientJoined(PeerId(1)))
        );
        assert_eq!(out[1].to, HOST);
        assert_eq!(router.client_count(&code), 1);
    }

    #[test]
    fn test_unknown_lobby_is_an_error() {
        let mut router = LobbyRouter::new(7);
        let out = router.route(ALICE, control("CLIENT_JOIN:NOPE42"));
        assert_eq!(out.len(), 1);
        assert!(matches!(
            classify(&out[0].frame.payload),
            Some(ControlMessage::Error(_))
        ));
    }

    #[test]
    fn test_forwarding_stamps_peer_ids() {
        let mut router = LobbyRouter::new(7);
        let code = open_lobby(&mut router);
        router.route(ALICE, control(&format!("CLIENT_JOIN:{}", code)));
        router.route(BOB, control(&format!("CLIENT_JOIN:{}", code)));

        let up = router.route(BOB, Frame::new(PeerId::HOST, ChannelType::Items, vec![9u8]));
        assert_eq!(up.len(), 1);
        assert_eq!(up[0].to, HOST);
        assert_eq!(up[0].frame.peer, PeerId(2));

        let direct = router.route(HOST, Frame::new(PeerId(1), ChannelType::Session, vec![3u8]));
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].to, ALICE);
        assert_eq!(direct[0].frame.peer, PeerId::HOST);

        let mut fanout: Vec<ParticipantId> = router
            .route(HOST, Frame::new(PeerId::BROADCAST, ChannelType::State, vec![5u8]))
            .into_iter()
            .map(|d| d.to)
            .collect();
        fanout.sort_unstable();
        assert_eq!(fanout, vec![ALICE, BOB]);
    }

    #[test]
    fn test_disconnects_notify() {
        let mut router = LobbyRouter::new(7);
        let code = open_lobby(&mut router);
        router.route(ALICE, control(&format!("CLIENT_JOIN:{}", code)));
        router.route(BOB, control(&format!("CLIENT_JOIN:{}", code)));

        let out = router.disconnect(ALICE);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, HOST);
        assert_eq!(
            classify(&out[0].frame.payload),
            Some(ControlMessage::ClientLeft(PeerId(1)))
        );

        let out = router.disconnect(HOST);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to, BOB);
        assert_eq!(
            classify(&out[0].frame.payload),
            Some(ControlMessage::HostDisconnected)
        );
        assert_eq!(router.lobby_count(), 0);
        assert!(router.disconnect(BOB).is_empty());
    }

    #[test]
    fn test_keep_alive_is_swallowed() {
        let mut router = LobbyRouter::new(7);
        assert!(router
            .route(ALICE, ControlMessage::KeepAlive.to_frame(PeerId::HOST))
            .is_empty());
    }
}
