#![warn(missing_docs)]
//! Relay transport, wire protocol and replication plumbing shared by the
//! host and client sessions.
//!
//! Layers, bottom up:
//! - [`wire`], [`protocol`], [`codec`]: the binary message catalog.
//! - [`channel`], [`relay`], [`transport`], [`memory`], [`relay_server`]:
//!   relay frames, lobby routing and the QUIC / in-process links.
//! - [`adapter`], [`connection`]: connection state and lobby handshakes.
//! - [`pipeline`]: off-thread decoding with bounded memory.
//! - [`replication`], [`interpolation`], [`ledger`]: state reconciliation.

pub mod adapter;
pub mod channel;
pub mod codec;
pub mod connection;
pub mod interpolation;
pub mod ledger;
pub mod memory;
pub mod pipeline;
pub mod protocol;
pub mod relay;
pub mod relay_server;
pub mod replication;
pub mod transport;
pub mod wire;

pub use adapter::{
    AdapterSink, ConnectionEvent, ConnectionState, Outbound, Target, TransportAdapter,
};
pub use channel::{ChannelManager, ChannelType, DeliveryClass, Frame, FrameSink, RelayLink};
pub use codec::{compute_schema_hash, encode_message, MessageRegistry};
pub use connection::{join_lobby, register_host, ConnectError};
pub use interpolation::{smooth, BufferedState, InterpolationConfig, ShadowInterpolator, StateBuffer};
pub use ledger::RequestLedger;
pub use memory::{MemoryLink, MemoryRelay};
pub use pipeline::{
    InboundPacket, PacketHandler, PacketIngress, PacketPipeline, PipelineConfig, PipelineCounters,
};
pub use protocol::{
    InputState, ItemAttributes, ItemState, MachineId, MachineState, Message, MovementParams,
    PlayerRecord, Role, SolidState, PROTOCOL_VERSION,
};
pub use relay::{classify, ControlMessage, LobbyRouter};
pub use relay_server::QuicRelayServer;
pub use replication::{collect_all, collect_dirty, BroadcastClock, BroadcastKind, Replicated};
pub use transport::{ClientEndpoint, QuicRelayLink, ServerEndpoint};
pub use wire::{WireError, WireResult};
