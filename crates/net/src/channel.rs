//! Logical channels, relay frames and the QUIC channel manager.
//!
//! Reliable frames share one long-lived unidirectional stream per direction so
//! they arrive in order: `[len: u32][peer: u32][channel: u8][payload]`, where
//! `len` covers everything after itself. Unreliable frames are single QUIC
//! datagrams without the length prefix.

use anyhow::{anyhow, Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use quinn::Connection;
use relaysync_core::PeerId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Size of `[peer][channel]`.
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest reliable frame body accepted from the wire.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Channel type identifier for message routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ChannelType {
    /// Relay control strings.
    Control = 0,
    /// Join handshake and player roster (reliable, ordered).
    Session = 1,
    /// Periodic entity state (unreliable).
    State = 2,
    /// Player input (unreliable).
    Input = 3,
    /// Item requests and outcomes (reliable, ordered).
    Items = 4,
}

/// How a frame is carried by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeliveryClass {
    /// Ordered stream; never lost while the link is up.
    ReliableOrdered,
    /// Best-effort datagram.
    Unreliable,
}

impl ChannelType {
    /// Check if this channel type should use reliable delivery.
    pub fn is_reliable(&self) -> bool {
        matches!(
            self,
            ChannelType::Control | ChannelType::Session | ChannelType::Items
        )
    }

    /// Delivery class for this channel.
    pub fn delivery(&self) -> DeliveryClass {
        if self.is_reliable() {
            DeliveryClass::ReliableOrdered
        } else {
            DeliveryClass::Unreliable
        }
    }
}

impl TryFrom<u8> for ChannelType {
    type Error = anyhow::Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ChannelType::Control),
            1 => Ok(ChannelType::Session),
            2 => Ok(ChannelType::State),
            3 => Ok(ChannelType::Input),
            4 => Ok(ChannelType::Items),
            _ => Err(anyhow!("Invalid channel type: {}", value)),
        }
    }
}

/// One unit of relay traffic.
///
/// `peer` is the destination when sending and the source when receiving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Destination (outbound) or source (inbound) peer.
    pub peer: PeerId,
    /// Logical channel.
    pub channel: ChannelType,
    /// Opaque payload.
    pub payload: Bytes,
}

impl Frame {
    /// Build a frame.
    pub fn new(peer: PeerId, channel: ChannelType, payload: impl Into<Bytes>) -> Self {
        Self {
            peer,
            channel,
            payload: payload.into(),
        }
    }

    /// `[peer][channel][payload]`, as sent in a datagram.
    pub fn encode_body(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.put_u32_le(self.peer.0);
        buf.put_u8(self.channel as u8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Length-prefixed body, as written to the reliable stream.
    pub fn encode_reliable(&self) -> Bytes {
        let body_len = FRAME_HEADER_LEN + self.payload.len();
        let mut buf = BytesMut::with_capacity(4 + body_len);
        buf.put_u32_le(body_len as u32);
        buf.put_u32_le(self.peer.0);
        buf.put_u8(self.channel as u8);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Parse `[peer][channel][payload]`.
    pub fn decode_body(body: Bytes) -> Result<Self> {
        if body.len() < FRAME_HEADER_LEN {
            return Err(anyhow!("Frame too short: {} bytes", body.len()));
        }
        let peer = PeerId(u32::from_le_bytes([body[0], body[1], body[2], body[3]]));
        let channel = ChannelType::try_from(body[4])?;
        Ok(Self {
            peer,
            channel,
            payload: body.slice(FRAME_HEADER_LEN..),
        })
    }
}

/// Receives frames from a link. Called from the link's own threads or tasks.
pub trait FrameSink: Send + Sync {
    /// A frame arrived.
    fn on_frame(&self, frame: Frame);
    /// The link closed; no further frames follow.
    fn on_closed(&self, reason: &str);
}

/// A connection to the relay.
pub trait RelayLink: Send + Sync {
    /// Queue a frame; reliable or unreliable per its channel.
    fn send(&self, frame: Frame) -> Result<()>;
    /// Close the link.
    fn close(&self);
    /// Whether frames can still be sent.
    fn is_open(&self) -> bool;
}

/// Frame-level channel manager over one QUIC connection.
///
/// Owns a writer task for the persistent reliable stream; [`Self::spawn_receivers`]
/// starts the reader tasks.
pub struct ChannelManager {
    connection: Connection,
    reliable_tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelManager {
    /// Create a new channel manager. Must be called inside a tokio runtime.
    pub fn new(connection: Connection) -> Self {
        let (reliable_tx, reliable_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_reliable_loop(connection.clone(), reliable_rx));
        Self {
            connection,
            reliable_tx,
        }
    }

    /// Queue a frame on the reliable stream.
    pub fn send_reliable(&self, frame: &Frame) -> Result<()> {
        debug_assert!(frame.channel.is_reliable(), "{:?} is not reliable", frame.channel);
        trace!(
            "Queueing {} bytes on reliable {:?} for {}",
            frame.payload.len(),
            frame.channel,
            frame.peer
        );
        self.reliable_tx
            .send(frame.encode_reliable())
            .map_err(|_| anyhow!("Reliable writer has stopped"))
    }

    /// Send a frame as a datagram.
    pub fn send_unreliable(&self, frame: &Frame) -> Result<()> {
        trace!(
            "Sending {} bytes on unreliable {:?} for {}",
            frame.payload.len(),
            frame.channel,
            frame.peer
        );
        self.connection
            .send_datagram(frame.encode_body())
            .context("Failed to send datagram")
    }

    /// Send a frame on the path its channel calls for.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        match frame.channel.delivery() {
            DeliveryClass::ReliableOrdered => self.send_reliable(frame),
            DeliveryClass::Unreliable => self.send_unreliable(frame),
        }
    }

    /// Start the reliable stream and datagram readers, delivering into `sink`.
    pub fn spawn_receivers(&self, sink: Arc<dyn FrameSink>) {
        tokio::spawn(read_reliable_loop(self.connection.clone(), sink.clone()));
        tokio::spawn(read_datagram_loop(self.connection.clone(), sink));
    }

    /// Get the remote address of this connection.
    pub fn remote_address(&self) -> std::net::SocketAddr {
        self.connection.remote_address()
    }

    /// Whether the connection is still up.
    pub fn is_open(&self) -> bool {
        self.connection.close_reason().is_none()
    }

    /// Close the connection gracefully.
    pub fn close(&self, reason: &str) {
        self.connection.close(0u32.into(), reason.as_bytes());
    }
}

async fn write_reliable_loop(connection: Connection, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    let mut stream = None;
    while let Some(bytes) = rx.recv().await {
        if stream.is_none() {
            match connection.open_uni().await {
                Ok(opened) => stream = Some(opened),
                Err(e) => {
                    warn!("Failed to open reliable stream: {}", e);
                    return;
                }
            }
        }
        if let Some(send) = stream.as_mut() {
            if let Err(e) = send.write_all(&bytes).await {
                warn!("Reliable stream write failed: {}", e);
                return;
            }
        }
    }
    if let Some(mut send) = stream {
        let _ = send.finish();
    }
}

async fn read_reliable_loop(connection: Connection, sink: Arc<dyn FrameSink>) {
    let mut stream = match connection.accept_uni().await {
        Ok(stream) => stream,
        Err(e) => {
            sink.on_closed(&e.to_string());
            return;
        }
    };

    loop {
        let mut len = [0u8; 4];
        if let Err(e) = stream.read_exact(&mut len).await {
            debug!("Reliable stream ended: {}", e);
            sink.on_closed(&e.to_string());
            return;
        }
        let len = u32::from_le_bytes(len) as usize;
        if !(FRAME_HEADER_LEN..=MAX_FRAME_LEN).contains(&len) {
            warn!("Invalid reliable frame length {}; closing", len);
            connection.close(1u32.into(), b"invalid frame length");
            sink.on_closed("invalid frame length");
            return;
        }
        let mut body = vec![0u8; len];
        if let Err(e) = stream.read_exact(&mut body).await {
            sink.on_closed(&e.to_string());
            return;
        }
        match Frame::decode_body(Bytes::from(body)) {
            Ok(frame) => sink.on_frame(frame),
            Err(e) => warn!("Dropping malformed reliable frame: {}", e),
        }
    }
}

async fn read_datagram_loop(connection: Connection, sink: Arc<dyn FrameSink>) {
    // Closure is reported by the reliable reader.
    while let Ok(datagram) = connection.read_datagram().await {
        match Frame::decode_body(datagram) {
            Ok(frame) => sink.on_frame(frame),
            Err(e) => warn!("Dropping malformed datagram: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_delivery() {
        assert_eq!(ChannelType::Control.delivery(), DeliveryClass::ReliableOrdered);
        assert_eq!(ChannelType::Session.delivery(), DeliveryClass::ReliableOrdered);
        assert_eq!(ChannelType::Items.delivery(), DeliveryClass::ReliableOrdered);
        assert_eq!(ChannelType::State.delivery(), DeliveryClass::Unreliable);
        assert_eq!(ChannelType::Input.delivery(), DeliveryClass::Unreliable);
    }

    #[test]
    fn test_channel_type_conversion() {
        for raw in 0..=4u8 {
            let channel = ChannelType::try_from(raw).unwrap();
            assert_eq!(channel as u8, raw);
        }
        assert!(ChannelType::try_from(5).is_err());
    }

    #[test]
    fn test_reliable_frame_layout() {
        let frame = Frame::new(PeerId(3), ChannelType::Items, vec![9u8, 8]);
        let bytes = frame.encode_reliable();
        assert_eq!(&bytes[..4], &7u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &3u32.to_le_bytes());
        assert_eq!(bytes[8], ChannelType::Items as u8);
        assert_eq!(&bytes[9..], &[9, 8]);

        let decoded = Frame::decode_body(bytes.slice(4..)).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_short_body_rejected() {
        assert!(Frame::decode_body(Bytes::from_static(&[1, 0, 0])).is_err());
        assert!(Frame::decode_body(Bytes::from_static(&[1, 0, 0, 0, 9])).is_err());
    }
}
