#![warn(missing_docs)]
//! Test surfaces shared by the workspace: recorded outbound traffic, arena
//! fixtures, the JSONL event log and metrics reports.

mod fixtures;
mod metrics;

use anyhow::{Context, Result};
use relaysync_core::SimTick;
use relaysync_net::{encode_message, Message, Outbound, Target};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

pub use fixtures::*;
pub use metrics::*;

/// Primary event record captured by headless tests.
#[derive(Debug, Serialize)]
pub struct EventRecord<'a> {
    /// Simulation tick when the event occurred.
    pub tick: SimTick,
    /// Human-readable kind label.
    pub kind: &'a str,
    /// Free-form payload.
    pub payload: &'a str,
}

/// A sink that writes newline-delimited JSON to disk.
pub struct JsonlSink {
    file: File,
    lines: u64,
}

impl JsonlSink {
    /// Create a new sink at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
        debug!("Event log opened at {}", path.display());
        Ok(Self { file, lines: 0 })
    }

    /// Append an event to the log.
    pub fn write(&mut self, event: &EventRecord<'_>) -> Result<()> {
        let line = serde_json::to_string(event)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.lines += 1;
        trace!("Logged {} event at tick {}", event.kind, event.tick.0);
        Ok(())
    }

    /// Events written so far.
    pub fn lines(&self) -> u64 {
        self.lines
    }
}

/// [`Outbound`] that keeps every message instead of sending it.
///
/// Messages are encoded first so a message the codec would refuse fails the
/// send just like it would on a real link.
#[derive(Default)]
pub struct RecordingOutbound {
    sent: Mutex<Vec<(Target, Message)>>,
    bytes: Mutex<u64>,
}

impl RecordingOutbound {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(Target, Message)>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Remove and return everything recorded so far.
    pub fn take(&self) -> Vec<(Target, Message)> {
        std::mem::take(&mut *self.lock())
    }

    /// Copy of everything recorded so far.
    pub fn sent(&self) -> Vec<(Target, Message)> {
        self.lock().clone()
    }

    /// Recorded messages addressed to `target`.
    pub fn sent_to(&self, target: Target) -> Vec<Message> {
        self.lock()
            .iter()
            .filter(|(t, _)| *t == target)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Number of recorded messages with tag `tag`.
    pub fn count_tag(&self, tag: u8) -> usize {
        self.lock().iter().filter(|(_, m)| m.tag() == tag).count()
    }

    /// Number of recorded messages.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Total encoded bytes recorded.
    pub fn bytes_sent(&self) -> u64 {
        *self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Outbound for RecordingOutbound {
    fn send(&self, target: Target, message: &Message) -> Result<()> {
        let encoded = encode_message(message)
            .with_context(|| format!("Failed to encode message tag {}", message.tag()))?;
        *self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) +=
            encoded.len() as u64;
        self.lock().push((target, message.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relaysync_core::EntityId;
    use relaysync_net::protocol::tags;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn recording_outbound_keeps_messages() {
        let outbound = RecordingOutbound::new();
        outbound
            .send(Target::Broadcast, &Message::PlayerLeft { player_id: EntityId(3) })
            .unwrap();
        outbound
            .send(Target::Host, &Message::ItemPickupRequest { item_id: EntityId(1) })
            .unwrap();

        assert_eq!(outbound.len(), 2);
        assert_eq!(outbound.count_tag(tags::PLAYER_LEFT), 1);
        assert_eq!(outbound.sent_to(Target::Host).len(), 1);
        assert!(outbound.bytes_sent() > 0);
        assert_eq!(outbound.take().len(), 2);
        assert!(outbound.is_empty());
    }

    #[test]
    fn recording_outbound_refuses_unencodable() {
        let outbound = RecordingOutbound::new();
        let err = outbound.send(
            Target::Host,
            &Message::JoinReject {
                reason: "x".repeat(10_000),
            },
        );
        assert!(err.is_err());
        assert!(outbound.is_empty());
    }

    #[test]
    fn jsonl_sink_appends_lines() {
        let path = std::env::temp_dir().join(format!(
            "relaysync-events-{}.jsonl",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let mut sink = JsonlSink::create(&path).expect("sink create");
        for tick in 0..2 {
            sink.write(&EventRecord {
                tick: SimTick(tick),
                kind: "Broadcast",
                payload: "delta",
            })
            .expect("write succeeds");
        }
        assert_eq!(sink.lines(), 2);
        let contents = fs::read_to_string(&path).expect("file readable");
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("\"kind\":\"Broadcast\""));
        fs::remove_file(&path).ok();
    }
}
