//! Background packet decoding with bounded memory.
//!
//! Network callbacks hand raw payloads to [`PacketIngress::enqueue`], which
//! copies them into pooled buffers and never blocks. A single worker thread
//! decodes them through the [`MessageRegistry`] and queues the typed result
//! for the main thread, which applies it in arrival order via
//! [`PacketPipeline::drain_main_thread_events`].

use crate::channel::{ChannelType, DeliveryClass};
use crate::codec::MessageRegistry;
use crate::protocol::Message;
use anyhow::{Context, Result};
use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use relaysync_core::PeerId;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pipeline limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Largest payload accepted by `enqueue`.
    pub max_payload: usize,
    /// Pending-queue depth at which new packets are dropped.
    pub max_pending: usize,
    /// Buffers kept for reuse.
    pub pool_size: usize,
    /// Initial capacity of freshly allocated buffers.
    pub buffer_capacity: usize,
    /// How long shutdown waits for the worker.
    pub join_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_payload: 8 * 1024,
            max_pending: 1000,
            pool_size: 256,
            buffer_capacity: 1500,
            join_timeout_ms: 500,
        }
    }
}

/// A decoded packet ready for the main thread.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundPacket {
    /// Sending peer, if known.
    pub source: Option<PeerId>,
    /// Channel it arrived on.
    pub channel: ChannelType,
    /// Delivery class it arrived with.
    pub delivery: DeliveryClass,
    /// Decoded message.
    pub message: Message,
}

/// Main-thread consumer of decoded packets.
pub trait PacketHandler {
    /// Apply one packet.
    fn handle_packet(&mut self, packet: InboundPacket) -> Result<()>;
}

impl<F> PacketHandler for F
where
    F: FnMut(InboundPacket) -> Result<()>,
{
    fn handle_packet(&mut self, packet: InboundPacket) -> Result<()> {
        self(packet)
    }
}

/// Live pipeline counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    enqueued: AtomicU64,
    dropped_oversize: AtomicU64,
    dropped_full: AtomicU64,
    decoded: AtomicU64,
    decode_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineCounters {
    /// Packets accepted by `enqueue`.
    pub enqueued: u64,
    /// Packets rejected for size.
    pub dropped_oversize: u64,
    /// Packets rejected because the queue was full.
    pub dropped_full: u64,
    /// Packets decoded successfully.
    pub decoded: u64,
    /// Packets that failed to decode.
    pub decode_failures: u64,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Read all counters.
    pub fn snapshot(&self) -> PipelineCounters {
        PipelineCounters {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped_oversize: self.dropped_oversize.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            decoded: self.decoded.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
        }
    }
}

/// Bounded set of reusable byte buffers.
#[derive(Debug)]
struct BufferPool {
    free_tx: Sender<Vec<u8>>,
    free_rx: Receiver<Vec<u8>>,
    buffer_capacity: usize,
}

impl BufferPool {
    fn new(size: usize, buffer_capacity: usize) -> Self {
        let (free_tx, free_rx) = bounded(size.max(1));
        for _ in 0..size {
            let _ = free_tx.try_send(Vec::with_capacity(buffer_capacity));
        }
        Self {
            free_tx,
            free_rx,
            buffer_capacity,
        }
    }

    fn take(&self) -> Vec<u8> {
        self.free_rx
            .try_recv()
            .unwrap_or_else(|_| Vec::with_capacity(self.buffer_capacity))
    }

    fn give(&self, mut buf: Vec<u8>) {
        buf.clear();
        // Surplus buffers are simply freed.
        let _ = self.free_tx.try_send(buf);
    }

    fn available(&self) -> usize {
        self.free_rx.len()
    }
}

#[derive(Debug)]
struct PacketEnvelope {
    source: Option<PeerId>,
    payload: Vec<u8>,
    channel: ChannelType,
    delivery: DeliveryClass,
}

/// Cloneable, thread-safe entry point into the pipeline.
#[derive(Debug, Clone)]
pub struct PacketIngress {
    pending_tx: Sender<PacketEnvelope>,
    pool: Arc<BufferPool>,
    stats: Arc<PipelineStats>,
    max_payload: usize,
}

impl PacketIngress {
    /// Queue a payload for decoding. Never blocks.
    ///
    /// Returns `false` (and leaves the queue untouched) when the payload is
    /// larger than the configured maximum or the pending queue is full.
    pub fn enqueue(
        &self,
        source: Option<PeerId>,
        bytes: &[u8],
        channel: ChannelType,
        delivery: DeliveryClass,
    ) -> bool {
        if bytes.len() > self.max_payload {
            PipelineStats::bump(&self.stats.dropped_oversize);
            warn!(
                "Dropping {}-byte packet from {:?} on {:?}: exceeds {} bytes",
                bytes.len(),
                source,
                channel,
                self.max_payload
            );
            return false;
        }
        if self.pending_tx.is_full() {
            PipelineStats::bump(&self.stats.dropped_full);
            warn!("Dropping packet from {:?} on {:?}: queue full", source, channel);
            return false;
        }

        let mut payload = self.pool.take();
        payload.extend_from_slice(bytes);
        let envelope = PacketEnvelope {
            source,
            payload,
            channel,
            delivery,
        };
        match self.pending_tx.try_send(envelope) {
            Ok(()) => {
                PipelineStats::bump(&self.stats.enqueued);
                true
            }
            Err(TrySendError::Full(envelope)) => {
                self.pool.give(envelope.payload);
                PipelineStats::bump(&self.stats.dropped_full);
                warn!("Dropping packet from {:?} on {:?}: queue full", source, channel);
                false
            }
            Err(TrySendError::Disconnected(envelope)) => {
                self.pool.give(envelope.payload);
                debug!("Pipeline gone; dropping packet from {:?}", source);
                false
            }
        }
    }

    /// Packets waiting for the worker.
    pub fn pending(&self) -> usize {
        self.pending_tx.len()
    }
}

struct Worker {
    shutdown_tx: Sender<()>,
    done_rx: Receiver<()>,
    handle: JoinHandle<()>,
}

/// Owns the worker thread and the main-thread result queue.
pub struct PacketPipeline {
    config: PipelineConfig,
    registry: Arc<MessageRegistry>,
    ingress: PacketIngress,
    pending_rx: Receiver<PacketEnvelope>,
    ready_tx: Sender<InboundPacket>,
    ready_rx: Receiver<InboundPacket>,
    worker: Option<Worker>,
}

impl PacketPipeline {
    /// Build queues and the buffer pool. The worker starts with [`Self::start`].
    pub fn new(config: PipelineConfig, registry: Arc<MessageRegistry>) -> Self {
        let (pending_tx, pending_rx) = bounded(config.max_pending);
        let (ready_tx, ready_rx) = unbounded();
        let pool = Arc::new(BufferPool::new(config.pool_size, config.buffer_capacity));
        let ingress = PacketIngress {
            pending_tx,
            pool,
            stats: Arc::new(PipelineStats::default()),
            max_payload: config.max_payload,
        };
        Self {
            config,
            registry,
            ingress,
            pending_rx,
            ready_tx,
            ready_rx,
            worker: None,
        }
    }

    /// Spawn the worker thread. Calling it again while running is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let context = WorkerContext {
            pending_rx: self.pending_rx.clone(),
            shutdown_rx,
            ready_tx: self.ready_tx.clone(),
            registry: self.registry.clone(),
            pool: self.ingress.pool.clone(),
            stats: self.ingress.stats.clone(),
        };
        let handle = thread::Builder::new()
            .name("packet-pipeline".into())
            .spawn(move || {
                context.run();
                let _ = done_tx.send(());
            })
            .context("Failed to spawn packet pipeline worker")?;
        info!("Packet pipeline started");
        self.worker = Some(Worker {
            shutdown_tx,
            done_rx,
            handle,
        });
        Ok(())
    }

    /// Whether the worker is running.
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Handle for network callbacks.
    pub fn ingress(&self) -> PacketIngress {
        self.ingress.clone()
    }

    /// Packets waiting for the worker.
    pub fn pending(&self) -> usize {
        self.ingress.pending()
    }

    /// Decoded packets waiting for the main thread.
    pub fn ready(&self) -> usize {
        self.ready_rx.len()
    }

    /// Buffers currently in the pool.
    pub fn pooled_buffers(&self) -> usize {
        self.ingress.pool.available()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PipelineCounters {
        self.ingress.stats.snapshot()
    }

    /// Apply every decoded packet in arrival order. Handler errors are logged
    /// and do not stop the drain. Returns the number of packets handled.
    pub fn drain_main_thread_events<H>(&self, handler: &mut H) -> usize
    where
        H: PacketHandler + ?Sized,
    {
        let mut handled = 0;
        while let Ok(packet) = self.ready_rx.try_recv() {
            let source = packet.source;
            let tag = packet.message.tag();
            if let Err(e) = handler.handle_packet(packet) {
                warn!("Handler failed for tag {} from {:?}: {:#}", tag, source, e);
            }
            handled += 1;
        }
        handled
    }

    /// Stop the worker, waiting at most `join_timeout_ms`. Queued packets
    /// that were not decoded yet are abandoned.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.shutdown_tx.try_send(());
        drop(worker.shutdown_tx);

        let timeout = Duration::from_millis(self.config.join_timeout_ms);
        match worker.done_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    error!("Packet pipeline worker panicked");
                }
                info!("Packet pipeline stopped");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Packet pipeline worker did not stop within {:?}; abandoning it",
                    timeout
                );
            }
        }
    }
}

impl Drop for PacketPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct WorkerContext {
    pending_rx: Receiver<PacketEnvelope>,
    shutdown_rx: Receiver<()>,
    ready_tx: Sender<InboundPacket>,
    registry: Arc<MessageRegistry>,
    pool: Arc<BufferPool>,
    stats: Arc<PipelineStats>,
}

impl WorkerContext {
    fn run(self) {
        loop {
            select! {
                recv(self.shutdown_rx) -> _ => break,
                recv(self.pending_rx) -> envelope => match envelope {
                    Ok(envelope) => self.process(envelope),
                    Err(_) => break,
                },
            }
        }
        debug!("Packet pipeline worker exiting");
    }

    fn process(&self, envelope: PacketEnvelope) {
        let PacketEnvelope {
            source,
            payload,
            channel,
            delivery,
        } = envelope;

        let result = panic::catch_unwind(AssertUnwindSafe(|| self.registry.decode(&payload)));
        match result {
            Ok(Ok(message)) => {
                PipelineStats::bump(&self.stats.decoded);
                let packet = InboundPacket {
                    source,
                    channel,
                    delivery,
                    message,
                };
                if self.ready_tx.send(packet).is_err() {
                    debug!("Main-thread queue closed; discarding decoded packet");
                }
            }
            Ok(Err(e)) => {
                PipelineStats::bump(&self.stats.decode_failures);
                warn!(
                    "Dropping undecodable {}-byte packet from {:?} on {:?}: {}",
                    payload.len(),
                    source,
                    channel,
                    e
                );
            }
            Err(_) => {
                PipelineStats::bump(&self.stats.decode_failures);
                error!("Decoder panicked on packet from {:?} on {:?}", source, channel);
            }
        }
        self.pool.give(payload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_message;
    use relaysync_core::EntityId;
    use std::time::Instant;

    fn pipeline(config: PipelineConfig) -> PacketPipeline {
        PacketPipeline::new(config, Arc::new(MessageRegistry::catalog()))
    }

    fn left(id: u32) -> Vec<u8> {
        encode_message(&Message::PlayerLeft {
            player_id: EntityId(id),
        })
        .unwrap()
        .to_vec()
    }

    fn drain_until(pipeline: &PacketPipeline, want: usize) -> Vec<InboundPacket> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while seen.len() < want && Instant::now() < deadline {
            pipeline.drain_main_thread_events(&mut |packet: InboundPacket| -> Result<()> {
                seen.push(packet);
                Ok(())
            });
            thread::sleep(Duration::from_millis(2));
        }
        seen
    }

    #[test]
    fn test_full_queue_rejects_without_growing() {
        let pipeline = pipeline(PipelineConfig {
            max_pending: 3,
            ..PipelineConfig::default()
        });
        let ingress = pipeline.ingress();
        let payload = left(1);

        for _ in 0..3 {
            assert!(ingress.enqueue(None, &payload, ChannelType::Session, DeliveryClass::ReliableOrdered));
        }
        assert!(!ingress.enqueue(None, &payload, ChannelType::Session, DeliveryClass::ReliableOrdered));
        assert_eq!(pipeline.pending(), 3);
        assert_eq!(pipeline.stats().dropped_full, 1);
        assert_eq!(pipeline.stats().enqueued, 3);
    }

    #[test]
    fn test_oversize_payload_rejected() {
        let pipeline = pipeline(PipelineConfig::default());
        let ingress = pipeline.ingress();
        let big = vec![0u8; 8 * 1024 + 1];

        assert!(!ingress.enqueue(Some(PeerId(1)), &big, ChannelType::Items, DeliveryClass::ReliableOrdered));
        assert_eq!(pipeline.pending(), 0);
        assert_eq!(pipeline.stats().dropped_oversize, 1);
    }

    #[test]
    fn test_worker_decodes_in_order_and_survives_garbage() {
        let mut pipeline = pipeline(PipelineConfig::default());
        pipeline.start().unwrap();
        let ingress = pipeline.ingress();

        assert!(ingress.enqueue(Some(PeerId(1)), &left(1), ChannelType::Session, DeliveryClass::ReliableOrdered));
        assert!(ingress.enqueue(Some(PeerId(1)), &[0xee, 1, 2], ChannelType::Session, DeliveryClass::ReliableOrdered));
        assert!(ingress.enqueue(Some(PeerId(2)), &left(2), ChannelType::Session, DeliveryClass::ReliableOrdered));

        let seen = drain_until(&pipeline, 2);
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].message, Message::PlayerLeft { player_id: EntityId(1) });
        assert_eq!(seen[0].source, Some(PeerId(1)));
        assert_eq!(seen[1].message, Message::PlayerLeft { player_id: EntityId(2) });

        let stats = pipeline.stats();
        assert_eq!(stats.decoded, 2);
        assert_eq!(stats.decode_failures, 1);
        pipeline.shutdown();
    }

    #[test]
    fn test_handler_errors_do_not_stop_drain() {
        let mut pipeline = pipeline(PipelineConfig::default());
        pipeline.start().unwrap();
        let ingress = pipeline.ingress();
        for id in 0..3 {
            ingress.enqueue(None, &left(id), ChannelType::Session, DeliveryClass::ReliableOrdered);
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.ready() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }

        let mut calls = 0;
        let handled = pipeline.drain_main_thread_events(&mut |_packet: InboundPacket| -> Result<()> {
            calls += 1;
            anyhow::bail!("rejected")
        });
        assert_eq!(handled, 3);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_buffers_return_to_pool() {
        let mut pipeline = pipeline(PipelineConfig {
            pool_size: 4,
            ..PipelineConfig::default()
        });
        assert_eq!(pipeline.pooled_buffers(), 4);
        pipeline.start().unwrap();
        let ingress = pipeline.ingress();
        ingress.enqueue(None, &left(1), ChannelType::Session, DeliveryClass::ReliableOrdered);
        ingress.enqueue(None, &[0xff], ChannelType::Session, DeliveryClass::ReliableOrdered);

        let _ = drain_until(&pipeline, 1);
        let deadline = Instant::now() + Duration::from_secs(5);
        while pipeline.pooled_buffers() < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(pipeline.pooled_buffers(), 4);
        assert_eq!(pipeline.stats().decode_failures, 1);
    }

    #[test]
    fn test_shutdown_stops_worker() {
        let mut pipeline = pipeline(PipelineConfig::default());
        pipeline.start().unwrap();
        assert!(pipeline.is_running());
        pipeline.shutdown();
        assert!(!pipeline.is_running());
        // Second shutdown is harmless.
        pipeline.shutdown();
    }
}
