//! Relay, host and join entry points plus the fixed-step loop they share.

use crate::config::AppConfig;
use anyhow::{Context, Result};
use relaysync_client::{ClientSession, ClientState};
use relaysync_core::{EventBus, GameEvent};
use relaysync_net::{
    join_lobby, register_host, AdapterSink, ConnectionEvent, MessageRegistry, Outbound,
    PacketPipeline, PipelineConfig, QuicRelayLink, QuicRelayServer, RelayLink, TransportAdapter,
};
use relaysync_server::HostSession;
use relaysync_world::{ItemCatalog, World};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Sleeps out the remainder of each fixed step.
pub struct Pacer {
    interval: Duration,
    next: Instant,
}

impl Pacer {
    pub fn new(dt: f32) -> Self {
        let interval = Duration::from_secs_f32(dt);
        Self {
            interval,
            next: Instant::now() + interval,
        }
    }

    pub fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        } else if now - self.next > self.interval * 5 {
            warn!(
                "Loop fell {:?} behind; skipping ahead",
                now - self.next
            );
            self.next = now;
        }
        self.next += self.interval;
    }
}

/// Sends keep-alives at a fixed interval.
pub struct KeepAlive {
    interval: Duration,
    last: Instant,
}

impl KeepAlive {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Instant::now(),
        }
    }

    pub fn poll(&mut self, adapter: &TransportAdapter) {
        if self.last.elapsed() < self.interval {
            return;
        }
        self.last = Instant::now();
        if let Err(e) = adapter.keep_alive() {
            warn!("Keep-alive failed: {:#}", e);
        }
    }
}

/// A started pipeline plus the adapter feeding it.
pub struct Participant {
    pub pipeline: PacketPipeline,
    pub adapter: Arc<TransportAdapter>,
}

impl Participant {
    /// Start a pipeline and attach a link built by `connect` to it.
    pub fn attach(
        config: &PipelineConfig,
        connect: impl FnOnce(Arc<AdapterSink>) -> Result<Box<dyn RelayLink>>,
    ) -> Result<Self> {
        let mut pipeline = PacketPipeline::new(config.clone(), Arc::new(MessageRegistry::catalog()));
        pipeline.start()?;
        let sink = AdapterSink::new(pipeline.ingress());
        let link = connect(sink.clone())?;
        Ok(Self {
            pipeline,
            adapter: Arc::new(TransportAdapter::new(sink, link)),
        })
    }

    pub fn shutdown(&mut self) {
        self.adapter.close();
        self.pipeline.shutdown();
    }
}

async fn connect_quic(config: &PipelineConfig, relay: SocketAddr) -> Result<Participant> {
    let mut pipeline = PacketPipeline::new(config.clone(), Arc::new(MessageRegistry::catalog()));
    pipeline.start()?;
    let sink = AdapterSink::new(pipeline.ingress());
    let link = QuicRelayLink::connect(relay, sink.clone())
        .await
        .with_context(|| format!("Failed to reach relay at {}", relay))?;
    Ok(Participant {
        pipeline,
        adapter: Arc::new(TransportAdapter::new(sink, Box::new(link))),
    })
}

/// Host session over the configured arena, machines and properties.
pub fn build_host(config: &AppConfig, outbound: Arc<dyn Outbound>) -> HostSession {
    let world = World::from_geometry(&config.arena.build());
    let mut session = HostSession::new(
        config.host.clone(),
        world,
        ItemCatalog::standard(),
        Arc::new(config.properties.clone()),
        outbound,
        EventBus::new(),
    );
    for rect in &config.coin_machines {
        session.add_coin_machine(*rect);
    }
    session
}

pub fn log_event(role: &str, event: &GameEvent) {
    info!("[{}] {:?}", role, event);
}

pub async fn relay(config: &AppConfig) -> Result<()> {
    let server = QuicRelayServer::bind(config.relay.listen, config.relay.lobby_seed)?;
    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down relay");
            server.close();
            Ok(())
        }
    }
}

pub async fn host(config: AppConfig, max_ticks: Option<u64>) -> Result<()> {
    let participant = connect_quic(&config.pipeline, config.relay.address).await?;
    tokio::task::spawn_blocking(move || host_loop(config, participant, max_ticks))
        .await
        .context("Host loop panicked")?
}

fn host_loop(config: AppConfig, mut participant: Participant, max_ticks: Option<u64>) -> Result<()> {
    let adapter = participant.adapter.clone();
    let code = register_host(&adapter, config.relay.connect_timeout())?;
    println!("Lobby code: {}", code);

    let mut session = build_host(&config, adapter.clone());
    let events = session.subscribe();
    let dt = config.tick_dt();
    let mut pacer = Pacer::new(dt);
    let mut keep_alive = KeepAlive::new(config.relay.keep_alive_interval());
    let mut ticks = 0u64;

    loop {
        let mut closed = false;
        for event in adapter.poll_events() {
            closed |= matches!(event, ConnectionEvent::LinkClosed(_));
            session.handle_connection_event(&event);
        }
        if closed {
            warn!("Relay link closed; stopping host");
            break;
        }
        participant.pipeline.drain_main_thread_events(&mut session);
        session.tick(dt);
        for event in events.try_iter() {
            log_event("host", &event);
        }

        ticks += 1;
        if max_ticks.is_some_and(|max| ticks >= max) {
            break;
        }
        keep_alive.poll(&adapter);
        pacer.wait();
    }

    info!(
        "Host stopped after {} ticks with {} clients",
        ticks,
        session.client_count()
    );
    participant.shutdown();
    Ok(())
}

pub async fn join(
    config: AppConfig,
    code: String,
    username: String,
    max_ticks: Option<u64>,
) -> Result<()> {
    let participant = connect_quic(&config.pipeline, config.relay.address).await?;
    tokio::task::spawn_blocking(move || client_loop(config, participant, &code, &username, max_ticks))
        .await
        .context("Client loop panicked")?
}

fn client_loop(
    config: AppConfig,
    mut participant: Participant,
    code: &str,
    username: &str,
    max_ticks: Option<u64>,
) -> Result<()> {
    let adapter = participant.adapter.clone();
    join_lobby(&adapter, code, config.relay.connect_timeout())?;

    let mut session = ClientSession::new(
        config.client.clone(),
        ItemCatalog::standard(),
        adapter.clone(),
        EventBus::new(),
    );
    let events = session.subscribe();
    session.begin_join(username, config.client.movement)?;

    let dt = config.tick_dt();
    let mut pacer = Pacer::new(dt);
    let mut keep_alive = KeepAlive::new(config.relay.keep_alive_interval());
    let mut ticks = 0u64;

    loop {
        for event in adapter.poll_events() {
            session.handle_connection_event(&event);
        }
        participant.pipeline.drain_main_thread_events(&mut session);
        session.tick(dt);
        for event in events.try_iter() {
            log_event(username, &event);
        }
        match session.state() {
            ClientState::Rejected(reason) | ClientState::Disconnected(reason) => {
                warn!("Leaving: {}", reason);
                break;
            }
            _ => {}
        }

        ticks += 1;
        if max_ticks.is_some_and(|max| ticks >= max) {
            break;
        }
        keep_alive.poll(&adapter);
        pacer.wait();
    }

    participant.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pacer_keeps_a_fixed_cadence() {
        let mut pacer = Pacer::new(0.005);
        let start = Instant::now();
        for _ in 0..4 {
            pacer.wait();
        }
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn build_host_places_configured_machines() {
        use relaysync_net::Target;

        struct Discard;
        impl Outbound for Discard {
            fn send(&self, _target: Target, _message: &relaysync_net::Message) -> Result<()> {
                Ok(())
            }
        }

        let config = AppConfig::default();
        let session = build_host(&config, Arc::new(Discard));
        assert_eq!(
            session.world().machine_states().len(),
            config.coin_machines.len()
        );
        assert!(session.host_player().is_some());
    }
}
