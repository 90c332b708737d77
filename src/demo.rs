//! In-process demo: one host and a handful of wandering bots over a
//! [`MemoryRelay`].

use crate::config::AppConfig;
use crate::runner::{build_host, log_event, Pacer, Participant};
use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use relaysync_client::ClientSession;
use relaysync_core::{EventBus, GameEvent, ItemKind};
use relaysync_net::{join_lobby, register_host, MemoryRelay, RelayLink};
use relaysync_world::{ItemCatalog, DEFAULT_PICKUP_REACH};
use std::fmt;
use tracing::{debug, info};

/// Ticks between bot decisions.
const DECIDE_EVERY: u64 = 30;
/// Ticks between bot coin machine spins.
const SPIN_EVERY: u64 = 240;

/// What happened during a demo run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DemoReport {
    pub ticks: u64,
    pub players: usize,
    pub items: usize,
    pub pickups: usize,
    pub failed_pickups: usize,
    pub spawned: usize,
    pub broadcasts: u32,
}

impl fmt::Display for DemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Demo finished after {} ticks: {} players, {} items in the world, {} pickups ({} lost races), {} coins spawned, {} broadcasts",
            self.ticks,
            self.players,
            self.items,
            self.pickups,
            self.failed_pickups,
            self.spawned,
            self.broadcasts
        )
    }
}

struct Bot {
    name: String,
    participant: Participant,
    session: ClientSession,
    move_x: f32,
}

impl Bot {
    fn decide(&mut self, tick: u64, rng: &mut StdRng) -> Result<()> {
        if !self.session.is_joined() {
            return Ok(());
        }
        if tick % DECIDE_EVERY == 0 {
            self.move_x = rng.gen_range(-1.0..=1.0);
        }
        let jump = rng.gen_bool(0.02);
        self.session.send_input(self.move_x, jump)?;

        if tick % DECIDE_EVERY != 0 {
            return Ok(());
        }
        let Some(player) = self.session.local_player() else {
            return Ok(());
        };
        let position = player.position();
        let coin = player
            .inventory()
            .iter()
            .find(|item| item.kind() == ItemKind::Coin)
            .map(|item| item.id);
        let nearby = self
            .session
            .world()
            .items()
            .find(|item| item.position().distance(position) <= DEFAULT_PICKUP_REACH)
            .map(|item| item.id());

        if let Some(coin) = coin {
            debug!("{} cashes in coin {}", self.name, coin);
            self.session.request_use(coin)?;
        } else if let Some(item) = nearby {
            debug!("{} reaches for item {}", self.name, item);
            self.session.request_pickup(item)?;
        }
        if tick % SPIN_EVERY == 0 {
            let machine = self.session.machines().next().map(|m| m.id);
            if let Some(machine) = machine {
                self.session.request_coin_spin(machine)?;
            }
        }
        Ok(())
    }
}

/// Run a host and `bots` clients for `ticks` fixed steps.
pub fn run(config: &AppConfig, bots: u32, ticks: u64, seed: u64) -> Result<DemoReport> {
    let relay = MemoryRelay::with_seed(config.relay.lobby_seed);
    let timeout = config.relay.connect_timeout();
    let mut rng = StdRng::seed_from_u64(seed);

    let mut host = Participant::attach(&config.pipeline, |sink| {
        Ok(Box::new(relay.connect(sink)) as Box<dyn RelayLink>)
    })?;
    let code = register_host(&host.adapter, timeout)?;
    let mut session = build_host(config, host.adapter.clone());
    let host_events = session.subscribe();
    info!("Demo lobby {} with {} bots", code, bots);

    let mut clients = Vec::new();
    for n in 1..=bots {
        let participant = Participant::attach(&config.pipeline, |sink| {
            Ok(Box::new(relay.connect(sink)) as Box<dyn RelayLink>)
        })?;
        join_lobby(&participant.adapter, &code, timeout)?;
        let mut client = ClientSession::new(
            config.client.clone(),
            ItemCatalog::standard(),
            participant.adapter.clone(),
            EventBus::new(),
        );
        let name = format!("bot{}", n);
        client.begin_join(&name, config.client.movement)?;
        clients.push(Bot {
            name,
            participant,
            session: client,
            move_x: 0.0,
        });
    }

    let dt = config.tick_dt();
    let mut pacer = Pacer::new(dt);
    let mut report = DemoReport::default();
    for tick in 0..ticks {
        for event in host.adapter.poll_events() {
            session.handle_connection_event(&event);
        }
        host.pipeline.drain_main_thread_events(&mut session);
        session.tick(dt);

        for bot in clients.iter_mut() {
            for event in bot.participant.adapter.poll_events() {
                bot.session.handle_connection_event(&event);
            }
            bot.participant
                .pipeline
                .drain_main_thread_events(&mut bot.session);
            bot.session.tick(dt);
            bot.decide(tick, &mut rng)?;
        }

        for event in host_events.try_iter() {
            match &event {
                GameEvent::ItemPickedUp { success: true, .. } => report.pickups += 1,
                GameEvent::ItemPickedUp { success: false, .. } => report.failed_pickups += 1,
                GameEvent::ItemsSpawned { item_ids } => report.spawned += item_ids.len(),
                _ => {}
            }
            log_event("host", &event);
        }
        report.ticks = tick + 1;
        pacer.wait();
    }

    report.players = session.world().player_count();
    report.items = session.world().item_count();
    report.broadcasts = session.broadcast_tick();

    for bot in clients.iter_mut() {
        bot.participant.shutdown();
    }
    host.shutdown();
    Ok(report)
}
