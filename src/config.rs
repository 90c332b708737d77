use relaysync_client::ClientConfig;
use relaysync_core::{PropertyTable, Rect};
use relaysync_net::PipelineConfig;
use relaysync_server::HostConfig;
use relaysync_world::ArenaLayout;
use serde::{Deserialize, Serialize};
use std::{fs, net::SocketAddr, path::Path, time::Duration};
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "relaysync.toml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Fixed simulation steps per second.
    pub tick_rate_hz: f32,
    pub relay: RelayConfig,
    pub pipeline: PipelineConfig,
    pub host: HostConfig,
    pub client: ClientConfig,
    pub arena: ArenaLayout,
    /// Coin machines placed when hosting.
    pub coin_machines: Vec<Rect>,
    /// Game properties (gravity scale, spawn chances, ...).
    pub properties: PropertyTable,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Where `relay` listens.
    pub listen: SocketAddr,
    /// Relay that `host` and `join` connect to.
    pub address: SocketAddr,
    /// Seed for lobby codes.
    pub lobby_seed: u64,
    pub connect_timeout_ms: u64,
    /// Seconds between keep-alive pings.
    pub keep_alive_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60.0,
            relay: RelayConfig::default(),
            pipeline: PipelineConfig::default(),
            host: HostConfig::default(),
            client: ClientConfig::default(),
            arena: ArenaLayout::default(),
            coin_machines: vec![Rect::new(600.0, 528.0, 32.0, 40.0)],
            properties: PropertyTable::new(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 7777)),
            address: SocketAddr::from(([127, 0, 0, 1], 7777)),
            lobby_seed: 0x5eed,
            connect_timeout_ms: 5000,
            keep_alive_secs: 5,
        }
    }
}

impl RelayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}

impl AppConfig {
    /// Seconds per fixed step.
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_rate_hz.max(1.0)
    }

    /// Load configuration from `path`, falling back to defaults on errors.
    pub fn load_from_path(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(cfg) => cfg,
                Err(err) => {
                    warn!("Failed to parse {}: {err}. Using defaults", path.display());
                    AppConfig::default()
                }
            },
            Err(err) => {
                if path != Path::new(DEFAULT_CONFIG_PATH)
                    || err.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to read {}: {err}. Using defaults", path.display());
                }
                AppConfig::default()
            }
        }
    }
}
