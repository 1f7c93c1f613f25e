use std::sync::Arc;

use crate::rooms::RoomRegistry;
use crate::ws::connections::ConnectionManager;

#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    pub stun_servers: Vec<String>,
    pub turn_servers: Vec<TurnServer>,
}

#[derive(Clone)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub credential: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:4000".to_string());

        let stun_servers = std::env::var("STUN_SERVERS")
            .map(|s| s.split(',').map(String::from).collect())
            .unwrap_or_else(|_| vec!["stun:stun.l.google.com:19302".to_string()]);

        Ok(Config {
            bind_address,
            stun_servers,
            turn_servers: vec![], // Configure via env if needed
        })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub registry: Arc<RoomRegistry>,
    pub connections: Arc<ConnectionManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: Arc::new(RoomRegistry::new()),
            connections: Arc::new(ConnectionManager::new()),
        }
    }
}
