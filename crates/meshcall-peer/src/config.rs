use std::time::Duration;

use meshcall_protocol::RoomId;

#[derive(Clone)]
pub struct PeerConfig {
    /// Relay signaling endpoint, e.g. `ws://127.0.0.1:4000/ws`
    pub signal_url: String,
    /// Relay HTTP base, e.g. `http://127.0.0.1:4000`
    pub http_url: String,
    pub room_id: RoomId,
    /// Fallback STUN servers, used when the relay's ICE endpoint is
    /// unreachable
    pub stun_servers: Vec<String>,
    pub negotiation_timeout: Duration,
}

impl PeerConfig {
    pub fn load() -> anyhow::Result<Self> {
        let signal_url =
            std::env::var("SIGNAL_URL").unwrap_or_else(|_| "ws://127.0.0.1:4000/ws".to_string());

        let http_url =
            std::env::var("RELAY_HTTP_URL").unwrap_or_else(|_| "http://127.0.0.1:4000".to_string());

        let room_id = RoomId::new(std::env::var("ROOM_ID").unwrap_or_else(|_| {
            tracing::info!("ROOM_ID not set, joining \"lobby\"");
            "lobby".to_string()
        }));

        let stun_servers = std::env::var("STUN_SERVERS")
            .map(|s| s.split(',').map(String::from).collect())
            .unwrap_or_else(|_| vec!["stun:stun.l.google.com:19302".to_string()]);

        let negotiation_timeout = std::env::var("NEGOTIATION_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Ok(PeerConfig {
            signal_url,
            http_url,
            room_id,
            stun_servers,
            negotiation_timeout,
        })
    }
}
