use std::sync::Arc;

use anyhow::Result;
use meshcall_protocol::IceServerConfig;
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod events;
mod manager;
mod session;
mod signaling;
mod transport;

use config::PeerConfig;
use events::PeerEvent;
use manager::SessionManager;
use signaling::SignalingClient;
use transport::webrtc::WebRtcFactory;

#[derive(Debug, Deserialize)]
struct IceServersResponse {
    ice_servers: Vec<IceServerConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "meshcall=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Meshcall peer...");

    let config = PeerConfig::load()?;

    let ice_servers = fetch_ice_servers(&config).await;

    let client = SignalingClient::connect(&config.signal_url).await?;
    let local_id = client.local_id().clone();
    let (sender, messages) = client.split();

    sender.join(config.room_id.clone())?;
    tracing::info!("Joined room {} as {}", config.room_id, local_id);

    // No local capture here: this binary negotiates receive-only sessions.
    // Embedders attach their capture tracks through the factory.
    let factory = Arc::new(WebRtcFactory::new(ice_servers, Vec::new())?);

    let (manager, mut events) =
        SessionManager::new(local_id, sender, factory, config.negotiation_timeout);
    let manager_task = tokio::spawn(manager.run(messages));

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(PeerEvent::SessionStateChanged { peer_id, state }) => {
                        tracing::info!("{} -> {:?}", peer_id, state);
                    }
                    Some(PeerEvent::TrackAdded { peer_id, track }) => {
                        tracing::info!(
                            "Remote {:?} track {} from {}",
                            track.kind(),
                            track.id(),
                            peer_id
                        );
                    }
                    Some(PeerEvent::SessionClosed { peer_id }) => {
                        tracing::info!("Session with {} closed", peer_id);
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                break;
            }
        }
    }

    manager_task.abort();
    Ok(())
}

/// Ask the relay for ICE configuration; fall back to the locally configured
/// STUN list when the endpoint is unreachable. Either way, joining proceeds.
async fn fetch_ice_servers(config: &PeerConfig) -> Vec<IceServerConfig> {
    let url = format!("{}/api/ice-servers", config.http_url);
    match reqwest::get(&url).await {
        Ok(response) => match response.json::<IceServersResponse>().await {
            Ok(body) => {
                tracing::info!("Using {} ICE servers from relay", body.ice_servers.len());
                return body.ice_servers;
            }
            Err(e) => tracing::warn!("Invalid ICE server response: {}", e),
        },
        Err(e) => tracing::warn!("Could not reach {}: {}", url, e),
    }

    tracing::info!("Falling back to configured STUN servers");
    config
        .stun_servers
        .iter()
        .map(|url| IceServerConfig {
            urls: vec![url.clone()],
            username: None,
            credential: None,
        })
        .collect()
}
