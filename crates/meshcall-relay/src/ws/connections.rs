use std::collections::HashMap;

use meshcall_protocol::{PeerId, ServerMessage};
use tokio::sync::{RwLock, mpsc};

/// Registry of live connections, one outbound channel per participant.
///
/// A participant id maps to exactly one connection for its lifetime; the id
/// dies with the socket.
pub struct ConnectionManager {
    senders: RwLock<HashMap<PeerId, mpsc::UnboundedSender<String>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, peer_id: PeerId, sender: mpsc::UnboundedSender<String>) {
        self.senders.write().await.insert(peer_id.clone(), sender);
        tracing::debug!("Participant {} connected", peer_id);
    }

    pub async fn remove(&self, peer_id: &PeerId) {
        self.senders.write().await.remove(peer_id);
        tracing::debug!("Participant {} disconnected", peer_id);
    }

    /// Deliver `message` to one participant. An absent target is dropped
    /// silently; the mesh self-heals on the next membership notification.
    pub async fn send_to_peer(&self, peer_id: &PeerId, message: &ServerMessage) {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
                return;
            }
        };

        let senders = self.senders.read().await;
        match senders.get(peer_id) {
            Some(sender) => {
                if let Err(e) = sender.send(json) {
                    tracing::error!("Failed to send message to {}: {}", peer_id, e);
                }
            }
            None => {
                tracing::debug!("Dropping message for unknown participant {}", peer_id);
            }
        }
    }

    /// Deliver `message` to every participant in `peers`, serializing once.
    pub async fn broadcast(&self, peers: &[PeerId], message: &ServerMessage) {
        let json = match serde_json::to_string(message) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
                return;
            }
        };

        let senders = self.senders.read().await;
        for peer_id in peers {
            if let Some(sender) = senders.get(peer_id) {
                if let Err(e) = sender.send(json.clone()) {
                    tracing::error!("Failed to send message to {}: {}", peer_id, e);
                }
            }
        }
    }

    pub async fn is_connected(&self, peer_id: &PeerId) -> bool {
        self.senders.read().await.contains_key(peer_id)
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}
