//! WebSocket signaling client.
//!
//! Owns the connection to the relay: a writer task draining an outbound
//! channel and a reader task that parses server messages into an inbound
//! channel. The session manager consumes the inbound side; everything that
//! needs to talk to the relay holds a [`SignalingSender`].

use futures_util::{SinkExt, StreamExt};
use meshcall_protocol::{
    CandidateInit, ClientMessage, PeerId, RoomId, ServerMessage, SessionDescription,
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{PeerError, Result};

/// Cloneable handle for sending client messages to the relay.
#[derive(Clone)]
pub struct SignalingSender {
    local_id: PeerId,
    tx: mpsc::UnboundedSender<ClientMessage>,
}

impl SignalingSender {
    pub fn new(local_id: PeerId, tx: mpsc::UnboundedSender<ClientMessage>) -> Self {
        Self { local_id, tx }
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn join(&self, room_id: RoomId) -> Result<()> {
        self.send(ClientMessage::Join { room_id })
    }

    pub fn offer(&self, target: &PeerId, description: SessionDescription) -> Result<()> {
        self.send(ClientMessage::Offer {
            target: target.clone(),
            sender: self.local_id.clone(),
            description,
        })
    }

    pub fn answer(&self, target: &PeerId, description: SessionDescription) -> Result<()> {
        self.send(ClientMessage::Answer {
            target: target.clone(),
            sender: self.local_id.clone(),
            description,
        })
    }

    pub fn candidate(&self, target: &PeerId, candidate: CandidateInit) -> Result<()> {
        self.send(ClientMessage::IceCandidate {
            target: target.clone(),
            sender: self.local_id.clone(),
            candidate,
        })
    }

    fn send(&self, message: ClientMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| PeerError::SignalingClosed)
    }
}

/// A connected signaling session: the local identity the relay assigned,
/// a sender handle, and the inbound message stream.
pub struct SignalingClient {
    local_id: PeerId,
    sender: SignalingSender,
    messages: mpsc::UnboundedReceiver<ServerMessage>,
}

impl SignalingClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = connect_async(url).await?;
        let (mut write, mut read) = ws_stream.split();

        // The relay's first frame is the welcome carrying our assigned id
        let local_id = loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(&text)? {
                        ServerMessage::Welcome { peer_id } => break peer_id,
                        other => {
                            return Err(PeerError::Handshake(format!(
                                "expected welcome, got {other:?}"
                            )));
                        }
                    }
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(other)) => {
                    return Err(PeerError::Handshake(format!(
                        "unexpected frame during handshake: {other:?}"
                    )));
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(PeerError::Handshake(
                        "connection closed during handshake".to_string(),
                    ));
                }
            }
        };

        // Spawn task to handle outgoing messages
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientMessage>();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };

                if write.send(Message::Text(json.into())).await.is_err() {
                    tracing::error!("Failed to send signaling message");
                    break;
                }
            }
        });

        // Spawn task to handle incoming messages. Dropping `in_tx` at loop
        // exit closes the manager's message stream, which is how the manager
        // learns the relay is gone.
        let (in_tx, in_rx) = mpsc::unbounded_channel::<ServerMessage>();
        tokio::spawn(async move {
            while let Some(result) = read.next().await {
                match result {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if in_tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("Dropping malformed server message: {}", e);
                        }
                    },
                    Ok(Message::Close(_)) => {
                        tracing::info!("Signaling connection closed by relay");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Signaling connection error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        tracing::info!("Signaling connected, local id {}", local_id);

        Ok(Self {
            local_id: local_id.clone(),
            sender: SignalingSender::new(local_id, out_tx),
            messages: in_rx,
        })
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Split into the sender handle and the inbound message stream.
    pub fn split(self) -> (SignalingSender, mpsc::UnboundedReceiver<ServerMessage>) {
        (self.sender, self.messages)
    }
}
