use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use meshcall_protocol::{ClientMessage, PeerId, ServerMessage};
use tokio::sync::mpsc;

use crate::state::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Identity is assigned here, at the transport layer. Relayed envelopes
    // carry this id as `sender` no matter what the client claims.
    let peer_id = PeerId::generate();

    // Create channel for outbound messages
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.connections.register(peer_id.clone(), tx).await;

    // The first frame a client sees is its own id
    state
        .connections
        .send_to_peer(
            &peer_id,
            &ServerMessage::Welcome {
                peer_id: peer_id.clone(),
            },
        )
        .await;

    tracing::info!("Participant {} connected", peer_id);

    // Spawn task to forward messages from channel to WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming messages
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let client_msg: ClientMessage = match serde_json::from_str(&text) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::warn!("Dropping malformed message from {}: {}", peer_id, e);
                        continue;
                    }
                };

                handle_client_message(&state, &peer_id, client_msg).await;
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::error!("WebSocket error for participant {}: {}", peer_id, e);
                break;
            }
            _ => {}
        }
    }

    // Cleanup on disconnect: deregister first so nothing is relayed to a
    // dead socket, then notify the rooms this participant belonged to.
    state.connections.remove(&peer_id).await;
    for (room_id, remaining) in state.registry.disconnect(&peer_id).await {
        tracing::debug!("Participant {} left room {}", peer_id, room_id);
        state
            .connections
            .broadcast(
                &remaining,
                &ServerMessage::PeerLeft {
                    peer_id: peer_id.clone(),
                },
            )
            .await;
    }

    send_task.abort();

    tracing::info!("Participant {} disconnected", peer_id);
}

async fn handle_client_message(state: &AppState, peer_id: &PeerId, message: ClientMessage) {
    match message {
        ClientMessage::Join { room_id } => {
            let snapshot = state.registry.join(peer_id.clone(), room_id.clone()).await;
            tracing::info!(
                "Participant {} joined room {} ({} existing members)",
                peer_id,
                room_id,
                snapshot.len()
            );

            state
                .connections
                .broadcast(
                    &snapshot,
                    &ServerMessage::PeerJoined {
                        peer_id: peer_id.clone(),
                    },
                )
                .await;

            state
                .connections
                .send_to_peer(peer_id, &ServerMessage::RoomSnapshot { peers: snapshot })
                .await;
        }
        ClientMessage::Offer {
            target,
            description,
            ..
        } => {
            state
                .connections
                .send_to_peer(
                    &target,
                    &ServerMessage::Offer {
                        sender: peer_id.clone(),
                        description,
                    },
                )
                .await;
        }
        ClientMessage::Answer {
            target,
            description,
            ..
        } => {
            state
                .connections
                .send_to_peer(
                    &target,
                    &ServerMessage::Answer {
                        sender: peer_id.clone(),
                        description,
                    },
                )
                .await;
        }
        ClientMessage::IceCandidate {
            target, candidate, ..
        } => {
            state
                .connections
                .send_to_peer(
                    &target,
                    &ServerMessage::IceCandidate {
                        sender: peer_id.clone(),
                        candidate,
                    },
                )
                .await;
        }
    }
}
