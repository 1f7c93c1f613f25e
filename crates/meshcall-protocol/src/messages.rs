use serde::{Deserialize, Serialize};

use crate::types::{CandidateInit, PeerId, RoomId, SessionDescription};

/// Messages sent from a participant to the coordinator.
///
/// The `sender` field on handshake messages is carried for wire-shape
/// compatibility only; the coordinator overwrites it with the identity it
/// assigned to the sending connection before forwarding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join a room, creating it if absent
    Join {
        #[serde(rename = "roomId")]
        room_id: RoomId,
    },

    /// Session-description offer for one remote participant
    Offer {
        target: PeerId,
        sender: PeerId,
        description: SessionDescription,
    },

    /// Session-description answer for one remote participant
    Answer {
        target: PeerId,
        sender: PeerId,
        description: SessionDescription,
    },

    /// Connectivity candidate for one remote participant
    IceCandidate {
        target: PeerId,
        sender: PeerId,
        candidate: CandidateInit,
    },
}

/// Messages sent from the coordinator to a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// First message on every connection: the id assigned to this participant
    Welcome { peer_id: PeerId },

    /// Current members of the room just joined, excluding the requester
    RoomSnapshot { peers: Vec<PeerId> },

    /// A new participant joined a room this participant is in
    PeerJoined { peer_id: PeerId },

    /// Relayed offer; `sender` is coordinator-verified
    Offer {
        sender: PeerId,
        description: SessionDescription,
    },

    /// Relayed answer; `sender` is coordinator-verified
    Answer {
        sender: PeerId,
        description: SessionDescription,
    },

    /// Relayed connectivity candidate; `sender` is coordinator-verified
    IceCandidate {
        sender: PeerId,
        candidate: CandidateInit,
    },

    /// A participant left a room this participant is in
    PeerLeft { peer_id: PeerId },
}
