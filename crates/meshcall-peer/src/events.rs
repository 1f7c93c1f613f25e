//! Events surfaced to the embedding application (the UI collaborator).

use std::fmt;
use std::sync::Arc;

use meshcall_protocol::PeerId;

use crate::session::SessionState;
use crate::transport::RemoteTrack;

pub enum PeerEvent {
    /// A session's state machine advanced
    SessionStateChanged { peer_id: PeerId, state: SessionState },
    /// A remote media stream for this peer became available
    TrackAdded {
        peer_id: PeerId,
        track: Arc<dyn RemoteTrack>,
    },
    /// The session was discarded; any exposed stream for this peer is gone
    SessionClosed { peer_id: PeerId },
}

impl fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerEvent::SessionStateChanged { peer_id, state } => f
                .debug_struct("SessionStateChanged")
                .field("peer_id", peer_id)
                .field("state", state)
                .finish(),
            PeerEvent::TrackAdded { peer_id, track } => f
                .debug_struct("TrackAdded")
                .field("peer_id", peer_id)
                .field("track", &track.id())
                .finish(),
            PeerEvent::SessionClosed { peer_id } => f
                .debug_struct("SessionClosed")
                .field("peer_id", peer_id)
                .finish(),
        }
    }
}
