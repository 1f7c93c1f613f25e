//! Seam between the session state machine and the media layer.
//!
//! Everything below the offer/answer/candidate exchange (codecs,
//! packetization, NAT traversal) lives behind these traits. The production
//! implementation sits in [`webrtc`]; tests drive the state machine with an
//! in-memory stand-in.

pub mod webrtc;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use meshcall_protocol::{CandidateInit, PeerId, SessionDescription};
use tokio::sync::mpsc;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Handle to a remote media stream, handed to the UI collaborator.
pub trait RemoteTrack: Send + Sync {
    fn id(&self) -> String;
    fn kind(&self) -> MediaKind;
}

/// Asynchronous signals surfaced by one transport.
pub enum TransportEvent {
    /// A locally gathered connectivity candidate, to be forwarded to the peer
    LocalCandidate(CandidateInit),
    /// The transport-level connection is established
    Connected,
    /// A remote media stream became available
    RemoteTrack(Arc<dyn RemoteTrack>),
    /// The connection failed or was torn down underneath us
    Failed,
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::LocalCandidate(c) => {
                f.debug_tuple("LocalCandidate").field(c).finish()
            }
            TransportEvent::Connected => f.write_str("Connected"),
            TransportEvent::RemoteTrack(t) => {
                f.debug_struct("RemoteTrack").field("id", &t.id()).finish()
            }
            TransportEvent::Failed => f.write_str("Failed"),
        }
    }
}

/// One media connection toward one remote peer.
///
/// `create_offer`/`create_answer` also install the produced description as
/// the local description; callers only ever see the value they must relay.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<()>;

    async fn close(&self);
}

/// Produces one transport per remote peer, with its event stream.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        peer_id: &PeerId,
    ) -> Result<(
        Arc<dyn PeerTransport>,
        mpsc::UnboundedReceiver<TransportEvent>,
    )>;
}
