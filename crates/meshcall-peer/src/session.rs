//! Per-remote-peer connection state.

use std::collections::VecDeque;
use std::sync::Arc;

use meshcall_protocol::{CandidateInit, PeerId, SessionDescription};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::Result;
use crate::transport::PeerTransport;

/// Connection-establishment states. `Idle` has no variant: a peer with no
/// session is idle by definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created on the initiating side, description not yet produced
    Offering,
    /// Offer sent, waiting for the peer's answer
    AwaitingAnswer,
    /// Offer received, producing the answer
    Answering,
    /// Descriptions exchanged, connectivity being established
    Negotiating,
    /// Media flowing
    Connected,
    /// Torn down; the session is discarded in this state
    Closed,
}

/// One session toward one remote peer. At most one exists per remote id at
/// any time; the manager closes an old session before creating its
/// replacement.
pub struct PeerSession {
    pub peer_id: PeerId,
    /// Distinguishes this session from earlier ones toward the same peer, so
    /// completions of a closed predecessor are ignored.
    pub generation: u64,
    pub state: SessionState,
    transport: Arc<dyn PeerTransport>,
    /// Candidates that arrived before the remote description. Connectivity
    /// candidates routinely race ahead of the description they depend on.
    pending_candidates: VecDeque<CandidateInit>,
    remote_description_set: bool,
    deadline: Instant,
    forwarder: JoinHandle<()>,
}

impl PeerSession {
    pub fn new(
        peer_id: PeerId,
        generation: u64,
        state: SessionState,
        transport: Arc<dyn PeerTransport>,
        forwarder: JoinHandle<()>,
        deadline: Instant,
    ) -> Self {
        Self {
            peer_id,
            generation,
            state,
            transport,
            pending_candidates: VecDeque::new(),
            remote_description_set: false,
            deadline,
            forwarder,
        }
    }

    pub fn transport(&self) -> Arc<dyn PeerTransport> {
        self.transport.clone()
    }

    /// Apply the peer's description, then drain the candidate buffer in
    /// arrival order and clear it. A candidate that fails to apply is logged
    /// and skipped; the rest of the buffer can still complete connectivity.
    pub async fn apply_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        self.transport.set_remote_description(description).await?;
        self.remote_description_set = true;

        while let Some(candidate) = self.pending_candidates.pop_front() {
            if let Err(e) = self.transport.add_ice_candidate(candidate).await {
                tracing::warn!("Failed to apply buffered candidate from {}: {}", self.peer_id, e);
            }
        }
        Ok(())
    }

    /// Apply a remote candidate immediately if the remote description is
    /// already set, otherwise queue it behind the description it depends on.
    pub async fn apply_or_buffer_candidate(&mut self, candidate: CandidateInit) -> Result<()> {
        if self.remote_description_set {
            self.transport.add_ice_candidate(candidate).await?;
        } else {
            self.pending_candidates.push_back(candidate);
        }
        Ok(())
    }

    /// True once a session has out-stayed its negotiation deadline without
    /// reaching `Connected`.
    pub fn is_negotiation_overdue(&self, now: Instant) -> bool {
        !matches!(self.state, SessionState::Connected | SessionState::Closed) && now >= self.deadline
    }

    /// Tear down: stop forwarding transport events and release the underlying
    /// connection. Late completions for this session are no-ops from here on.
    pub async fn close(&mut self) {
        self.state = SessionState::Closed;
        self.forwarder.abort();
        self.transport.close().await;
    }
}
