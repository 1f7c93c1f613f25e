//! Session manager: one instance per local participant, one state machine
//! per remote peer.
//!
//! All sessions are owned by a single event loop, so no session is ever
//! touched by two concurrent handlers. Transport completions are tagged with
//! the session generation they belong to; completions for a session that has
//! since been closed or replaced fall through as no-ops.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use meshcall_protocol::{CandidateInit, PeerId, ServerMessage, SessionDescription};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::Result;
use crate::events::PeerEvent;
use crate::session::{PeerSession, SessionState};
use crate::signaling::SignalingSender;
use crate::transport::{TransportEvent, TransportFactory};

const REAP_INTERVAL: Duration = Duration::from_secs(1);

pub struct SessionManager {
    local_id: PeerId,
    /// Local belief of room membership; eventually consistent with the relay
    room: HashSet<PeerId>,
    sessions: HashMap<PeerId, PeerSession>,
    signaling: SignalingSender,
    factory: Arc<dyn TransportFactory>,
    events: mpsc::UnboundedSender<PeerEvent>,
    transport_tx: mpsc::UnboundedSender<(PeerId, u64, TransportEvent)>,
    transport_rx: mpsc::UnboundedReceiver<(PeerId, u64, TransportEvent)>,
    next_generation: u64,
    negotiation_timeout: Duration,
}

impl SessionManager {
    /// Returns the manager and the event stream for the UI collaborator.
    pub fn new(
        local_id: PeerId,
        signaling: SignalingSender,
        factory: Arc<dyn TransportFactory>,
        negotiation_timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();

        let manager = Self {
            local_id,
            room: HashSet::new(),
            sessions: HashMap::new(),
            signaling,
            factory,
            events: events_tx,
            transport_tx,
            transport_rx,
            next_generation: 0,
            negotiation_timeout,
        };

        (manager, events_rx)
    }

    /// Drive the manager until the signaling stream closes.
    pub async fn run(mut self, mut messages: mpsc::UnboundedReceiver<ServerMessage>) {
        let mut reaper = tokio::time::interval(REAP_INTERVAL);
        reaper.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = messages.recv() => {
                    match message {
                        Some(m) => self.handle_server_message(m).await,
                        None => {
                            tracing::info!("Signaling stream closed; shutting down");
                            break;
                        }
                    }
                }
                event = self.transport_rx.recv() => {
                    if let Some((peer_id, generation, event)) = event {
                        self.handle_transport_event(peer_id, generation, event).await;
                    }
                }
                _ = reaper.tick() => {
                    self.reap_overdue_sessions().await;
                }
            }
        }

        self.close_all().await;
    }

    async fn handle_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Welcome { peer_id } => {
                // Consumed during connect; a second one is a relay bug
                tracing::warn!("Ignoring unexpected welcome for {}", peer_id);
            }
            ServerMessage::RoomSnapshot { peers } => {
                for peer_id in peers {
                    self.room.insert(peer_id.clone());
                    self.consider_peer(peer_id).await;
                }
            }
            ServerMessage::PeerJoined { peer_id } => {
                self.room.insert(peer_id.clone());
                self.consider_peer(peer_id).await;
            }
            ServerMessage::Offer {
                sender,
                description,
            } => {
                self.handle_offer(sender, description).await;
            }
            ServerMessage::Answer {
                sender,
                description,
            } => {
                self.handle_answer(sender, description).await;
            }
            ServerMessage::IceCandidate { sender, candidate } => {
                self.handle_candidate(sender, candidate).await;
            }
            ServerMessage::PeerLeft { peer_id } => {
                if !self.room.remove(&peer_id) {
                    tracing::debug!("peer-left for {} outside our room view", peer_id);
                }
                self.close_session(&peer_id, "peer left").await;
            }
        }
    }

    /// A peer became visible (snapshot entry or join notification). Decide
    /// whether this side initiates: the lexicographically smaller id offers,
    /// the other side waits. Exactly one session per pair comes out of this.
    async fn consider_peer(&mut self, peer_id: PeerId) {
        if peer_id == self.local_id {
            return;
        }
        // Never initiate toward a peer we do not believe is in the room
        if !self.room.contains(&peer_id) {
            return;
        }
        if let Some(session) = self.sessions.get(&peer_id) {
            if matches!(
                session.state,
                SessionState::Negotiating | SessionState::Connected
            ) {
                return;
            }
        }

        if self.local_id < peer_id {
            if let Err(e) = self.initiate(peer_id.clone()).await {
                tracing::warn!("Failed to initiate toward {}: {}", peer_id, e);
                self.close_session(&peer_id, "initiation failed").await;
            }
        }
    }

    async fn initiate(&mut self, peer_id: PeerId) -> Result<()> {
        self.create_session(peer_id.clone(), SessionState::Offering)
            .await?;
        self.emit_state(&peer_id, SessionState::Offering);

        let Some(session) = self.sessions.get(&peer_id) else {
            return Ok(());
        };
        let offer = session.transport().create_offer().await?;

        if let Some(session) = self.sessions.get_mut(&peer_id) {
            session.state = SessionState::AwaitingAnswer;
        }
        self.emit_state(&peer_id, SessionState::AwaitingAnswer);

        self.signaling.offer(&peer_id, offer)?;
        tracing::info!("Sent offer to {}", peer_id);
        Ok(())
    }

    async fn handle_offer(&mut self, sender: PeerId, description: SessionDescription) {
        if let Some(existing) = self.sessions.get(&sender) {
            tracing::info!(
                "Incoming offer from {} supersedes session in state {:?}",
                sender,
                existing.state
            );
        }
        // An offer implies room membership even if the notification raced
        self.room.insert(sender.clone());

        if let Err(e) = self.accept_offer(sender.clone(), description).await {
            tracing::warn!("Failed to answer offer from {}: {}", sender, e);
            self.close_session(&sender, "answering failed").await;
        }
    }

    async fn accept_offer(&mut self, sender: PeerId, description: SessionDescription) -> Result<()> {
        self.create_session(sender.clone(), SessionState::Answering)
            .await?;
        self.emit_state(&sender, SessionState::Answering);

        let Some(session) = self.sessions.get_mut(&sender) else {
            return Ok(());
        };
        session.apply_remote_description(description).await?;
        let answer = session.transport().create_answer().await?;

        self.signaling.answer(&sender, answer)?;

        if let Some(session) = self.sessions.get_mut(&sender) {
            session.state = SessionState::Negotiating;
        }
        self.emit_state(&sender, SessionState::Negotiating);
        tracing::info!("Sent answer to {}", sender);
        Ok(())
    }

    async fn handle_answer(&mut self, sender: PeerId, description: SessionDescription) {
        let Some(session) = self.sessions.get_mut(&sender) else {
            tracing::warn!("Ignoring answer from {} with no session", sender);
            return;
        };
        if session.state != SessionState::AwaitingAnswer {
            tracing::warn!(
                "Ignoring answer from {} in state {:?}",
                sender,
                session.state
            );
            return;
        }

        match session.apply_remote_description(description).await {
            Ok(()) => {
                session.state = SessionState::Negotiating;
                self.emit_state(&sender, SessionState::Negotiating);
            }
            Err(e) => {
                tracing::warn!("Failed to apply answer from {}: {}", sender, e);
                self.close_session(&sender, "negotiation failed").await;
            }
        }
    }

    async fn handle_candidate(&mut self, sender: PeerId, candidate: CandidateInit) {
        let Some(session) = self.sessions.get_mut(&sender) else {
            tracing::debug!("Dropping candidate from {} with no session", sender);
            return;
        };

        // Candidate failures are not fatal to the session; the remaining
        // candidates can still complete connectivity
        if let Err(e) = session.apply_or_buffer_candidate(candidate).await {
            tracing::warn!("Failed to apply candidate from {}: {}", sender, e);
        }
    }

    async fn handle_transport_event(
        &mut self,
        peer_id: PeerId,
        generation: u64,
        event: TransportEvent,
    ) {
        let Some(session) = self.sessions.get_mut(&peer_id) else {
            tracing::debug!("Ignoring transport event for closed session {}", peer_id);
            return;
        };
        if session.generation != generation {
            tracing::debug!("Ignoring stale transport event for {}", peer_id);
            return;
        }

        match event {
            TransportEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.signaling.candidate(&peer_id, candidate) {
                    tracing::warn!("Failed to forward candidate for {}: {}", peer_id, e);
                }
            }
            TransportEvent::Connected => {
                if session.state == SessionState::Negotiating {
                    session.state = SessionState::Connected;
                    self.emit_state(&peer_id, SessionState::Connected);
                    tracing::info!("Connected to {}", peer_id);
                } else {
                    tracing::debug!(
                        "Ignoring connectivity signal for {} in state {:?}",
                        peer_id,
                        session.state
                    );
                }
            }
            TransportEvent::RemoteTrack(track) => {
                let _ = self.events.send(PeerEvent::TrackAdded { peer_id, track });
            }
            TransportEvent::Failed => {
                self.close_session(&peer_id, "transport failed").await;
            }
        }
    }

    /// Create a fresh session, closing any existing one for the same peer
    /// first. The transport's event stream is forwarded into the manager
    /// loop, tagged with the session generation.
    async fn create_session(&mut self, peer_id: PeerId, state: SessionState) -> Result<()> {
        if self.sessions.contains_key(&peer_id) {
            self.close_session(&peer_id, "superseded").await;
        }

        let generation = self.next_generation;
        self.next_generation += 1;

        let (transport, mut transport_events) = self.factory.create(&peer_id).await?;

        let forward_tx = self.transport_tx.clone();
        let forward_peer = peer_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = transport_events.recv().await {
                if forward_tx
                    .send((forward_peer.clone(), generation, event))
                    .is_err()
                {
                    break;
                }
            }
        });

        let deadline = Instant::now() + self.negotiation_timeout;
        let session = PeerSession::new(peer_id.clone(), generation, state, transport, forwarder, deadline);
        self.sessions.insert(peer_id, session);
        Ok(())
    }

    async fn close_session(&mut self, peer_id: &PeerId, reason: &str) {
        let Some(mut session) = self.sessions.remove(peer_id) else {
            return;
        };
        tracing::info!("Closing session with {}: {}", peer_id, reason);
        session.close().await;
        let _ = self.events.send(PeerEvent::SessionClosed {
            peer_id: peer_id.clone(),
        });
    }

    async fn reap_overdue_sessions(&mut self) {
        let now = Instant::now();
        let overdue: Vec<PeerId> = self
            .sessions
            .values()
            .filter(|s| s.is_negotiation_overdue(now))
            .map(|s| s.peer_id.clone())
            .collect();

        for peer_id in overdue {
            tracing::warn!("Negotiation with {} timed out", peer_id);
            self.close_session(&peer_id, "negotiation timeout").await;
        }
    }

    async fn close_all(&mut self) {
        let peers: Vec<PeerId> = self.sessions.keys().cloned().collect();
        for peer_id in peers {
            self.close_session(&peer_id, "shutting down").await;
        }
    }

    fn emit_state(&self, peer_id: &PeerId, state: SessionState) {
        let _ = self.events.send(PeerEvent::SessionStateChanged {
            peer_id: peer_id.clone(),
            state,
        });
    }
}
