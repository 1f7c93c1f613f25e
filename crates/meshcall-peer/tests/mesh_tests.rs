//! End-to-end mesh tests: an in-process relay plus real signaling clients
//! and session managers, with the media layer mocked out.
//!
//! Run with: cargo test -p meshcall-peer --test mesh_tests

mod support;

use std::sync::Arc;
use std::time::Duration;

use meshcall_peer::events::PeerEvent;
use meshcall_peer::manager::SessionManager;
use meshcall_peer::session::SessionState;
use meshcall_peer::signaling::{SignalingClient, SignalingSender};
use meshcall_peer::transport::TransportEvent;
use meshcall_protocol::{CandidateInit, PeerId, RoomId};
use support::MockFactory;
use tokio::sync::mpsc;
use tokio::time::timeout;

const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Test relay wrapper
struct TestRelay {
    addr: std::net::SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestRelay {
    async fn start() -> anyhow::Result<Self> {
        let config = meshcall_relay::state::Config {
            bind_address: "127.0.0.1:0".to_string(),
            stun_servers: vec![],
            turn_servers: vec![],
        };
        let router = meshcall_relay::create_app(config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// One participant: signaling client, running session manager, mock media.
struct Participant {
    id: PeerId,
    sender: SignalingSender,
    events: mpsc::UnboundedReceiver<PeerEvent>,
    log: Vec<(PeerId, SessionState)>,
    factory: Arc<MockFactory>,
    task: tokio::task::JoinHandle<()>,
}

impl Participant {
    async fn join(relay: &TestRelay, room: &str) -> Self {
        let client = SignalingClient::connect(&relay.ws_url())
            .await
            .expect("signaling connect failed");
        let id = client.local_id().clone();
        let (sender, messages) = client.split();

        sender.join(RoomId::from(room)).expect("join failed");

        let factory = Arc::new(MockFactory::default());
        let (manager, events) = SessionManager::new(
            id.clone(),
            sender.clone(),
            factory.clone(),
            Duration::from_secs(5),
        );
        let task = tokio::spawn(manager.run(messages));

        Self {
            id,
            sender,
            events,
            log: Vec::new(),
            factory,
            task,
        }
    }

    /// Consume events until the session toward `peer` reports `target`,
    /// logging every state change seen on the way.
    async fn wait_for_state(&mut self, peer: &PeerId, target: SessionState) {
        if self.log.iter().any(|(p, s)| p == peer && *s == target) {
            return;
        }
        loop {
            let event = timeout(EVENT_TIMEOUT, self.events.recv())
                .await
                .unwrap_or_else(|_| {
                    panic!("{}: timed out waiting for {peer} to reach {target:?}", self.id)
                })
                .expect("event stream closed");
            if let PeerEvent::SessionStateChanged { peer_id, state } = event {
                self.log.push((peer_id.clone(), state));
                if peer_id == *peer && state == target {
                    return;
                }
            }
        }
    }

    async fn wait_for_session_closed(&mut self, peer: &PeerId) {
        loop {
            let event = timeout(EVENT_TIMEOUT, self.events.recv())
                .await
                .unwrap_or_else(|_| {
                    panic!("{}: timed out waiting for session with {peer} to close", self.id)
                })
                .expect("event stream closed");
            match event {
                PeerEvent::SessionClosed { peer_id } if peer_id == *peer => return,
                PeerEvent::SessionStateChanged { peer_id, state } => {
                    self.log.push((peer_id, state));
                }
                _ => {}
            }
        }
    }

    fn offered_to(&self, peer: &PeerId) -> bool {
        self.log
            .iter()
            .any(|(p, s)| p == peer && *s == SessionState::Offering)
    }
}

async fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn candidate(label: &str) -> CandidateInit {
    CandidateInit {
        candidate: label.to_string(),
        sdp_mid: Some("0".to_string()),
        sdp_mline_index: Some(0),
    }
}

#[tokio::test]
async fn two_members_connect_with_exactly_one_initiator() {
    let relay = TestRelay::start().await.unwrap();

    let alice = Participant::join(&relay, "r1").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let bob = Participant::join(&relay, "r1").await;

    // Whichever side has the smaller id must be the one that offered
    let (mut initiator, mut responder) = if alice.id < bob.id {
        (alice, bob)
    } else {
        (bob, alice)
    };

    let responder_id = responder.id.clone();
    let initiator_id = initiator.id.clone();
    initiator
        .wait_for_state(&responder_id, SessionState::Negotiating)
        .await;
    responder
        .wait_for_state(&initiator_id, SessionState::Negotiating)
        .await;

    assert!(initiator.offered_to(&responder_id));
    assert!(!responder.offered_to(&initiator_id));

    // Candidate exchange, including one that races ahead on the responder's
    // side being applied after its description
    let initiator_transport = initiator.factory.wait_for_transport(&responder_id).await;
    let responder_transport = responder.factory.wait_for_transport(&initiator_id).await;

    initiator.factory.emit(
        &responder_id,
        TransportEvent::LocalCandidate(candidate("from-initiator")),
    );
    responder.factory.emit(
        &initiator_id,
        TransportEvent::LocalCandidate(candidate("from-responder")),
    );

    wait_until("the initiator's candidate to land", || {
        responder_transport
            .applied_candidates()
            .contains(&"from-initiator".to_string())
    })
    .await;
    wait_until("the responder's candidate to land", || {
        initiator_transport
            .applied_candidates()
            .contains(&"from-responder".to_string())
    })
    .await;

    // Transport-level connectivity on both sides
    initiator
        .factory
        .emit(&responder_id, TransportEvent::Connected);
    responder
        .factory
        .emit(&initiator_id, TransportEvent::Connected);

    initiator
        .wait_for_state(&responder_id, SessionState::Connected)
        .await;
    responder
        .wait_for_state(&initiator_id, SessionState::Connected)
        .await;
}

#[tokio::test]
async fn departure_closes_the_session_and_removes_the_stream() {
    let relay = TestRelay::start().await.unwrap();

    let alice = Participant::join(&relay, "r1").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let bob = Participant::join(&relay, "r1").await;

    let (mut stayer, leaver) = if alice.id < bob.id {
        (alice, bob)
    } else {
        (bob, alice)
    };
    let leaver_id = leaver.id.clone();

    stayer
        .wait_for_state(&leaver_id, SessionState::Negotiating)
        .await;
    let transport = stayer.factory.wait_for_transport(&leaver_id).await;

    // Tear the leaver's connection down: its manager and sender go away,
    // which closes the socket and triggers the relay's peer-left broadcast
    leaver.task.abort();
    drop(leaver.sender);

    stayer.wait_for_session_closed(&leaver_id).await;
    assert!(transport.closed());
}

#[tokio::test]
async fn three_members_form_a_full_mesh() {
    let relay = TestRelay::start().await.unwrap();

    let mut members = Vec::new();
    for _ in 0..3 {
        members.push(Participant::join(&relay, "mesh").await);
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let ids: Vec<PeerId> = members.iter().map(|m| m.id.clone()).collect();

    // Every member negotiates with both others
    for member in members.iter_mut() {
        let own = member.id.clone();
        for id in ids.iter().filter(|id| **id != own) {
            member.wait_for_state(id, SessionState::Negotiating).await;
        }
    }

    // Per pair, exactly one side initiated: the lexicographically smaller id
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            let (a, b) = (&members[i], &members[j]);
            let (smaller, larger) = if a.id < b.id { (a, b) } else { (b, a) };
            assert!(
                smaller.offered_to(&larger.id),
                "{} should have offered to {}",
                smaller.id,
                larger.id
            );
            assert!(
                !larger.offered_to(&smaller.id),
                "{} should not have offered to {}",
                larger.id,
                smaller.id
            );
        }
    }
}
