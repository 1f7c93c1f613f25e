//! Test collaborators: an in-memory media transport whose events the test
//! controls, standing in for the WebRTC layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use meshcall_peer::error::Result;
use meshcall_peer::transport::{PeerTransport, TransportEvent, TransportFactory};
use meshcall_protocol::{CandidateInit, PeerId, SdpKind, SessionDescription};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateOffer,
    CreateAnswer,
    SetRemoteDescription(SdpKind),
    AddCandidate(String),
    Close,
}

#[derive(Default)]
pub struct MockTransport {
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::AddCandidate(label) => Some(label),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> bool {
        self.calls().contains(&Call::Close)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        self.record(Call::CreateOffer);
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: "mock-offer".into(),
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.record(Call::CreateAnswer);
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: "mock-answer".into(),
        })
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        self.record(Call::SetRemoteDescription(description.kind));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<()> {
        self.record(Call::AddCandidate(candidate.candidate));
        Ok(())
    }

    async fn close(&self) {
        self.record(Call::Close);
    }
}

/// Factory that hands the test a handle to every transport it creates, plus
/// the event sender feeding that transport's session.
#[derive(Default)]
pub struct MockFactory {
    created: Mutex<HashMap<PeerId, (Arc<MockTransport>, mpsc::UnboundedSender<TransportEvent>)>>,
}

impl MockFactory {
    /// Wait for the manager to create a transport toward `peer`.
    pub async fn wait_for_transport(&self, peer: &PeerId) -> Arc<MockTransport> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if let Some((transport, _)) = self.created.lock().unwrap().get(peer) {
                return transport.clone();
            }
            if tokio::time::Instant::now() > deadline {
                panic!("timed out waiting for a transport toward {peer}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn emit(&self, peer: &PeerId, event: TransportEvent) {
        let created = self.created.lock().unwrap();
        let (_, tx) = created
            .get(peer)
            .unwrap_or_else(|| panic!("no transport toward {peer}"));
        tx.send(event).expect("session forwarder is gone");
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn create(
        &self,
        peer_id: &PeerId,
    ) -> Result<(
        Arc<dyn PeerTransport>,
        mpsc::UnboundedReceiver<TransportEvent>,
    )> {
        let transport = Arc::new(MockTransport::default());
        let (tx, rx) = mpsc::unbounded_channel();
        self.created
            .lock()
            .unwrap()
            .insert(peer_id.clone(), (transport.clone(), tx));
        Ok((transport, rx))
    }
}
