//! Production transport on webrtc-rs.

use std::sync::Arc;

use async_trait::async_trait;
use meshcall_protocol::{CandidateInit, IceServerConfig, PeerId, SdpKind, SessionDescription};
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::Result;
use crate::transport::{MediaKind, PeerTransport, RemoteTrack, TransportEvent, TransportFactory};

/// Builds one `RTCPeerConnection` per remote peer, all sharing a single API
/// instance with the default codec set.
pub struct WebRtcFactory {
    api: API,
    ice_servers: Vec<IceServerConfig>,
    /// Local capture tracks attached to every new connection. Empty means
    /// every session negotiates receive-only; media acquisition failures at
    /// the caller never block joining.
    local_tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl WebRtcFactory {
    pub fn new(
        ice_servers: Vec<IceServerConfig>,
        local_tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers,
            local_tracks,
        })
    }

    fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = self
            .ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl TransportFactory for WebRtcFactory {
    async fn create(
        &self,
        peer_id: &PeerId,
    ) -> Result<(
        Arc<dyn PeerTransport>,
        mpsc::UnboundedReceiver<TransportEvent>,
    )> {
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config()).await?);

        for track in &self.local_tracks {
            pc.add_track(track.clone()).await?;
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let tx = event_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    match candidate.to_json() {
                        Ok(json) => {
                            let _ = tx.send(TransportEvent::LocalCandidate(CandidateInit {
                                candidate: json.candidate,
                                sdp_mid: json.sdp_mid,
                                sdp_mline_index: json.sdp_mline_index,
                            }));
                        }
                        Err(e) => {
                            tracing::error!("Failed to serialize ICE candidate: {}", e);
                        }
                    }
                }
            })
        }));

        let tx = event_tx.clone();
        let state_peer = peer_id.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let tx = tx.clone();
            let peer = state_peer.clone();
            Box::pin(async move {
                tracing::debug!("Connection state for {}: {:?}", peer, state);
                match state {
                    RTCPeerConnectionState::Connected => {
                        let _ = tx.send(TransportEvent::Connected);
                    }
                    RTCPeerConnectionState::Disconnected
                    | RTCPeerConnectionState::Failed
                    | RTCPeerConnectionState::Closed => {
                        let _ = tx.send(TransportEvent::Failed);
                    }
                    _ => {}
                }
            })
        }));

        let tx = event_tx;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(TransportEvent::RemoteTrack(Arc::new(WebRtcRemoteTrack {
                    inner: track,
                })));
            })
        }));

        Ok((Arc::new(WebRtcTransport { pc }), event_rx))
    }
}

struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        self.pc.set_local_description(offer.clone()).await?;
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        let desc = match description.kind {
            SdpKind::Offer => RTCSessionDescription::offer(description.sdp)?,
            SdpKind::Answer => RTCSessionDescription::answer(description.sdp)?,
        };
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::warn!("Error closing peer connection: {}", e);
        }
    }
}

struct WebRtcRemoteTrack {
    inner: Arc<TrackRemote>,
}

impl RemoteTrack for WebRtcRemoteTrack {
    fn id(&self) -> String {
        self.inner.id()
    }

    fn kind(&self) -> MediaKind {
        match self.inner.kind() {
            RTPCodecType::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        }
    }
}
