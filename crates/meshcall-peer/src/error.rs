use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeerError {
    #[error("signaling connection failed: {0}")]
    Signaling(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("signaling handshake failed: {0}")]
    Handshake(String),

    #[error("signaling connection closed")]
    SignalingClosed,

    #[error("media transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<webrtc::Error> for PeerError {
    fn from(e: webrtc::Error) -> Self {
        PeerError::Transport(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PeerError>;
