//! Meshcall peer library
//!
//! This crate provides the participant side of a Meshcall full-mesh call:
//! the signaling client, the per-remote-peer session state machines, and the
//! media-transport seam.

pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod session;
pub mod signaling;
pub mod transport;

pub use config::PeerConfig;
pub use error::PeerError;
pub use events::PeerEvent;
pub use manager::SessionManager;
pub use session::SessionState;
pub use signaling::{SignalingClient, SignalingSender};
