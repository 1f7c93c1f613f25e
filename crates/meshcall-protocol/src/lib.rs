//! Shared signaling protocol for Meshcall
//!
//! Defines the wire messages exchanged between participants and the
//! coordinator, plus the identifier and payload types both sides agree on.

pub mod messages;
pub mod types;

pub use messages::{ClientMessage, ServerMessage};
pub use types::{CandidateInit, IceServerConfig, PeerId, RoomId, SdpKind, SessionDescription};
