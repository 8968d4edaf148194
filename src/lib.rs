//! Full-mesh WebRTC peer connection lifecycle.
//!
//! A signaling server relays offers, answers and ICE candidates between
//! named participants of a room. Every participant holds one direct peer
//! connection to every other participant; [`room::LifecycleManager`] decides
//! who offers, sequences descriptions against each connection, buffers early
//! candidates and tears sessions down on failure.

pub mod config;
pub mod connection;
pub mod error;
pub mod media;
pub mod room;
pub mod signaling;
pub mod view;
pub mod webrtc;

pub use crate::error::{Error, FailureReason, PeerFailure, Result};

/// Participant identifier, unique per room membership and totally ordered.
pub type PeerId = String;
