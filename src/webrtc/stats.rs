//! Peer-connection observation seam.
//!
//! The media-carrying peer connection is established outside this crate.
//! The monitor only needs a narrow view of it: the coarse connection state,
//! the finer ICE state, and an asynchronous candidate-pair statistics query.

use async_trait::async_trait;
use thiserror::Error;

/// Coarse peer connection state, mirroring `RTCPeerConnectionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// ICE connectivity-check state, mirroring `RTCIceConnectionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// One reported network path attempt between the two peers.
#[derive(Debug, Clone)]
pub struct CandidatePairStats {
    pub id: String,
    /// Whether connectivity checks on this pair succeeded.
    pub succeeded: bool,
    pub nominated: bool,
}

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("stats query failed: {0}")]
    Query(String),
}

/// The monitor's view of a live peer connection.
///
/// State *changes* are delivered by the integration layer calling
/// [`crate::webrtc::ConnectionMonitor::handle_connection_state`] /
/// [`crate::webrtc::ConnectionMonitor::handle_ice_state`] from the peer
/// connection's own change callbacks; this trait covers the polled side.
#[async_trait]
pub trait PeerConnectionHandle: Send + Sync {
    fn connection_state(&self) -> PeerConnectionState;

    fn ice_connection_state(&self) -> IceConnectionState;

    /// Snapshot of the currently known candidate pairs.
    async fn candidate_pair_stats(&self) -> Result<Vec<CandidatePairStats>, StatsError>;
}
