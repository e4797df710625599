//! Peer connection health monitoring.
//!
//! Independent of the socket layer: a monitor attaches to one peer
//! connection per call and runs its own bounded recovery budget.

mod monitor;
mod stats;

pub use monitor::{ConnectionMonitor, MonitorCallback, MonitorConfig, RecoverySignal};
pub use stats::{
    CandidatePairStats, IceConnectionState, PeerConnectionHandle, PeerConnectionState, StatsError,
};
