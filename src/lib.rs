//! Realtime connection and call-signaling core.
//!
//! Three components, leaves first:
//!
//! - [`socket::SocketManager`] owns the single persistent connection to the
//!   realtime backend and re-publishes every inbound server message on a
//!   typed [`events::EventBus`].
//! - [`calls::CallSignaling`] implements the call lifecycle as messages
//!   exchanged over the socket.
//! - [`webrtc::ConnectionMonitor`] watches a caller-supplied peer
//!   connection for explicit and silent failure and raises recovery
//!   signals for external renegotiation logic.

pub mod backoff;
pub mod calls;
pub mod config;
pub mod events;
pub mod socket;
pub mod transport;
pub mod webrtc;
pub mod wire;

pub use calls::{CallSession, CallSignaling, CallState};
pub use config::{SignalingConfig, SocketConfig};
pub use events::EventBus;
pub use socket::{CredentialProvider, SocketError, SocketManager, StaticCredentials};
pub use webrtc::{ConnectionMonitor, MonitorConfig, RecoverySignal};
