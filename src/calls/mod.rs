//! Call signaling for the realtime core.
//!
//! The signaling service rides on [`crate::socket::SocketManager`]: call
//! intents become wire messages, inbound call events drive the single
//! tracked call's state machine.
//!
//! # Architecture
//!
//! - [`CallState`] & [`CallSession`]: state machine for the one tracked call
//! - [`CallSignaling`]: the service; registration, intents, event handling
//! - [`CallError`]: error taxonomy for local precondition failures
//!
//! Media itself (the peer connection) is established outside this module;
//! its health is watched by [`crate::webrtc::ConnectionMonitor`].

mod error;
mod signaling;
mod state;

pub use error::CallError;
pub use signaling::CallSignaling;
pub use state::{CallDirection, CallSession, CallState, CallTransition, InvalidTransition};
