//! Application-wide event bus.
//!
//! Every inbound server message is re-published on its own broadcast channel
//! so unrelated consumers can subscribe without coupling to the socket layer.
//! Dropping a receiver unsubscribes it; there is no global broadcast medium.

use crate::wire::{
    CallAnswer, CallNotification, CallRejection, CallTermination, IceCandidatePayload,
    PresenceChange, ReadReceipt, SdpPayload, TypingEvent,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// Why the socket connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DisconnectReason {
    /// The local side called `disconnect()`.
    Client,
    /// The server closed the connection or the stream ended.
    Server,
}

/// The socket has (re)connected.
#[derive(Debug, Clone, Serialize)]
pub struct Connected;

/// The socket connection ended.
#[derive(Debug, Clone, Serialize)]
pub struct Disconnected {
    pub reason: DisconnectReason,
}

/// A connection attempt failed at the transport level.
#[derive(Debug, Clone, Serialize)]
pub struct SocketFailure {
    pub message: String,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus that provides separate broadcast channels for each
        /// event type. Subscribers call `.subscribe()` on the channel they
        /// care about; dropping the receiver is the disposer.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Connection lifecycle
    (connected, Arc<Connected>),
    (disconnected, Arc<Disconnected>),
    (socket_failure, Arc<SocketFailure>),

    // Chat events
    (new_message, Arc<Value>),
    (message_notification, Arc<Value>),
    (user_typing, Arc<TypingEvent>),
    (user_stopped_typing, Arc<TypingEvent>),
    (message_read, Arc<ReadReceipt>),
    (user_status_change, Arc<PresenceChange>),
    (message_error, Arc<Value>),

    // Legacy call events (chat namespace)
    (incoming_call, Arc<CallNotification>),
    (call_accepted, Arc<CallAnswer>),
    (call_rejected, Arc<CallRejection>),
    (call_ended, Arc<CallTermination>),
    (call_cancelled, Arc<CallTermination>),

    // WebRTC signaling relay
    (webrtc_offer, Arc<SdpPayload>),
    (webrtc_answer, Arc<SdpPayload>),
    (webrtc_ice_candidate, Arc<IceCandidatePayload>),
    (call_quality_update, Arc<Value>),

    // Video-call-service events
    (video_call_incoming, Arc<CallNotification>),
    (video_call_accepted, Arc<CallAnswer>),
    (video_call_declined, Arc<CallRejection>),
    (video_call_ended, Arc<CallTermination>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
