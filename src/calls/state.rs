//! Call state machine implementation.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Current state of the session's single call slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum CallState {
    /// No call in progress.
    #[default]
    Idle,
    /// Outgoing call: offer sent, waiting for the receiver.
    OutgoingRinging,
    /// Incoming call: ringing locally.
    IncomingRinging,
    /// Call accepted on both legs.
    Active,
    /// Call ended; terminal until the next offer resets the slot.
    Ended,
}

impl CallState {
    pub fn is_ringing(&self) -> bool {
        matches!(self, Self::OutgoingRinging | Self::IncomingRinging)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// True while a new call may claim the slot.
    pub fn is_free(&self) -> bool {
        matches!(self, Self::Idle | Self::Ended)
    }
}

/// State transitions for the call slot.
#[derive(Debug, Clone, Copy)]
pub enum CallTransition {
    /// We sent an offer.
    OfferSent,
    /// An offer addressed to us arrived.
    OfferReceived,
    /// Either leg accepted the ringing call.
    Accepted,
    /// Either leg declined or cancelled the ringing call.
    Declined,
    /// Either leg hung up the active call.
    Ended,
}

/// Which side created the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CallDirection {
    Outgoing,
    Incoming,
}

/// The single tracked call and its counterpart identity.
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    pub call_id: String,
    pub caller_id: String,
    pub caller_name: String,
    pub receiver_id: String,
    pub receiver_name: String,
    pub direction: CallDirection,
    pub state: CallState,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new_outgoing(
        call_id: impl Into<String>,
        caller_id: impl Into<String>,
        caller_name: impl Into<String>,
        receiver_id: impl Into<String>,
        receiver_name: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            caller_id: caller_id.into(),
            caller_name: caller_name.into(),
            receiver_id: receiver_id.into(),
            receiver_name: receiver_name.into(),
            direction: CallDirection::Outgoing,
            state: CallState::OutgoingRinging,
            created_at: Utc::now(),
        }
    }

    pub fn new_incoming(
        call_id: impl Into<String>,
        caller_id: impl Into<String>,
        caller_name: impl Into<String>,
        receiver_id: impl Into<String>,
        receiver_name: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            caller_id: caller_id.into(),
            caller_name: caller_name.into(),
            receiver_id: receiver_id.into(),
            receiver_name: receiver_name.into(),
            direction: CallDirection::Incoming,
            state: CallState::IncomingRinging,
            created_at: Utc::now(),
        }
    }

    /// The identity of the other participant.
    pub fn counterpart_id(&self) -> &str {
        match self.direction {
            CallDirection::Outgoing => &self.receiver_id,
            CallDirection::Incoming => &self.caller_id,
        }
    }

    /// Apply a state transition. Returns an error if the transition is
    /// invalid from the current state.
    pub fn apply_transition(
        &mut self,
        transition: CallTransition,
    ) -> Result<(), InvalidTransition> {
        use CallState::*;
        let new_state = match (self.state, transition) {
            (Idle | Ended, CallTransition::OfferSent) => OutgoingRinging,
            (Idle | Ended, CallTransition::OfferReceived) => IncomingRinging,
            (OutgoingRinging | IncomingRinging, CallTransition::Accepted) => Active,
            (OutgoingRinging | IncomingRinging, CallTransition::Declined) => Ended,
            (Active, CallTransition::Ended) => Ended,
            // Ringing calls may also be terminated outright (remote hangup
            // before accept).
            (OutgoingRinging | IncomingRinging, CallTransition::Ended) => Ended,
            (current, transition) => {
                return Err(InvalidTransition {
                    current_state: format!("{current:?}"),
                    attempted: format!("{transition:?}"),
                });
            }
        };
        self.state = new_state;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct InvalidTransition {
    pub current_state: String,
    pub attempted: String,
}

impl std::fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid transition {} in state {}",
            self.attempted, self.current_state
        )
    }
}

impl std::error::Error for InvalidTransition {}
