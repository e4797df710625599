//! Call lifecycle signaling over the realtime socket.
//!
//! `CallSignaling` translates call intents (initiate/accept/decline/end)
//! into wire messages and keeps the single tracked call consistent on both
//! legs. The signaling channel is a shared room: every member sees every
//! call notification, so inbound offers are filtered by receiver identity
//! before they touch local state.

use super::error::CallError;
use super::state::{CallDirection, CallSession, CallState, CallTransition};
use crate::config::SignalingConfig;
use crate::socket::SocketManager;
use crate::wire::{CallAnswer, CallNotification, CallRejection, CallTermination, ClientMessage};
use chrono::Utc;
use log::{debug, error, info, warn};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;

const CALL_ID_SUFFIX_LEN: usize = 7;
const CALL_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

const RINGING_CHANNEL_CAPACITY: usize = 16;

/// Generates a call id of the form `call_<unix-ms>_<alnum>`, unique per
/// call attempt.
fn generate_call_id() -> String {
    let timestamp = Utc::now().timestamp_millis();
    let mut rng = rand::rng();
    let suffix: String = (0..CALL_ID_SUFFIX_LEN)
        .map(|_| CALL_ID_CHARSET[rng.random_range(0..CALL_ID_CHARSET.len())] as char)
        .collect();
    format!("call_{timestamp}_{suffix}")
}

/// Call signaling service for one local identity.
pub struct CallSignaling {
    socket: Arc<SocketManager>,
    config: SignalingConfig,
    user_id: String,
    user_name: String,
    session: Mutex<Option<CallSession>>,
    listener: Mutex<Option<JoinHandle<()>>>,
    ringing_tx: broadcast::Sender<Arc<CallSession>>,
}

impl CallSignaling {
    pub fn new(
        socket: Arc<SocketManager>,
        config: SignalingConfig,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket,
            config,
            user_id: user_id.into(),
            user_name: user_name.into(),
            session: Mutex::new(None),
            listener: Mutex::new(None),
            ringing_tx: broadcast::channel(RINGING_CHANNEL_CAPACITY).0,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Notifications for incoming calls that passed the identity filter.
    pub fn subscribe_ringing(&self) -> broadcast::Receiver<Arc<CallSession>> {
        self.ringing_tx.subscribe()
    }

    /// Registers this identity on the signaling channel.
    ///
    /// Waits (bounded) for the socket's one-shot `connected` notification
    /// when the socket is not yet up, then joins the call service room and
    /// starts observing call events.
    pub async fn connect(self: &Arc<Self>) -> Result<(), CallError> {
        let mut connected = self.socket.event_bus().connected.subscribe();
        if !self.socket.is_connected() {
            let wait = tokio::time::timeout(self.config.register_timeout, async {
                loop {
                    match connected.recv().await {
                        Ok(_) => break true,
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break false,
                    }
                }
            });
            match wait.await {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    warn!(target: "Calls", "Socket not connected, giving up on registration");
                    return Err(CallError::RegistrationTimeout);
                }
            }
        }

        self.socket
            .send_lenient(ClientMessage::JoinCallService {
                user_id: self.user_id.clone(),
                user_name: self.user_name.clone(),
            })
            .await;
        info!(target: "Calls", "Registered {} on the call service", self.user_id);

        self.start_listener().await;
        Ok(())
    }

    /// Stops observing call events. The current call slot is left as-is.
    pub async fn shutdown(&self) {
        if let Some(task) = self.listener.lock().await.take() {
            task.abort();
        }
    }

    /// Starts an outgoing call and returns its id. Delivery is asynchronous;
    /// a send failure leaves the slot untouched and is only logged.
    pub async fn initiate_call(&self, receiver_id: &str, receiver_name: &str) -> String {
        let call_id = generate_call_id();
        let offer = ClientMessage::InitiateCall {
            caller_id: self.user_id.clone(),
            caller_name: self.user_name.clone(),
            receiver_id: receiver_id.to_string(),
            receiver_name: receiver_name.to_string(),
            call_id: call_id.clone(),
        };
        match self.socket.send(&offer).await {
            Ok(()) => {
                info!(target: "Calls", "Calling {receiver_id} ({call_id})");
                *self.session.lock().await = Some(CallSession::new_outgoing(
                    &call_id,
                    &self.user_id,
                    &self.user_name,
                    receiver_id,
                    receiver_name,
                ));
            }
            Err(e) => error!(target: "Calls", "Failed to send call offer: {e}"),
        }
        call_id
    }

    /// Accepts the ringing incoming call.
    pub async fn accept_call(&self, call_id: &str) -> Result<(), CallError> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .filter(|s| s.call_id == call_id)
            .ok_or_else(|| CallError::NotFound(call_id.to_string()))?;
        if session.direction != CallDirection::Incoming {
            return Err(CallError::NotIncoming(call_id.to_string()));
        }

        let accept = ClientMessage::AcceptCall {
            call_id: call_id.to_string(),
            receiver_id: self.user_id.clone(),
            receiver_name: self.user_name.clone(),
            caller_id: session.caller_id.clone(),
        };
        self.socket.send(&accept).await?;
        session.apply_transition(CallTransition::Accepted)?;
        info!(target: "Calls", "Accepted call {call_id}");
        Ok(())
    }

    /// Declines the ringing incoming call.
    pub async fn decline_call(&self, call_id: &str) -> Result<(), CallError> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .filter(|s| s.call_id == call_id)
            .ok_or_else(|| CallError::NotFound(call_id.to_string()))?;
        if session.direction != CallDirection::Incoming {
            return Err(CallError::NotIncoming(call_id.to_string()));
        }

        let decline = ClientMessage::DeclineCall {
            call_id: call_id.to_string(),
            receiver_id: self.user_id.clone(),
            caller_id: session.caller_id.clone(),
        };
        self.socket.send(&decline).await?;
        session.apply_transition(CallTransition::Declined)?;
        info!(target: "Calls", "Declined call {call_id}");
        Ok(())
    }

    /// Hangs up the tracked call; valid while ringing (cancel) or active.
    pub async fn end_call(&self, call_id: &str) -> Result<(), CallError> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .filter(|s| s.call_id == call_id)
            .ok_or_else(|| CallError::NotFound(call_id.to_string()))?;

        let end = ClientMessage::EndCall {
            call_id: call_id.to_string(),
            user_id: self.user_id.clone(),
        };
        self.socket.send(&end).await?;
        session.apply_transition(CallTransition::Ended)?;
        info!(target: "Calls", "Ended call {call_id}");
        Ok(())
    }

    /// State of the call slot; `Idle` when no call was ever tracked.
    pub async fn current_state(&self) -> CallState {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.state)
            .unwrap_or_default()
    }

    pub async fn current_call(&self) -> Option<CallSession> {
        self.session.lock().await.clone()
    }

    async fn start_listener(self: &Arc<Self>) {
        let mut slot = self.listener.lock().await;
        if slot.is_some() {
            return;
        }

        let bus = self.socket.event_bus();
        let mut incoming = bus.video_call_incoming.subscribe();
        let mut accepted = bus.video_call_accepted.subscribe();
        let mut declined = bus.video_call_declined.subscribe();
        let mut ended = bus.video_call_ended.subscribe();

        let svc = self.clone();
        *slot = Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = incoming.recv() => match event {
                        Ok(n) => svc.handle_incoming(&n).await,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(target: "Calls", "Listener lagged, skipped {skipped} offers");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    event = accepted.recv() => match event {
                        Ok(a) => svc.handle_accepted(&a).await,
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                    event = declined.recv() => match event {
                        Ok(r) => svc.handle_declined(&r).await,
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                    event = ended.recv() => match event {
                        Ok(t) => svc.handle_ended(&t).await,
                        Err(RecvError::Lagged(_)) => {}
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!(target: "Calls", "Call listener stopped");
        }));
    }

    async fn handle_incoming(&self, notification: &CallNotification) {
        // Shared room: offers addressed to other identities are not ours.
        if notification.receiver_id != self.user_id {
            debug!(
                target: "Calls",
                "Ignoring call {} addressed to {}",
                notification.call_id, notification.receiver_id
            );
            return;
        }

        let mut guard = self.session.lock().await;
        if let Some(current) = guard.as_ref() {
            // Redelivered offers for the tracked call are not a second call.
            if current.call_id == notification.call_id {
                debug!(
                    target: "Calls",
                    "Duplicate offer for call {}, ignoring",
                    notification.call_id
                );
                return;
            }
            if !current.state.is_free() {
                info!(
                    target: "Calls",
                    "Busy with call {}, auto-declining {}",
                    current.call_id, notification.call_id
                );
                let busy = ClientMessage::DeclineCall {
                    call_id: notification.call_id.clone(),
                    receiver_id: self.user_id.clone(),
                    caller_id: notification.caller_id.clone(),
                };
                if let Err(e) = self.socket.send(&busy).await {
                    warn!(target: "Calls", "Failed to send busy decline: {e}");
                }
                return;
            }
        }

        info!(
            target: "Calls",
            "Incoming call {} from {}",
            notification.call_id, notification.caller_id
        );
        let session = CallSession::new_incoming(
            &notification.call_id,
            &notification.caller_id,
            &notification.caller_name,
            &notification.receiver_id,
            &notification.receiver_name,
        );
        let _ = self.ringing_tx.send(Arc::new(session.clone()));
        *guard = Some(session);
    }

    async fn handle_accepted(&self, answer: &CallAnswer) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut().filter(|s| s.call_id == answer.call_id) else {
            return;
        };
        // The accepting leg already transitioned locally; only the caller
        // moves here.
        if session.state == CallState::OutgoingRinging {
            if session.apply_transition(CallTransition::Accepted).is_ok() {
                info!(target: "Calls", "Call {} accepted by {}", answer.call_id, answer.receiver_id);
            }
        }
    }

    async fn handle_declined(&self, rejection: &CallRejection) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut().filter(|s| s.call_id == rejection.call_id) else {
            return;
        };
        if session.state.is_ringing() {
            if session.apply_transition(CallTransition::Declined).is_ok() {
                info!(target: "Calls", "Call {} declined", rejection.call_id);
            }
        }
    }

    async fn handle_ended(&self, termination: &CallTermination) {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut().filter(|s| s.call_id == termination.call_id) else {
            return;
        };
        // The leg that hung up already transitioned locally.
        if !session.state.is_free() {
            if session.apply_transition(CallTransition::Ended).is_ok() {
                info!(target: "Calls", "Call {} ended by {}", termination.call_id, termination.user_id);
            }
        }
    }
}
