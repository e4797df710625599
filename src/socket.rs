//! The persistent realtime connection.
//!
//! `SocketManager` owns the single WebSocket to the realtime backend. It
//! handles credentialed connect/disconnect, re-publishes every inbound
//! server message on the [`EventBus`], and recovers from transport failures
//! with a bounded linear backoff. A client-initiated `disconnect()` never
//! triggers reconnection.

use crate::backoff::Backoff;
use crate::config::SocketConfig;
use crate::events::{Connected, DisconnectReason, Disconnected, EventBus, SocketFailure};
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::wire::{ClientMessage, ServerMessage};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("no bearer credential available")]
    NoCredential,
    #[error("socket is not connected")]
    NotConnected,
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Source of the opaque bearer credential carried on connect.
///
/// Issuing and refreshing the credential happens elsewhere; the socket only
/// asks for the current one. A missing credential is a local, non-retryable
/// condition, distinct from network failure.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Option<String>;
}

/// Credential provider backed by a token known at construction time.
pub struct StaticCredentials(String);

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Owns the single authenticated connection for a session.
///
/// Constructed once at session start and shared by `Arc`; the call signaling
/// service and any other consumer read it through the event bus rather than
/// polling its state.
pub struct SocketManager {
    credentials: Arc<dyn CredentialProvider>,
    factory: Arc<dyn TransportFactory>,
    event_bus: Arc<EventBus>,

    transport: Mutex<Option<Arc<dyn Transport>>>,
    is_connected: AtomicBool,
    is_connecting: AtomicBool,
    expected_disconnect: AtomicBool,

    reconnect: Mutex<Backoff>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl SocketManager {
    pub fn new(
        config: SocketConfig,
        credentials: Arc<dyn CredentialProvider>,
        factory: Arc<dyn TransportFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            credentials,
            factory,
            event_bus: Arc::new(EventBus::new()),
            transport: Mutex::new(None),
            is_connected: AtomicBool::new(false),
            is_connecting: AtomicBool::new(false),
            expected_disconnect: AtomicBool::new(false),
            reconnect: Mutex::new(Backoff::linear(
                config.reconnect_base_delay,
                config.max_reconnect_attempts,
            )),
            reconnect_timer: Mutex::new(None),
            read_task: Mutex::new(None),
        })
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    /// Opens the connection. No-op while already connected or while another
    /// connect is in flight; any stale transport is torn down first.
    ///
    /// Boxed so the reconnect timer can await a fresh `connect()` without
    /// forming a recursive opaque future.
    pub fn connect(
        self: &Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), SocketError>> + Send>> {
        let mgr = self.clone();
        Box::pin(async move { mgr.connect_impl().await })
    }

    async fn connect_impl(self: Arc<Self>) -> Result<(), SocketError> {
        if self.is_connected() {
            debug!(target: "Socket", "Already connected, ignoring connect()");
            return Ok(());
        }
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            debug!(target: "Socket", "Connect already in progress");
            return Ok(());
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        self.expected_disconnect.store(false, Ordering::SeqCst);
        self.teardown_transport().await;

        let Some(token) = self.credentials.bearer_token().await else {
            error!(target: "Socket", "No bearer credential available, refusing to connect");
            return Err(SocketError::NoCredential);
        };

        match self.factory.create_transport(&token).await {
            Ok((transport, events)) => {
                *self.transport.lock().await = Some(transport);
                self.is_connected.store(true, Ordering::SeqCst);
                self.reconnect.lock().await.reset();

                let mgr = self.clone();
                *self.read_task.lock().await =
                    Some(tokio::spawn(async move { mgr.read_loop(events).await }));

                info!(target: "Socket", "Connected to realtime backend");
                let _ = self.event_bus.connected.send(Arc::new(Connected));
                Ok(())
            }
            Err(e) => {
                warn!(target: "Socket", "Connect attempt failed: {e}");
                let _ = self.event_bus.socket_failure.send(Arc::new(SocketFailure {
                    message: e.to_string(),
                }));
                self.schedule_reconnect().await;
                Err(SocketError::Transport(e))
            }
        }
    }

    /// Tears down the connection and resets the retry budget. Idempotent;
    /// never triggers reconnection.
    pub async fn disconnect(&self) {
        info!(target: "Socket", "Disconnecting socket intentionally");
        self.expected_disconnect.store(true, Ordering::SeqCst);

        if let Some(timer) = self.reconnect_timer.lock().await.take() {
            timer.abort();
        }
        self.teardown_transport().await;
        self.reconnect.lock().await.reset();

        if self.is_connected.swap(false, Ordering::SeqCst) {
            let _ = self.event_bus.disconnected.send(Arc::new(Disconnected {
                reason: DisconnectReason::Client,
            }));
        }
    }

    async fn teardown_transport(&self) {
        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
        }
        if let Some(transport) = self.transport.lock().await.take() {
            debug!(target: "Socket", "Tearing down previous transport");
            transport.disconnect().await;
        }
    }

    /// Sends a message; `Err(SocketError::NotConnected)` while the connection
    /// is down.
    pub async fn send(&self, message: &ClientMessage) -> Result<(), SocketError> {
        let frame = serde_json::to_string(message)?;
        let guard = self.transport.lock().await;
        let transport = guard.as_ref().ok_or(SocketError::NotConnected)?;
        transport
            .send_text(&frame)
            .await
            .map_err(SocketError::Transport)
    }

    /// Sends a message, downgrading a dead connection to a logged warning.
    /// Generic events are a recoverable no-op while disconnected.
    pub async fn send_lenient(&self, message: ClientMessage) {
        if let Err(e) = self.send(&message).await {
            warn!(target: "Socket", "Dropping outbound message: {e}");
        }
    }

    pub async fn join_conversation(&self, conversation_id: &str) {
        self.send_lenient(ClientMessage::JoinConversation {
            conversation_id: conversation_id.to_string(),
        })
        .await;
    }

    pub async fn leave_conversation(&self, conversation_id: &str) {
        self.send_lenient(ClientMessage::LeaveConversation {
            conversation_id: conversation_id.to_string(),
        })
        .await;
    }

    /// Unlike the generic events, sending a chat message while disconnected
    /// is an explicit error the caller must handle.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        message_type: &str,
        reply_to: Option<String>,
        media: Option<Value>,
    ) -> Result<(), SocketError> {
        self.send(&ClientMessage::SendMessage {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            message_type: message_type.to_string(),
            reply_to,
            media,
        })
        .await
    }

    pub async fn typing_start(&self, conversation_id: &str) {
        self.send_lenient(ClientMessage::TypingStart {
            conversation_id: conversation_id.to_string(),
        })
        .await;
    }

    pub async fn typing_stop(&self, conversation_id: &str) {
        self.send_lenient(ClientMessage::TypingStop {
            conversation_id: conversation_id.to_string(),
        })
        .await;
    }

    pub async fn mark_message_read(&self, conversation_id: &str, message_id: &str) {
        self.send_lenient(ClientMessage::MarkMessageRead {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        })
        .await;
    }

    async fn read_loop(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => {}
                TransportEvent::TextReceived(frame) => self.handle_frame(&frame),
                TransportEvent::Disconnected => break,
            }
        }

        self.is_connected.store(false, Ordering::SeqCst);
        *self.transport.lock().await = None;

        if self.expected_disconnect.load(Ordering::SeqCst) {
            debug!(target: "Socket", "Read loop ended after client disconnect");
            return;
        }

        warn!(target: "Socket", "Connection lost (server-initiated)");
        let _ = self.event_bus.disconnected.send(Arc::new(Disconnected {
            reason: DisconnectReason::Server,
        }));
        self.schedule_reconnect().await;
    }

    async fn schedule_reconnect(self: &Arc<Self>) {
        if self.expected_disconnect.load(Ordering::SeqCst) {
            return;
        }

        let delay = {
            let mut backoff = self.reconnect.lock().await;
            match backoff.next_delay() {
                Some(delay) => {
                    info!(
                        target: "Socket",
                        "Scheduling reconnect attempt {} in {:?}",
                        backoff.attempt(),
                        delay
                    );
                    delay
                }
                None => {
                    warn!(
                        target: "Socket",
                        "Reconnect attempts exhausted; waiting for an explicit connect()"
                    );
                    return;
                }
            }
        };

        let mgr = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = mgr.connect().await {
                debug!(target: "Socket", "Reconnect attempt failed: {e}");
            }
        });
        if let Some(old) = self.reconnect_timer.lock().await.replace(handle) {
            if !old.is_finished() {
                old.abort();
            }
        }
    }

    fn handle_frame(&self, frame: &str) {
        match serde_json::from_str::<ServerMessage>(frame) {
            Ok(message) => self.dispatch(message),
            Err(e) => debug!(target: "Socket", "Dropping unknown or malformed frame: {e}"),
        }
    }

    /// Re-publishes a server message on the matching event bus channel.
    /// Send errors only mean nobody is subscribed.
    fn dispatch(&self, message: ServerMessage) {
        let bus = &self.event_bus;
        match message {
            ServerMessage::NewMessage(v) => {
                let _ = bus.new_message.send(Arc::new(v));
            }
            ServerMessage::MessageNotification(v) => {
                let _ = bus.message_notification.send(Arc::new(v));
            }
            ServerMessage::UserTyping(t) => {
                let _ = bus.user_typing.send(Arc::new(t));
            }
            ServerMessage::UserStoppedTyping(t) => {
                let _ = bus.user_stopped_typing.send(Arc::new(t));
            }
            ServerMessage::MessageRead(r) => {
                let _ = bus.message_read.send(Arc::new(r));
            }
            ServerMessage::UserStatusChange(p) => {
                let _ = bus.user_status_change.send(Arc::new(p));
            }
            ServerMessage::MessageError(v) => {
                let _ = bus.message_error.send(Arc::new(v));
            }
            ServerMessage::IncomingCall(n) => {
                let _ = bus.incoming_call.send(Arc::new(n));
            }
            ServerMessage::CallAccepted(a) => {
                let _ = bus.call_accepted.send(Arc::new(a));
            }
            ServerMessage::CallRejected(r) => {
                let _ = bus.call_rejected.send(Arc::new(r));
            }
            ServerMessage::CallEnded(t) => {
                let _ = bus.call_ended.send(Arc::new(t));
            }
            ServerMessage::CallCancelled(t) => {
                let _ = bus.call_cancelled.send(Arc::new(t));
            }
            ServerMessage::WebRtcOffer(s) => {
                let _ = bus.webrtc_offer.send(Arc::new(s));
            }
            ServerMessage::WebRtcAnswer(s) => {
                let _ = bus.webrtc_answer.send(Arc::new(s));
            }
            ServerMessage::WebRtcIceCandidate(c) => {
                let _ = bus.webrtc_ice_candidate.send(Arc::new(c));
            }
            ServerMessage::CallQualityUpdate(v) => {
                let _ = bus.call_quality_update.send(Arc::new(v));
            }
            ServerMessage::VideoCallIncoming(n) => {
                let _ = bus.video_call_incoming.send(Arc::new(n));
            }
            ServerMessage::VideoCallAccepted(a) => {
                let _ = bus.video_call_accepted.send(Arc::new(a));
            }
            ServerMessage::VideoCallDeclined(r) => {
                let _ = bus.video_call_declined.send(Arc::new(r));
            }
            ServerMessage::VideoCallEnded(t) => {
                let _ = bus.video_call_ended.send(Arc::new(t));
            }
        }
    }
}
