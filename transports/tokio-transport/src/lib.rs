//! Tokio-based WebSocket transport for wavecall.
//!
//! This crate provides the concrete implementation of the `Transport` trait
//! using tokio-tungstenite. Frames are UTF-8 JSON envelopes; framing and
//! protocol semantics live in the main crate.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A text frame has been received from the server.
    TextReceived(String),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a text frame to the server.
    async fn send_text(&self, frame: &str) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
///
/// The bearer credential is handed over opaquely; how it is attached to the
/// connection (query parameter, header) is the factory's concern.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
        bearer_token: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

const FRAME_MAX_SIZE: usize = 1 << 20;

/// Tokio-based WebSocket transport
pub struct TokioWebSocketTransport {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
}

impl TokioWebSocketTransport {
    fn new(sink: WsSink) -> Self {
        Self {
            ws_sink: Arc::new(Mutex::new(Some(sink))),
        }
    }
}

#[async_trait]
impl Transport for TokioWebSocketTransport {
    async fn send_text(&self, frame: &str) -> Result<(), anyhow::Error> {
        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Socket is closed"))?;

        if frame.len() >= FRAME_MAX_SIZE {
            return Err(anyhow::anyhow!(
                "Frame is too large (max: {}, got: {})",
                FRAME_MAX_SIZE,
                frame.len()
            ));
        }

        debug!("--> Sending frame: {} bytes", frame.len());
        sink.send(Message::Text(frame.to_owned().into()))
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket send error: {}", e))?;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut sink_guard = self.ws_sink.lock().await;
        if let Some(mut sink) = sink_guard.take() {
            if let Err(e) = sink.close().await {
                debug!("Error closing websocket sink: {e}");
            }
        }
    }
}

/// Factory for creating Tokio WebSocket transports.
pub struct TokioWebSocketTransportFactory {
    url: String,
}

impl TokioWebSocketTransportFactory {
    /// Create a new factory dialing the given `wss://` endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl TransportFactory for TokioWebSocketTransportFactory {
    async fn create_transport(
        &self,
        bearer_token: &str,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let url = format!("{}?token={}", self.url, urlencoding::encode(bearer_token));

        info!("Dialing {}", self.url);
        let (client, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| anyhow::anyhow!("WebSocket connect failed: {}", e))?;

        let (sink, stream) = client.split();

        let (event_tx, event_rx) = mpsc::channel(100);

        let transport = Arc::new(TokioWebSocketTransport::new(sink));

        let event_tx_clone = event_tx.clone();
        tokio::task::spawn(read_pump(stream, event_tx_clone));

        let _ = event_tx.send(TransportEvent::Connected).await;

        Ok((transport, event_rx))
    }
}

async fn read_pump(mut stream: WsStream, event_tx: mpsc::Sender<TransportEvent>) {
    loop {
        match stream.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    trace!("<-- Received frame: {} bytes", text.len());
                    if event_tx
                        .send(TransportEvent::TextReceived(text.to_string()))
                        .await
                        .is_err()
                    {
                        warn!("Event receiver dropped, closing read pump");
                        break;
                    }
                }
                Message::Binary(data) => {
                    debug!("Ignoring unexpected binary frame ({} bytes)", data.len());
                }
                Message::Close(_) => {
                    trace!("Received close frame");
                    break;
                }
                // Ping/pong frames are answered by tungstenite itself.
                _ => {}
            },
            Some(Err(e)) => {
                error!("Error reading from websocket: {e}");
                break;
            }
            None => {
                trace!("Websocket stream ended");
                break;
            }
        }
    }

    let _ = event_tx.send(TransportEvent::Disconnected).await;
}
