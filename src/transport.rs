pub use wavecall_tokio_transport::{
    TokioWebSocketTransportFactory, Transport, TransportEvent, TransportFactory,
};

#[cfg(test)]
pub mod mock {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use tokio::sync::{Mutex, mpsc};

    /// A mock transport that records sent frames, for testing purposes.
    #[derive(Default)]
    pub struct MockTransport {
        pub sent: Mutex<Vec<String>>,
        pub closed: AtomicBool,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send_text(&self, frame: &str) -> Result<(), anyhow::Error> {
            if self.closed.load(Ordering::Relaxed) {
                return Err(anyhow::anyhow!("Socket is closed"));
            }
            self.sent.lock().await.push(frame.to_string());
            Ok(())
        }

        async fn disconnect(&self) {
            self.closed.store(true, Ordering::Relaxed);
        }
    }

    /// One simulated connection handed out by the mock factory. Tests drive
    /// the server side through `events`.
    pub struct MockConnection {
        pub transport: Arc<MockTransport>,
        pub events: mpsc::Sender<TransportEvent>,
    }

    /// A mock transport factory for testing.
    #[derive(Default)]
    pub struct MockTransportFactory {
        pub created: AtomicU32,
        pub fail_connects: AtomicBool,
        connections: Mutex<Vec<MockConnection>>,
    }

    impl MockTransportFactory {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn created(&self) -> u32 {
            self.created.load(Ordering::Relaxed)
        }

        /// The most recently created connection.
        pub async fn last_connection(&self) -> Option<mpsc::Sender<TransportEvent>> {
            self.connections
                .lock()
                .await
                .last()
                .map(|c| c.events.clone())
        }

        pub async fn last_transport(&self) -> Option<Arc<MockTransport>> {
            self.connections
                .lock()
                .await
                .last()
                .map(|c| c.transport.clone())
        }
    }

    #[async_trait]
    impl TransportFactory for MockTransportFactory {
        async fn create_transport(
            &self,
            _bearer_token: &str,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            self.created.fetch_add(1, Ordering::Relaxed);
            if self.fail_connects.load(Ordering::Relaxed) {
                return Err(anyhow::anyhow!("simulated connect failure"));
            }
            let (tx, rx) = mpsc::channel(16);
            let transport = Arc::new(MockTransport::default());
            self.connections.lock().await.push(MockConnection {
                transport: transport.clone(),
                events: tx,
            });
            Ok((transport, rx))
        }
    }
}
