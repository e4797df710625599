//! Peer connection health monitoring and recovery.
//!
//! Detects both explicit and *silent* failure of a live peer connection.
//! State-change callbacks under-detect the silent class (a path can die
//! mid-call while the connection keeps reporting `connected`, e.g. after a
//! NAT rebinding with no renegotiation), so a periodic staleness check
//! queries candidate-pair statistics and folds a dead path into the same
//! recovery cycle as an observed disconnect.
//!
//! The monitor never renegotiates media itself: each backoff attempt raises
//! a [`RecoverySignal`] for external renegotiation logic to consume.

use super::stats::{IceConnectionState, PeerConnectionHandle, PeerConnectionState};
use crate::backoff::Backoff;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

const RECOVERY_CHANNEL_CAPACITY: usize = 16;

/// Configuration for a connection monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// First recovery delay; attempt `n` waits `min(base * 2^(n-1), max)`.
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    /// How often the passive staleness check runs.
    pub health_check_interval: Duration,
    /// Activity age beyond which a `connected` peer is suspected stale.
    pub stale_after: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(16000),
            max_retries: 5,
            health_check_interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// Raised on each recovery attempt; consumed by renegotiation logic outside
/// this crate.
#[derive(Debug, Clone)]
pub struct RecoverySignal {
    pub attempt: u32,
    pub max_retries: u32,
}

/// Callbacks reporting the monitor's view of the connection. All methods
/// default to no-ops so implementors override only what they need.
#[async_trait]
pub trait MonitorCallback: Send + Sync {
    async fn on_connection_lost(&self) {}

    async fn on_reconnecting(&self, _attempt: u32) {}

    async fn on_reconnected(&self) {}

    async fn on_reconnect_failed(&self) {}
}

/// Watches one peer connection and drives a bounded, independent recovery
/// cycle. Each monitor owns its own retry budget; it shares nothing with
/// the socket's reconnection counters.
pub struct ConnectionMonitor {
    config: MonitorConfig,
    callback: Arc<dyn MonitorCallback>,

    peer: Mutex<Option<Arc<dyn PeerConnectionHandle>>>,
    monitoring: AtomicBool,
    connected: AtomicBool,
    is_reconnecting: AtomicBool,
    last_activity: Mutex<Instant>,

    backoff: Mutex<Backoff>,
    retry_timer: Mutex<Option<JoinHandle<()>>>,
    health_task: Mutex<Option<JoinHandle<()>>>,
    recovery_tx: broadcast::Sender<RecoverySignal>,
}

impl ConnectionMonitor {
    pub fn new(config: MonitorConfig, callback: Arc<dyn MonitorCallback>) -> Arc<Self> {
        let backoff = Backoff::exponential(
            config.base_delay,
            config.max_delay,
            config.max_retries,
        );
        Arc::new(Self {
            config,
            callback,
            peer: Mutex::new(None),
            monitoring: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            is_reconnecting: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
            backoff: Mutex::new(backoff),
            retry_timer: Mutex::new(None),
            health_task: Mutex::new(None),
            recovery_tx: broadcast::channel(RECOVERY_CHANNEL_CAPACITY).0,
        })
    }

    /// Recovery signals raised by the backoff cycle.
    pub fn subscribe_recovery(&self) -> broadcast::Receiver<RecoverySignal> {
        self.recovery_tx.subscribe()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.is_reconnecting.load(Ordering::SeqCst)
    }

    /// Attaches to a peer connection and starts the staleness check.
    /// Replaces any previously monitored connection.
    pub async fn start_monitoring(self: &Arc<Self>, peer: Arc<dyn PeerConnectionHandle>) {
        self.stop_monitoring().await;

        *self.peer.lock().await = Some(peer);
        *self.last_activity.lock().await = Instant::now();
        self.monitoring.store(true, Ordering::SeqCst);

        let monitor = self.clone();
        let interval = self.config.health_check_interval;
        *self.health_task.lock().await = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                monitor.health_check().await;
            }
        }));
        debug!(target: "Monitor", "Started monitoring peer connection");
    }

    /// Cancels the staleness check and any pending recovery timer; clears
    /// the retry budget. Idempotent.
    pub async fn stop_monitoring(&self) {
        self.monitoring.store(false, Ordering::SeqCst);
        if let Some(task) = self.retry_timer.lock().await.take() {
            task.abort();
        }
        if let Some(task) = self.health_task.lock().await.take() {
            task.abort();
        }
        self.is_reconnecting.store(false, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        self.backoff.lock().await.reset();
        *self.peer.lock().await = None;
    }

    /// Clears the retry budget without touching timers. For callers that
    /// restored the connection through means other than the automatic path.
    pub async fn reset_retry_count(&self) {
        self.backoff.lock().await.reset();
    }

    /// Feed a coarse connection-state change observed on the peer
    /// connection.
    pub async fn handle_connection_state(self: &Arc<Self>, state: PeerConnectionState) {
        if !self.monitoring.load(Ordering::SeqCst) {
            return;
        }
        match state {
            PeerConnectionState::Connected => self.on_peer_connected().await,
            PeerConnectionState::Disconnected
            | PeerConnectionState::Failed
            | PeerConnectionState::Closed => self.on_peer_lost().await,
            PeerConnectionState::New | PeerConnectionState::Connecting => {}
        }
    }

    /// Feed an ICE connectivity-state change observed on the peer
    /// connection. Either this or the coarse state can confirm
    /// connectivity.
    pub async fn handle_ice_state(self: &Arc<Self>, state: IceConnectionState) {
        if !self.monitoring.load(Ordering::SeqCst) {
            return;
        }
        match state {
            IceConnectionState::Connected | IceConnectionState::Completed => {
                self.on_peer_connected().await
            }
            IceConnectionState::Disconnected
            | IceConnectionState::Failed
            | IceConnectionState::Closed => self.on_peer_lost().await,
            IceConnectionState::New | IceConnectionState::Checking => {}
        }
    }

    async fn on_peer_connected(self: &Arc<Self>) {
        *self.last_activity.lock().await = Instant::now();

        let was_reconnecting = self.is_reconnecting.swap(false, Ordering::SeqCst);
        let was_connected = self.connected.swap(true, Ordering::SeqCst);
        if was_connected && !was_reconnecting {
            // Duplicate notification while healthy.
            return;
        }

        if let Some(timer) = self.retry_timer.lock().await.take() {
            timer.abort();
        }
        self.backoff.lock().await.reset();
        info!(target: "Monitor", "Peer connection confirmed connected");
        self.callback.on_reconnected().await;
    }

    async fn on_peer_lost(self: &Arc<Self>) {
        self.connected.store(false, Ordering::SeqCst);
        if self.is_reconnecting.swap(true, Ordering::SeqCst) {
            // Re-entrant disconnect notifications do not restart the
            // backoff.
            debug!(target: "Monitor", "Already in recovery, ignoring disconnect");
            return;
        }

        warn!(target: "Monitor", "Peer connection lost, starting recovery");
        self.callback.on_connection_lost().await;
        self.begin_recovery().await;
    }

    async fn begin_recovery(self: &Arc<Self>) {
        let monitor = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                let next = {
                    let mut backoff = monitor.backoff.lock().await;
                    backoff
                        .next_delay()
                        .map(|delay| (delay, backoff.attempt(), backoff.max_retries()))
                };
                let Some((delay, attempt, max_retries)) = next else {
                    warn!(target: "Monitor", "Recovery attempts exhausted");
                    monitor.callback.on_reconnect_failed().await;
                    return;
                };

                debug!(
                    target: "Monitor",
                    "Recovery attempt {attempt}/{max_retries} in {delay:?}"
                );
                tokio::time::sleep(delay).await;
                if !monitor.monitoring.load(Ordering::SeqCst)
                    || !monitor.is_reconnecting.load(Ordering::SeqCst)
                {
                    return;
                }

                info!(target: "Monitor", "Raising recovery signal (attempt {attempt})");
                monitor.callback.on_reconnecting(attempt).await;
                let _ = monitor.recovery_tx.send(RecoverySignal {
                    attempt,
                    max_retries,
                });
            }
        });
        if let Some(old) = self.retry_timer.lock().await.replace(handle) {
            old.abort();
        }
    }

    /// Passive staleness check. A peer that still claims `connected` but has
    /// shown no activity past the threshold is probed via candidate-pair
    /// statistics; no successful pair (or a failed query) is treated as a
    /// disconnect.
    async fn health_check(self: &Arc<Self>) {
        if !self.monitoring.load(Ordering::SeqCst) || self.is_reconnecting.load(Ordering::SeqCst)
        {
            return;
        }
        let peer = { self.peer.lock().await.clone() };
        let Some(peer) = peer else { return };
        if peer.connection_state() != PeerConnectionState::Connected {
            return;
        }

        let idle = self.last_activity.lock().await.elapsed();
        if idle <= self.config.stale_after {
            return;
        }

        match peer.candidate_pair_stats().await {
            Ok(pairs) if pairs.iter().any(|p| p.succeeded) => {
                *self.last_activity.lock().await = Instant::now();
            }
            Ok(_) => {
                warn!(
                    target: "Monitor",
                    "No successful candidate pair after {idle:?} idle, treating as disconnected"
                );
                self.on_peer_lost().await;
            }
            Err(e) => {
                // Fail safe toward reconnection.
                warn!(target: "Monitor", "Stats query failed ({e}), treating as disconnected");
                self.on_peer_lost().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webrtc::stats::{CandidatePairStats, StatsError};
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Copy)]
    enum StatsScript {
        OnePairSucceeded,
        NoPairSucceeded,
        QueryFails,
    }

    struct FakePeer {
        state: StdMutex<PeerConnectionState>,
        ice: StdMutex<IceConnectionState>,
        stats: StdMutex<StatsScript>,
    }

    impl FakePeer {
        fn connected(stats: StatsScript) -> Arc<Self> {
            Arc::new(Self {
                state: StdMutex::new(PeerConnectionState::Connected),
                ice: StdMutex::new(IceConnectionState::Connected),
                stats: StdMutex::new(stats),
            })
        }
    }

    #[async_trait]
    impl PeerConnectionHandle for FakePeer {
        fn connection_state(&self) -> PeerConnectionState {
            *self.state.lock().unwrap()
        }

        fn ice_connection_state(&self) -> IceConnectionState {
            *self.ice.lock().unwrap()
        }

        async fn candidate_pair_stats(&self) -> Result<Vec<CandidatePairStats>, StatsError> {
            match *self.stats.lock().unwrap() {
                StatsScript::OnePairSucceeded => Ok(vec![
                    CandidatePairStats {
                        id: "pair-0".into(),
                        succeeded: false,
                        nominated: false,
                    },
                    CandidatePairStats {
                        id: "pair-1".into(),
                        succeeded: true,
                        nominated: true,
                    },
                ]),
                StatsScript::NoPairSucceeded => Ok(vec![CandidatePairStats {
                    id: "pair-0".into(),
                    succeeded: false,
                    nominated: false,
                }]),
                StatsScript::QueryFails => Err(StatsError::Query("boom".into())),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<String>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MonitorCallback for Recorder {
        async fn on_connection_lost(&self) {
            self.events.lock().unwrap().push("lost".into());
        }

        async fn on_reconnecting(&self, attempt: u32) {
            self.events.lock().unwrap().push(format!("reconnecting:{attempt}"));
        }

        async fn on_reconnected(&self) {
            self.events.lock().unwrap().push("reconnected".into());
        }

        async fn on_reconnect_failed(&self) {
            self.events.lock().unwrap().push("failed".into());
        }
    }

    fn fast_config() -> MonitorConfig {
        MonitorConfig {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            max_retries: 3,
            // Keep the passive check out of the way unless a test wants it.
            health_check_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn full_recovery_cycle_raises_signals_then_fails() {
        let recorder = Arc::new(Recorder::default());
        let monitor = ConnectionMonitor::new(fast_config(), recorder.clone());
        let mut recovery = monitor.subscribe_recovery();

        monitor
            .start_monitoring(FakePeer::connected(StatsScript::OnePairSucceeded))
            .await;
        monitor
            .handle_connection_state(PeerConnectionState::Connected)
            .await;
        monitor
            .handle_connection_state(PeerConnectionState::Disconnected)
            .await;

        for expected in 1..=3u32 {
            let signal = tokio::time::timeout(Duration::from_secs(1), recovery.recv())
                .await
                .expect("recovery signal timed out")
                .unwrap();
            assert_eq!(signal.attempt, expected);
            assert_eq!(signal.max_retries, 3);
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            recorder.events(),
            vec![
                "reconnected",
                "lost",
                "reconnecting:1",
                "reconnecting:2",
                "reconnecting:3",
                "failed"
            ]
        );
        assert!(monitor.is_reconnecting());
    }

    #[tokio::test]
    async fn reentrant_disconnects_do_not_restart_backoff() {
        let recorder = Arc::new(Recorder::default());
        let monitor = ConnectionMonitor::new(fast_config(), recorder.clone());

        monitor
            .start_monitoring(FakePeer::connected(StatsScript::OnePairSucceeded))
            .await;
        monitor
            .handle_connection_state(PeerConnectionState::Disconnected)
            .await;
        monitor
            .handle_connection_state(PeerConnectionState::Failed)
            .await;
        monitor
            .handle_ice_state(IceConnectionState::Disconnected)
            .await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let lost = recorder.events().iter().filter(|e| *e == "lost").count();
        assert_eq!(lost, 1);
    }

    #[tokio::test]
    async fn reconnect_during_recovery_cancels_the_cycle() {
        let recorder = Arc::new(Recorder::default());
        let monitor = ConnectionMonitor::new(
            MonitorConfig {
                base_delay: Duration::from_millis(50),
                ..fast_config()
            },
            recorder.clone(),
        );

        monitor
            .start_monitoring(FakePeer::connected(StatsScript::OnePairSucceeded))
            .await;
        monitor
            .handle_connection_state(PeerConnectionState::Disconnected)
            .await;
        assert!(monitor.is_reconnecting());

        // Renegotiation succeeded before the first attempt fired.
        monitor
            .handle_ice_state(IceConnectionState::Completed)
            .await;
        assert!(!monitor.is_reconnecting());

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(recorder.events(), vec!["lost", "reconnected"]);
    }

    #[tokio::test]
    async fn stop_monitoring_is_inert_afterwards() {
        let recorder = Arc::new(Recorder::default());
        let monitor = ConnectionMonitor::new(fast_config(), recorder.clone());

        monitor
            .start_monitoring(FakePeer::connected(StatsScript::OnePairSucceeded))
            .await;
        monitor.stop_monitoring().await;
        monitor.stop_monitoring().await;

        monitor
            .handle_connection_state(PeerConnectionState::Disconnected)
            .await;
        monitor
            .handle_ice_state(IceConnectionState::Failed)
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(recorder.events().is_empty());
        assert!(!monitor.is_reconnecting());
        assert!(monitor.retry_timer.lock().await.is_none());
    }

    #[tokio::test]
    async fn stale_connected_peer_enters_recovery_without_state_change() {
        let recorder = Arc::new(Recorder::default());
        let monitor = ConnectionMonitor::new(
            MonitorConfig {
                health_check_interval: Duration::from_millis(20),
                stale_after: Duration::from_millis(50),
                ..fast_config()
            },
            recorder.clone(),
        );

        monitor
            .start_monitoring(FakePeer::connected(StatsScript::NoPairSucceeded))
            .await;

        // No explicit state-change callback ever fires.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(monitor.is_reconnecting());
        assert!(recorder.events().contains(&"lost".to_string()));
    }

    #[tokio::test]
    async fn active_candidate_pair_refreshes_activity() {
        let recorder = Arc::new(Recorder::default());
        let monitor = ConnectionMonitor::new(
            MonitorConfig {
                health_check_interval: Duration::from_millis(20),
                stale_after: Duration::from_millis(50),
                ..fast_config()
            },
            recorder.clone(),
        );

        monitor
            .start_monitoring(FakePeer::connected(StatsScript::OnePairSucceeded))
            .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!monitor.is_reconnecting());
        assert!(!recorder.events().contains(&"lost".to_string()));
    }

    #[tokio::test]
    async fn failed_stats_query_is_treated_as_disconnect() {
        let recorder = Arc::new(Recorder::default());
        let monitor = ConnectionMonitor::new(
            MonitorConfig {
                health_check_interval: Duration::from_millis(20),
                stale_after: Duration::from_millis(50),
                ..fast_config()
            },
            recorder.clone(),
        );

        monitor
            .start_monitoring(FakePeer::connected(StatsScript::QueryFails))
            .await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(monitor.is_reconnecting());
    }

    #[tokio::test]
    async fn reset_after_exhaustion_allows_a_new_cycle() {
        let recorder = Arc::new(Recorder::default());
        let monitor = ConnectionMonitor::new(fast_config(), recorder.clone());

        monitor
            .start_monitoring(FakePeer::connected(StatsScript::OnePairSucceeded))
            .await;
        monitor
            .handle_connection_state(PeerConnectionState::Disconnected)
            .await;

        // Burn through the whole budget.
        let recorder2 = recorder.clone();
        let exhausted = || recorder2.events().contains(&"failed".to_string());
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        while !exhausted() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(exhausted());
        assert!(monitor.is_reconnecting());

        monitor.reset_retry_count().await;
        monitor
            .handle_connection_state(PeerConnectionState::Connected)
            .await;
        assert!(!monitor.is_reconnecting());

        let mut recovery = monitor.subscribe_recovery();
        monitor
            .handle_connection_state(PeerConnectionState::Disconnected)
            .await;
        let signal = tokio::time::timeout(Duration::from_secs(1), recovery.recv())
            .await
            .expect("expected a fresh recovery cycle")
            .unwrap();
        assert_eq!(signal.attempt, 1);
    }
}
