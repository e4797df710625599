use std::time::Duration;

/// Configuration for the realtime socket. The endpoint itself belongs to the
/// transport factory; this only covers connection policy.
#[derive(Clone, Debug)]
pub struct SocketConfig {
    /// Delay unit for the linear reconnect schedule (attempt `n` waits `n`
    /// times this).
    pub reconnect_base_delay: Duration,
    /// Reconnect attempts before giving up until the next explicit
    /// `connect()`.
    pub max_reconnect_attempts: u32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_millis(2000),
            max_reconnect_attempts: 5,
        }
    }
}

/// Configuration for the call signaling service.
#[derive(Clone, Debug)]
pub struct SignalingConfig {
    /// How long `connect()` waits for the socket to come up before giving up
    /// on registering with the call service.
    pub register_timeout: Duration,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            register_timeout: Duration::from_secs(10),
        }
    }
}
