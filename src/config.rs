//! Timeout and threshold configuration.
//!
//! Every suspension-point timeout is a field here rather than a buried
//! literal, so a host application can tune them (or shorten them in tests)
//! without forking the crate.

use std::time::Duration;

/// Tunable timeouts and thresholds for the connection core.
///
/// `Default` reproduces every number called out in the design's
/// concurrency model.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bound on LAN mDNS discovery during `Strategy::detect()`.
    pub lan_mdns_detect_timeout: Duration,
    /// Per-attempt timeout for the Tailscale magic handshake.
    pub tailscale_handshake_attempt_timeout: Duration,
    /// Overall budget across all Tailscale handshake attempts.
    pub tailscale_handshake_total_timeout: Duration,
    /// Timeout waiting for the Tailscale auth-token ack byte.
    pub tailscale_auth_timeout: Duration,
    /// Timeout waiting for the WebRTC data channel to open.
    pub webrtc_datachannel_timeout: Duration,
    /// Timeout for the initial synchronous `ConnectionReady` send.
    pub connection_ready_send_timeout: Duration,
    /// Per-iteration timeout for the listener task's `receive`.
    pub listener_receive_timeout: Duration,
    /// Idle duration after which a transport is considered unhealthy.
    pub health_idle_threshold: Duration,
    /// Interval between heartbeat health polls.
    pub heartbeat_poll_interval: Duration,
    /// Maximum number of Tailscale handshake retries before failing.
    pub tailscale_handshake_max_attempts: u32,
    /// Minimum ICE candidates expected in a WebRTC offer before it is
    /// considered usable.
    pub webrtc_min_expected_candidates: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lan_mdns_detect_timeout: Duration::from_secs(1),
            tailscale_handshake_attempt_timeout: Duration::from_millis(500),
            tailscale_handshake_total_timeout: Duration::from_secs(2),
            tailscale_auth_timeout: Duration::from_secs(5),
            webrtc_datachannel_timeout: Duration::from_secs(30),
            connection_ready_send_timeout: Duration::from_secs(10),
            listener_receive_timeout: Duration::from_secs(60),
            health_idle_threshold: Duration::from_secs(90),
            heartbeat_poll_interval: Duration::from_secs(30),
            tailscale_handshake_max_attempts: 3,
            webrtc_min_expected_candidates: 1,
        }
    }
}
