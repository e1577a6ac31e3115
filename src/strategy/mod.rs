//! Strategy abstraction: detect availability of, then construct, one kind
//! of [`crate::transport::Transport`].
//!
//! Build cheap config first, expensive connect second: `detect()` only
//! probes, `connect()` performs the full handshake.

pub mod lan;
pub mod tailscale;
pub mod webrtc;

use std::sync::Arc;

use async_trait::async_trait;

use crate::credentials::Endpoint;
use crate::errors::StrategyError;
use crate::progress::ProgressSink;
use crate::signalling::SignallingChannel;
use crate::transport::Transport;

/// Outcome of [`Strategy::detect`].
#[derive(Debug, Clone)]
pub enum DetectOutcome {
    /// The strategy believes it can attempt a connection.
    Available(Option<String>),
    /// The strategy cannot currently attempt a connection.
    Unavailable(String),
}

/// Immutable per-attempt record passed to every strategy.
///
/// Equality is inherited from [`crate::credentials::Credentials`]'
/// `device_id`-only comparison via the `device_id` field held here.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Stable identifier for the paired daemon.
    pub device_id: String,
    /// Cached LAN endpoint, if known.
    pub lan_endpoint: Option<Endpoint>,
    /// Cached VPN endpoint, if known.
    pub vpn_endpoint: Option<Endpoint>,
    /// Cached Tailscale endpoint, if known.
    pub tailscale_endpoint: Option<Endpoint>,
    /// Signalling channel handle, shared across strategies this attempt.
    pub signalling: Arc<dyn SignallingChannel>,
    /// 32-byte session auth key (or the material to derive it — this crate
    /// always passes the already-derived key).
    pub auth_key: [u8; 32],
    /// Whether Phase 0 detected a local Tailscale interface.
    pub local_tailscale_available: bool,
    /// Progress sink strategies report through.
    pub progress: ProgressSink,
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("device_id", &self.device_id)
            .field("local_tailscale_available", &self.local_tailscale_available)
            .finish_non_exhaustive()
    }
}

/// A named algorithm for detecting and building one kind of transport.
///
/// `detect()` must be cheap; any state it gathers may be cached by the
/// implementation for the immediately following `connect()`, and the cache
/// is cleared regardless of `connect()`'s outcome.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Stable, human-readable name used in progress events and logs.
    fn name(&self) -> &'static str;

    /// Lower runs earlier. Recommended: LAN-direct 5, Tailscale 10, WebRTC 20.
    fn priority(&self) -> u32;

    /// Cheap local probe; must not perform the connection itself.
    async fn detect(&self, ctx: &ConnectionContext) -> DetectOutcome;

    /// Perform the full handshake and return a live transport.
    ///
    /// # Errors
    ///
    /// [`StrategyError::AuthFailed`] is never retried this cycle; any other
    /// variant may be retried by falling through to the next strategy (the
    /// orchestrator does not retry the same strategy within one attempt
    /// regardless).
    async fn connect(&self, ctx: &ConnectionContext) -> Result<Arc<dyn Transport>, StrategyError>;
}
