//! Progress events emitted to the application during a connection attempt.
//!
//! A closed sum type, grouped by phase, per the external-interfaces
//! section: the core emits these but never consumes them itself.

use crate::credentials::ConnectionCapabilities;
use crate::transport::TransportKind;

/// One strategy's failed connection attempt, recorded for the orchestrator's
/// terminal `AllFailed` report.
#[derive(Debug, Clone)]
pub struct FailedAttempt {
    /// Strategy name.
    pub name: &'static str,
    /// Human-readable failure description.
    pub error: String,
    /// How long the attempt ran before failing.
    pub duration_ms: u64,
}

/// A progress event produced during orchestration.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    // --- Discovery ---
    /// A connection attempt has begun.
    DiscoveryStarted,
    /// Phase 0 is probing for a local Tailscale interface.
    TailscaleDetecting,
    /// Local capabilities computed for this attempt.
    LocalCapabilities {
        /// Whether a local Tailscale interface was found.
        tailscale_available: bool,
    },
    /// Beginning the capability-exchange round-trip.
    ExchangingCapabilities,
    /// Capability exchange was skipped (e.g. no local Tailscale).
    CapabilityExchangeSkipped {
        /// Why it was skipped.
        reason: String,
    },
    /// Capability exchange failed.
    CapabilityExchangeFailed {
        /// Why it failed.
        reason: String,
    },
    /// The daemon's capabilities as reported by the exchange.
    DaemonCapabilities(ConnectionCapabilities),

    // --- Detection ---
    /// A strategy's `detect()` is running.
    Detecting {
        /// Strategy name.
        name: &'static str,
    },
    /// A strategy reported itself available.
    StrategyAvailable {
        /// Strategy name.
        name: &'static str,
        /// Optional detail from `detect()`.
        info: Option<String>,
    },
    /// A strategy reported itself unavailable.
    StrategyUnavailable {
        /// Strategy name.
        name: &'static str,
        /// Why it's unavailable.
        reason: String,
    },

    // --- Signalling ---
    /// Subscribing to the signalling channel.
    NtfySubscribing,
    /// Subscribed successfully.
    NtfySubscribed,
    /// Sending a WebRTC offer over signalling.
    NtfySendingOffer,
    /// Waiting for the peer's SDP answer.
    NtfyWaitingForAnswer,
    /// An answer arrived.
    NtfyReceivedAnswer {
        /// Number of ICE candidates the answer carried.
        count: usize,
    },
    /// Retrying signalling after a transient failure.
    NtfyRetrying {
        /// Current attempt number.
        attempt: u32,
        /// Maximum attempts before giving up.
        max: u32,
    },
    /// Attempting direct (non-relayed) signalling.
    TryingDirectSignaling {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },
    /// Direct signalling timed out.
    DirectSignalingTimeout {
        /// Target host.
        host: String,
        /// Target port.
        port: u16,
    },

    // --- Connection ---
    /// A strategy's `connect()` reached a named step.
    Connecting {
        /// Strategy name.
        name: &'static str,
        /// Step within the connect sequence.
        step: String,
        /// Optional extra detail.
        detail: Option<String>,
        /// Optional fractional progress, 0.0-1.0.
        progress: Option<f32>,
    },
    /// A strategy's `connect()` failed.
    StrategyFailed {
        /// Strategy name.
        name: &'static str,
        /// Failure description.
        error: String,
        /// Attempt duration.
        duration_ms: u64,
        /// Whether the orchestrator will try the next strategy.
        will_try_next: bool,
    },
    /// A strategy's `connect()` succeeded.
    Connected {
        /// Strategy name.
        name: &'static str,
        /// The transport kind actually established.
        transport: TransportKind,
        /// Attempt duration.
        duration_ms: u64,
    },

    // --- Authentication ---
    /// The transport-level handshake is authenticating.
    Authenticating,
    /// Authentication succeeded.
    Authenticated,
    /// Authentication failed.
    AuthenticationFailed {
        /// Why authentication failed.
        reason: String,
    },

    // --- Terminal ---
    /// Every available strategy failed.
    AllFailed {
        /// One entry per strategy that reached `Failed` (never includes
        /// strategies that reported `Unavailable`).
        attempts: Vec<FailedAttempt>,
    },
    /// The attempt was cancelled.
    Cancelled,
}

/// Sink strategies and the orchestrator report progress through.
///
/// A thin wrapper over an unbounded channel sender so reporting progress is
/// infallible from the caller's perspective (a dropped receiver just means
/// nobody's listening, per spec's "callback may be invoked from any task").
#[derive(Clone)]
pub struct ProgressSink(tokio::sync::mpsc::UnboundedSender<ProgressEvent>);

impl std::fmt::Debug for ProgressSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressSink").finish_non_exhaustive()
    }
}

impl ProgressSink {
    /// Create a sink/receiver pair.
    #[must_use]
    pub fn channel() -> (Self, tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self(tx), rx)
    }

    /// Report an event. Silently does nothing if nobody is listening.
    pub fn report(&self, event: ProgressEvent) {
        let _ = self.0.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_delivers_events_in_order() {
        let (sink, mut rx) = ProgressSink::channel();
        sink.report(ProgressEvent::DiscoveryStarted);
        sink.report(ProgressEvent::TailscaleDetecting);

        assert!(matches!(rx.recv().await, Some(ProgressEvent::DiscoveryStarted)));
        assert!(matches!(rx.recv().await, Some(ProgressEvent::TailscaleDetecting)));
    }

    #[tokio::test]
    async fn report_after_receiver_dropped_does_not_panic() {
        let (sink, rx) = ProgressSink::channel();
        drop(rx);
        sink.report(ProgressEvent::Cancelled);
    }
}
