//! Transport abstraction: a single bidirectional, length-framed byte-message
//! channel to a paired daemon.
//!
//! Send/receive over a boxed async transport, with `close`/`kind`
//! accessors, a typed `TransportError`, a `TransportStats` accessor used by
//! the manager's health probe, and a `TransportKind` discriminant used for
//! logging and for the WebRTC path-classification check.

pub mod lan;
pub mod tailscale;
pub mod webrtc;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::TransportError;

/// Which concrete transport backed a connection. Also doubles as the path
/// classification reported for WebRTC connections per spec §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Direct LAN WebSocket connection.
    LanDirect,
    /// Tailscale-range UDP connection.
    Tailscale,
    /// WebRTC data channel routed through a TURN relay.
    WebRtcRelay,
    /// WebRTC data channel whose active candidate pair is in the Tailscale
    /// range.
    WebRtcTailscale,
    /// WebRTC data channel whose active candidate pair is in the same /24
    /// as a local interface.
    WebRtcLanDirect,
    /// WebRTC data channel using a server-reflexive (STUN) candidate.
    WebRtcServerReflexive,
    /// WebRTC data channel that matched none of the above; the default
    /// classification.
    WebRtcDirect,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LanDirect => "lan-direct",
            Self::Tailscale => "tailscale",
            Self::WebRtcRelay => "webrtc-relay",
            Self::WebRtcTailscale => "webrtc-tailscale",
            Self::WebRtcLanDirect => "webrtc-lan-direct",
            Self::WebRtcServerReflexive => "webrtc-server-reflexive",
            Self::WebRtcDirect => "webrtc-direct",
        };
        f.write_str(s)
    }
}

/// Counters exposed by a transport for the manager's idle-health probe and
/// for diagnostics. All fields are monotonically increasing within a single
/// transport's lifetime.
#[derive(Debug, Default)]
pub struct TransportStats {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl TransportStats {
    pub(crate) fn record_send(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_receive(&self, bytes: usize) {
        self.bytes_received
            .fetch_add(bytes as u64, Ordering::Relaxed);
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Total bytes sent so far.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total bytes received so far.
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Total messages sent so far.
    #[must_use]
    pub fn messages_sent(&self) -> u64 {
        self.messages_sent.load(Ordering::Relaxed)
    }

    /// Total messages received so far.
    #[must_use]
    pub fn messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }
}

/// A single bidirectional, message-framed, authenticated-at-a-higher-layer
/// byte transport to a paired daemon.
///
/// Implementations never re-open once [`Transport::close`] has been called;
/// a fresh attempt constructs a fresh instance. `send`/`receive` may be
/// called concurrently from different tasks (one sender, one receiver) but
/// `receive` is not itself required to support concurrent callers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message. Implementations frame it appropriately for the
    /// underlying medium (one WebSocket binary frame, one length-prefixed
    /// UDP datagram, one WebRTC data-channel message).
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] if called after `close()`;
    /// [`TransportError::TooLarge`] if `message` exceeds the transport's
    /// maximum; [`TransportError::Fatal`] on an unrecoverable I/O failure
    /// (the transport is closed as a side effect).
    async fn send(&self, message: &[u8]) -> Result<(), TransportError>;

    /// Receive one message, waiting up to the transport's internal
    /// understanding of "a while" — callers apply their own timeout via
    /// `tokio::time::timeout` around this call.
    ///
    /// # Errors
    ///
    /// [`TransportError::Closed`] if called after `close()` — never
    /// [`TransportError::Timeout`] once closed, so callers can distinguish
    /// "nothing arrived" from "never will again". [`TransportError::Fatal`]
    /// on an unrecoverable I/O failure.
    async fn receive(&self) -> Result<Vec<u8>, TransportError>;

    /// Close the transport. Idempotent: calling more than once is a no-op
    /// and never returns an error.
    async fn close(&self);

    /// Which kind of transport this is.
    fn kind(&self) -> TransportKind;

    /// Traffic counters for this transport instance.
    fn stats(&self) -> Arc<TransportStats>;

    /// A Tailscale endpoint discovered for the remote peer during this
    /// transport's own connect sequence, if any (spec §4.2's WebRTC
    /// post-connect enrichment). Every transport but
    /// [`crate::transport::webrtc::WebRtcTransport`] has nothing to report.
    fn discovered_tailscale_endpoint(&self) -> Option<crate::credentials::Endpoint> {
        None
    }
}
