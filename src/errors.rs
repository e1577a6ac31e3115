//! Typed error taxonomy.
//!
//! One enum per component boundary rather than a single crate-wide error,
//! so callers can match on what actually went wrong (a `Timeout` is
//! recoverable, a `TransportFatal` is not) instead of parsing messages.

use thiserror::Error;

/// Errors from [`crate::codec::Codec::encode`]/[`crate::codec::Codec::decode`].
#[derive(Debug, Error)]
pub enum CodecError {
    /// Plaintext or ciphertext exceeded [`crate::constants::MAX_MESSAGE_SIZE`].
    #[error("frame of {size} bytes exceeds the {limit} byte maximum")]
    TooLarge {
        /// Size of the offending frame.
        size: usize,
        /// The configured limit.
        limit: usize,
    },
    /// AEAD authentication failed on decode; the frame was tampered with,
    /// corrupted, or encrypted under a different key.
    #[error("decryption/authentication failed")]
    AuthenticationFailed,
    /// Ciphertext was shorter than a nonce plus tag, or otherwise malformed.
    #[error("malformed ciphertext")]
    Malformed,
    /// Operation attempted on a codec whose key has already been zeroed.
    #[error("codec is closed")]
    Closed,
}

/// Errors from a [`crate::transport::Transport`] implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// `send`/`receive` called after `close()`. Not retryable on this
    /// transport instance.
    #[error("transport is closed")]
    Closed,
    /// Outbound message exceeded the transport's maximum message size.
    #[error("message of {size} bytes exceeds the {limit} byte maximum")]
    TooLarge {
        /// Size of the offending message.
        size: usize,
        /// The transport's configured limit.
        limit: usize,
    },
    /// `receive` exceeded its timeout with no frame available. Recoverable:
    /// the caller should re-enter `receive`.
    #[error("receive timed out")]
    Timeout,
    /// Handshake-level authentication was rejected by the peer. Not
    /// retryable within the owning strategy this cycle.
    #[error("authentication rejected: {0}")]
    AuthFailed(String),
    /// A terminal I/O failure. The transport is now closed.
    #[error("transport failed: {0}")]
    Fatal(String),
    /// Cooperative cancellation. Must propagate unconverted; never treated
    /// as a [`TransportError::Fatal`].
    #[error("cancelled")]
    Cancelled,
}

/// Errors from a [`crate::strategy::Strategy`] implementation's `connect()`.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The peer rejected the handshake outright.
    #[error("authentication rejected: {0}")]
    AuthFailed(String),
    /// The signalling round-trip returned `None` (network/auth/timeout).
    #[error("signalling failed")]
    Signalling,
    /// The transport failed to establish for a reason other than auth or
    /// signalling.
    #[error("connect failed: {0}")]
    Transport(#[from] TransportError),
    /// Cooperative cancellation, must propagate unconverted.
    #[error("cancelled")]
    Cancelled,
}

impl StrategyError {
    /// Whether the orchestrator should retry this same strategy later in
    /// the cycle. Per spec, `AuthFailed` is never retried; everything else
    /// (signalling hiccup, transient transport failure) may be.
    #[must_use]
    pub fn can_retry(&self) -> bool {
        !matches!(self, Self::AuthFailed(_))
    }
}

/// Errors from [`crate::orchestrator::Orchestrator::connect`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// No strategy reported `Available` during detection.
    #[error("no transport strategy is available")]
    NoneAvailable,
    /// Every available strategy's `connect()` failed.
    #[error("all {0} available strategies failed")]
    AllFailed(usize),
    /// Cooperative cancellation, must propagate unconverted.
    #[error("cancelled")]
    Cancelled,
}

/// Errors surfaced by [`crate::manager::ConnectionManager`] operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// `connect()` was called with a key that is not exactly 32 bytes.
    #[error("auth key must be exactly {0} bytes")]
    InvalidKeyLength(usize),
    /// Outbound payload exceeded the maximum message size.
    #[error("message of {size} bytes exceeds the {limit} byte maximum")]
    TooLarge {
        /// Size of the offending payload.
        size: usize,
        /// The configured limit.
        limit: usize,
    },
    /// An outbound call was made while not connected.
    #[error("not connected")]
    NotConnected,
    /// The initial `ConnectionReady` send failed or timed out.
    #[error("failed to establish connection: {0}")]
    HandshakeFailed(String),
    /// The underlying transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Connection-health/error events published on
/// [`crate::manager::ConnectionManager`]'s error stream, consumed by the
/// [`crate::reconnect::ReconnectionController`].
#[derive(Debug, Error, Clone)]
pub enum ConnectionError {
    /// The listener task observed a fatal transport error and tore the
    /// connection down.
    #[error("disconnected: {0}")]
    Disconnected(String),
}
