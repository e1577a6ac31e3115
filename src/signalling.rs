//! Out-of-band signalling channel used only to bootstrap a WebRTC
//! connection (SDP offer/answer and ICE candidate exchange) and to carry
//! the Phase 0 capability handshake.
//!
//! Concrete signalling transport (push notification relay, HTTP polling,
//! whatever) is explicitly out of scope for this crate; only the trait a
//! host application implements lives here, as a plain async
//! request/response pair.

use async_trait::async_trait;

use crate::credentials::ConnectionCapabilities;

/// A peer's SDP answer together with any ICE candidates gathered
/// out-of-band (trickle-ICE candidates that arrived after the answer
/// itself).
#[derive(Debug, Clone)]
pub struct SignalledAnswer {
    /// The peer's SDP answer string.
    pub sdp: String,
    /// ICE candidate SDP lines gathered by the peer.
    pub ice_candidates: Vec<String>,
}

/// External collaborator: the signalling channel.
///
/// All methods may fail (network error, peer unreachable, timeout); callers
/// treat any `Err` the same as a signalling-phase failure
/// ([`crate::errors::StrategyError::Signalling`]).
#[async_trait]
pub trait SignallingChannel: Send + Sync {
    /// Exchange capability records with the peer. Returns the peer's
    /// capabilities, or `None` if the peer doesn't support capability
    /// exchange (treated as "assume minimal capabilities", not an error).
    async fn exchange_capabilities(
        &self,
        local: &ConnectionCapabilities,
    ) -> Result<Option<ConnectionCapabilities>, SignallingError>;

    /// Send a local SDP offer plus gathered ICE candidates, and wait for
    /// the peer's answer. Returns `Ok(None)` if the peer never answers
    /// within the implementation's own budget (treated as a signalling
    /// failure by the caller, not retried within this attempt).
    async fn send_offer(
        &self,
        offer_sdp: &str,
        ice_candidates: &[String],
    ) -> Result<Option<SignalledAnswer>, SignallingError>;

    /// Release any resources (subscriptions, sockets) held by this channel.
    async fn close(&self);
}

/// Opaque signalling failure. The core never branches on the cause beyond
/// "signalling didn't work this cycle".
#[derive(Debug, thiserror::Error)]
#[error("signalling failed: {0}")]
pub struct SignallingError(pub String);
