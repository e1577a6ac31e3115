//! Data model and external-collaborator interfaces for paired-device
//! credentials.
//!
//! Persistence is explicitly out of scope (see `spec.md` §1): this module
//! only defines the shapes and the trait the core calls into. A host
//! application supplies a concrete [`CredentialRepository`] backed by
//! whatever storage it likes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A cached direct endpoint (host/port pair) discovered on a previous
/// connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or IP address.
    pub host: String,
    /// Port number.
    pub port: u16,
}

/// Per-paired-daemon credentials.
///
/// Equality is intentionally by `device_id` only (see `spec.md` §3),
/// because a [`ConnectionContext`](crate::strategy::ConnectionContext) is
/// built once per attempt and should compare equal across attempts against
/// the same daemon even if cached endpoints were refreshed in between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Stable identifier for the paired daemon.
    pub device_id: String,
    /// 32-byte symmetric secret established at pairing time.
    pub master_secret: [u8; 32],
    /// Cached LAN endpoint, if one was previously reachable.
    pub lan_endpoint: Option<Endpoint>,
    /// Cached Tailscale endpoint, if one was previously reachable.
    pub tailscale_endpoint: Option<Endpoint>,
    /// Cached VPN endpoint, if one was previously reachable.
    pub vpn_endpoint: Option<Endpoint>,
    /// Signalling topic derived from `master_secret`, used to subscribe on
    /// the out-of-band signalling channel.
    pub signalling_topic: String,
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        self.device_id == other.device_id
    }
}
impl Eq for Credentials {}

impl Credentials {
    /// Derive the signalling topic for a `master_secret`.
    ///
    /// Exposed so a pairing flow outside this crate's scope can construct a
    /// well-formed [`Credentials`] value; the core never calls this itself.
    #[must_use]
    pub fn derive_signalling_topic(master_secret: &[u8; 32]) -> String {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(master_secret);
        digest[..16]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>()
    }
}

/// Capability exchange record (spec §3 `ConnectionCapabilities`).
///
/// Produced by both peers during Phase 0 of the orchestrator; the local
/// copy never mutates credentials, but the daemon's copy (received over the
/// signalling channel) may reveal a Tailscale endpoint worth caching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionCapabilities {
    /// The peer's Tailscale endpoint, if it has one.
    pub tailscale_endpoint: Option<Endpoint>,
    /// Whether the peer supports WebRTC data channels.
    pub webrtc_supported: bool,
    /// Whether the peer supports TURN relay fallback.
    pub relay_supported: bool,
    /// Protocol version the peer speaks.
    pub protocol_version: u32,
}

/// External collaborator: the credential store.
///
/// The core only ever reads credentials and, on a successful path that
/// reveals a new Tailscale endpoint, calls [`CredentialRepository::update_tailscale_info`].
/// No other mutation is ever initiated from within this crate.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Returns the currently selected device's credentials, or `None` if no
    /// device is paired/selected.
    async fn get_selected_device(&self) -> Option<Credentials>;

    /// Fire-and-forget update of the cached Tailscale endpoint for a
    /// device, called after WebRTC post-connect enrichment (spec §4.4
    /// Phase 3) discovers one.
    async fn update_tailscale_info(&self, device_id: &str, host: &str, port: u16);
}

/// External collaborator: a lease guaranteeing socket-binding permission
/// for the duration between acquisition and `close()`.
///
/// Used by the LAN-direct transport to bind its TCP socket to a non-VPN
/// network interface when one is available. A no-op implementation is
/// provided for platforms or tests where interface-binding is irrelevant.
#[async_trait]
pub trait WifiNetworkLease: Send + Sync {
    /// The local interface name to bind to, if the platform exposes one.
    fn bind_interface(&self) -> Option<String>;

    /// Release the lease. Idempotent.
    async fn close(&self);
}

/// A [`WifiNetworkLease`] that grants no special interface binding.
///
/// Used as the default on platforms that don't need VPN-bypass binding, and
/// in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpWifiLease;

#[async_trait]
impl WifiNetworkLease for NoOpWifiLease {
    fn bind_interface(&self) -> Option<String> {
        None
    }

    async fn close(&self) {}
}
