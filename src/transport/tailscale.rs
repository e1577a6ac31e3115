//! Tailscale-routed UDP transport.
//!
//! Joining the tailnet itself is a platform concern owned by the host app
//! and out of scope here; this module only speaks the client side of a
//! length-prefixed UDP handshake over an already-connected socket, with
//! `log::info!`/`log::debug!` narration of each phase.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::{Transport, TransportKind, TransportStats};
use crate::config::Config;
use crate::constants::{TAILSCALE_HANDSHAKE_MAGIC, TAILSCALE_MAX_DATAGRAM_PAYLOAD};
use crate::errors::TransportError;

const HANDSHAKE_PACKET_LEN: usize = 8;

/// Tailscale-UDP transport: a connected UDP socket with a magic handshake
/// and a second device-identity/auth-token phase.
pub struct TailscaleTransport {
    socket: UdpSocket,
    stats: Arc<TransportStats>,
    closed: AtomicBool,
}

impl std::fmt::Debug for TailscaleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TailscaleTransport").finish_non_exhaustive()
    }
}

impl TailscaleTransport {
    /// Connect to the daemon's Tailscale endpoint, performing the magic
    /// handshake followed by device-identity/token authentication.
    ///
    /// # Errors
    ///
    /// [`TransportError::Fatal`] on socket errors; [`TransportError::Timeout`]
    /// if the magic handshake exhausts its retry budget;
    /// [`TransportError::AuthFailed`] if the auth-token phase is rejected or
    /// times out.
    pub async fn connect(
        daemon_addr: SocketAddr,
        device_id: &str,
        auth_token: &[u8; 32],
        config: &Config,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| TransportError::Fatal(format!("failed to bind UDP socket: {e}")))?;
        socket
            .connect(daemon_addr)
            .await
            .map_err(|e| TransportError::Fatal(format!("failed to connect UDP socket: {e}")))?;

        Self::magic_handshake(&socket, config).await?;
        Self::auth_handshake(&socket, device_id, auth_token, config).await?;

        log::info!("Tailscale transport connected to {daemon_addr}");

        Ok(Self {
            socket,
            stats: Arc::new(TransportStats::default()),
            closed: AtomicBool::new(false),
        })
    }

    async fn magic_handshake(socket: &UdpSocket, config: &Config) -> Result<(), TransportError> {
        let mut packet = [0u8; HANDSHAKE_PACKET_LEN];
        packet[..4].copy_from_slice(&TAILSCALE_HANDSHAKE_MAGIC.to_be_bytes());

        let deadline = Instant::now() + config.tailscale_handshake_total_timeout;
        let mut attempts_sent = 0u32;

        while attempts_sent < config.tailscale_handshake_max_attempts {
            if Instant::now() >= deadline {
                break;
            }
            attempts_sent += 1;
            socket
                .send(&packet)
                .await
                .map_err(|e| TransportError::Fatal(format!("handshake send failed: {e}")))?;
            log::debug!("Tailscale handshake attempt {attempts_sent} sent");

            let mut buf = [0u8; HANDSHAKE_PACKET_LEN];
            let remaining = deadline.saturating_duration_since(Instant::now());
            let per_attempt = config.tailscale_handshake_attempt_timeout.min(remaining);
            match timeout(per_attempt, socket.recv(&mut buf)).await {
                Ok(Ok(n)) if n == HANDSHAKE_PACKET_LEN && buf == packet => return Ok(()),
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => {
                    return Err(TransportError::Fatal(format!("handshake recv failed: {e}")))
                }
                Err(_) => continue,
            }
        }

        Err(TransportError::Timeout)
    }

    async fn auth_handshake(
        socket: &UdpSocket,
        device_id: &str,
        auth_token: &[u8; 32],
        config: &Config,
    ) -> Result<(), TransportError> {
        let id_bytes = device_id.as_bytes();
        let mut packet = Vec::with_capacity(4 + id_bytes.len() + auth_token.len());
        packet.extend_from_slice(&(id_bytes.len() as u32).to_be_bytes());
        packet.extend_from_slice(id_bytes);
        packet.extend_from_slice(auth_token);

        socket
            .send(&packet)
            .await
            .map_err(|e| TransportError::Fatal(format!("auth send failed: {e}")))?;

        let mut buf = [0u8; 1];
        // Up to 3 stray late magic-handshake retransmissions are tolerated
        // before giving up on the ack.
        for _ in 0..3 {
            match timeout(config.tailscale_auth_timeout, socket.recv(&mut buf)).await {
                Ok(Ok(1)) if buf[0] == 0x01 => return Ok(()),
                Ok(Ok(n)) if n == HANDSHAKE_PACKET_LEN => continue,
                Ok(Ok(_)) => return Err(TransportError::AuthFailed("unexpected auth reply".into())),
                Ok(Err(e)) => {
                    return Err(TransportError::AuthFailed(format!("auth recv failed: {e}")))
                }
                Err(_) => return Err(TransportError::AuthFailed("auth response timed out".into())),
            }
        }

        Err(TransportError::AuthFailed("auth response timed out".into()))
    }
}

#[async_trait]
impl Transport for TailscaleTransport {
    async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if message.len() > TAILSCALE_MAX_DATAGRAM_PAYLOAD {
            return Err(TransportError::TooLarge {
                size: message.len(),
                limit: TAILSCALE_MAX_DATAGRAM_PAYLOAD,
            });
        }
        let mut datagram = Vec::with_capacity(4 + message.len());
        datagram.extend_from_slice(&(message.len() as u32).to_be_bytes());
        datagram.extend_from_slice(message);

        self.socket
            .send(&datagram)
            .await
            .map_err(|e| TransportError::Fatal(format!("UDP send failed: {e}")))?;
        self.stats.record_send(message.len());
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut buf = vec![0u8; TAILSCALE_MAX_DATAGRAM_PAYLOAD + 4];
        let mut skipped_magic = 0;
        loop {
            let n = self
                .socket
                .recv(&mut buf)
                .await
                .map_err(|e| TransportError::Fatal(format!("UDP recv failed: {e}")))?;

            if n == HANDSHAKE_PACKET_LEN && skipped_magic < 3 {
                let magic = u32::from_be_bytes(buf[..4].try_into().expect("slice is 4 bytes"));
                if magic == TAILSCALE_HANDSHAKE_MAGIC {
                    skipped_magic += 1;
                    continue;
                }
            }

            if n < 4 {
                continue;
            }
            let len = u32::from_be_bytes(buf[..4].try_into().expect("slice is 4 bytes")) as usize;
            if len > n - 4 {
                continue;
            }
            let payload = buf[4..4 + len].to_vec();
            self.stats.record_receive(payload.len());
            return Ok(payload);
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Tailscale
    }

    fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }
}
