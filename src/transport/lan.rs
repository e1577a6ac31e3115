//! LAN-direct WebSocket transport.
//!
//! URL/request building and split reader/writer halves over
//! `tokio-tungstenite`, carrying binary one-frame-per-message traffic, plus
//! an HMAC-SHA256 proof-of-key handshake before any application frame
//! flows (there's no upstream session to authenticate against, so the
//! handshake lives here).
//!
//! # Handshake
//!
//! Immediately after the WebSocket upgrade:
//! 1. Server sends a 32-byte random challenge as a binary frame.
//! 2. Client replies with `HMAC-SHA256(authKey, challenge)` (32 bytes).
//! 3. Server replies `[0x01]` on success or closes the socket on mismatch.
//!
//! The client side implemented here only plays the client role in this
//! exchange; no server implementation is provided (out of scope — the
//! daemon is a distinct codebase).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, client::IntoClientRequest};

use super::{Transport, TransportKind, TransportStats};
use crate::errors::TransportError;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type HmacSha256 = Hmac<Sha256>;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// LAN-direct WebSocket transport: one binary WS frame per application
/// message, HMAC-proven at connect time.
pub struct LanTransport {
    sink: Mutex<futures_util::stream::SplitSink<WsStream, tungstenite::Message>>,
    stream: Mutex<futures_util::stream::SplitStream<WsStream>>,
    stats: Arc<TransportStats>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LanTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanTransport").finish_non_exhaustive()
    }
}

impl LanTransport {
    /// Connect to `ws://host:port/ws/{device_id}`, optionally binding to
    /// `bind_interface` to route around an active VPN, then complete the
    /// HMAC proof-of-key handshake.
    ///
    /// # Errors
    ///
    /// [`TransportError::Fatal`] on connection failure;
    /// [`TransportError::AuthFailed`] if the handshake is rejected or times
    /// out.
    pub async fn connect(
        host: &str,
        port: u16,
        device_id: &str,
        auth_key: &[u8; 32],
        bind_interface: Option<&str>,
    ) -> Result<Self, TransportError> {
        let url = format!("ws://{host}:{port}/ws/{device_id}");
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Fatal(format!("invalid LAN URL: {e}")))?;
        if let Some(iface) = bind_interface {
            request
                .headers_mut()
                .insert("X-Bind-Interface", iface.parse().map_err(|_| {
                    TransportError::Fatal("invalid bind interface header value".into())
                })?);
        }

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| TransportError::Fatal(format!("WebSocket connect failed: {e}")))?;

        let (mut sink, mut stream) = ws_stream.split();

        Self::perform_handshake(&mut sink, &mut stream, auth_key).await?;

        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            stats: Arc::new(TransportStats::default()),
            closed: AtomicBool::new(false),
        })
    }

    async fn perform_handshake(
        sink: &mut futures_util::stream::SplitSink<WsStream, tungstenite::Message>,
        stream: &mut futures_util::stream::SplitStream<WsStream>,
        auth_key: &[u8; 32],
    ) -> Result<(), TransportError> {
        timeout(HANDSHAKE_TIMEOUT, async {
            let challenge = match stream.next().await {
                Some(Ok(tungstenite::Message::Binary(data))) => data,
                Some(Ok(_)) => {
                    return Err(TransportError::AuthFailed("unexpected handshake frame".into()))
                }
                Some(Err(e)) => {
                    return Err(TransportError::AuthFailed(format!("handshake read failed: {e}")))
                }
                None => return Err(TransportError::AuthFailed("connection closed during handshake".into())),
            };

            let mut mac = HmacSha256::new_from_slice(auth_key)
                .expect("HMAC accepts any key length, including 32 bytes");
            mac.update(&challenge);
            let proof = mac.finalize().into_bytes().to_vec();

            sink.send(tungstenite::Message::Binary(proof.into()))
                .await
                .map_err(|e| TransportError::Fatal(format!("handshake send failed: {e}")))?;

            match stream.next().await {
                Some(Ok(tungstenite::Message::Binary(ack))) if ack.as_ref() == [0x01] => Ok(()),
                Some(Ok(_)) => Err(TransportError::AuthFailed("handshake rejected".into())),
                Some(Err(e)) => Err(TransportError::AuthFailed(format!("handshake ack read failed: {e}"))),
                None => Err(TransportError::AuthFailed("connection closed awaiting handshake ack".into())),
            }
        })
        .await
        .map_err(|_| TransportError::AuthFailed("handshake timed out".into()))?
    }
}

#[async_trait]
impl Transport for LanTransport {
    async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        if message.len() > crate::constants::MAX_MESSAGE_SIZE {
            return Err(TransportError::TooLarge {
                size: message.len(),
                limit: crate::constants::MAX_MESSAGE_SIZE,
            });
        }
        let mut sink = self.sink.lock().await;
        sink.send(tungstenite::Message::Binary(message.to_vec().into()))
            .await
            .map_err(|e| TransportError::Fatal(format!("WebSocket send failed: {e}")))?;
        self.stats.record_send(message.len());
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(tungstenite::Message::Binary(data))) => {
                    self.stats.record_receive(data.len());
                    return Ok(data.to_vec());
                }
                Some(Ok(tungstenite::Message::Ping(_) | tungstenite::Message::Pong(_))) => continue,
                Some(Ok(tungstenite::Message::Close(_))) | None => {
                    self.closed.store(true, Ordering::Release);
                    return Err(TransportError::Fatal("WebSocket closed by peer".into()));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.closed.store(true, Ordering::Release);
                    return Err(TransportError::Fatal(format!("WebSocket read error: {e}")));
                }
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.sink.lock().await;
        let _ = sink.send(tungstenite::Message::Close(None)).await;
        let _ = sink.close().await;
    }

    fn kind(&self) -> TransportKind {
        TransportKind::LanDirect
    }

    fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }
}
