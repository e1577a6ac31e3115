//! Connection lifecycle manager: owns a live [`Transport`] + [`Codec`] pair,
//! runs the listener and heartbeat tasks, and exposes the outbound command
//! API and inbound event streams the application consumes.
//!
//! A long-lived listener task owns the transport, with connection state
//! tracked in a shared flag and per-frame errors swallowed-and-logged at
//! the routing boundary rather than propagated. Three typed event streams
//! (`sessionEvents`, `terminalEvents`, `initialState`) plus an error stream
//! the reconnection controller observes are published from that one
//! routing point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::codec::{AuthKey, Codec};
use crate::config::Config;
use crate::constants::AUTH_KEY_SIZE;
use crate::envelope::{
    decode_inbound, encode_outbound, Inbound, Outbound, SessionCommand, SessionEvent,
    StateSnapshot, TerminalCommand, TerminalEvent,
};
use crate::errors::{CodecError, ConnectionError, ManagerError, TransportError};
use crate::transport::Transport;

/// A replayed-last-value stream: a newly-created subscriber can read the
/// most recently published item (if any) before polling `receiver` for
/// subsequent ones. This is how `terminalEvents` and `initialState`'s
/// "replay-1" requirement is expressed without hand-rolling a custom
/// `Stream` impl on top of `broadcast::Receiver`.
pub struct ReplayOne<T> {
    /// The most recently published item, if any existed at subscribe time.
    pub last: Option<T>,
    /// Receiver for items published after subscription.
    pub receiver: broadcast::Receiver<T>,
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReplayOne<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayOne").field("last", &self.last).finish_non_exhaustive()
    }
}

struct TaskHandles {
    listener: JoinHandle<()>,
    heartbeat: JoinHandle<()>,
}

impl TaskHandles {
    fn abort(&self) {
        self.listener.abort();
        self.heartbeat.abort();
    }
}

/// Shared state the listener/heartbeat tasks and the public API both touch.
/// Held behind an `Arc` so the spawned tasks can outlive any single method
/// call on [`ConnectionManager`].
struct Inner {
    config: Config,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    codec: Mutex<Option<Codec>>,
    tasks: Mutex<Option<TaskHandles>>,
    is_connected: AtomicBool,
    is_healthy: AtomicBool,
    last_activity: Mutex<Instant>,
    session_events_tx: broadcast::Sender<SessionEvent>,
    terminal_events_tx: broadcast::Sender<TerminalEvent>,
    last_terminal_event: StdMutex<Option<TerminalEvent>>,
    initial_state_tx: broadcast::Sender<StateSnapshot>,
    last_initial_state: StdMutex<Option<StateSnapshot>>,
    errors_tx: broadcast::Sender<ConnectionError>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inner")
            .field("is_connected", &self.is_connected.load(Ordering::Relaxed))
            .field("is_healthy", &self.is_healthy.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Owns a [`Transport`] + [`Codec`] pair and drives the listener/heartbeat
/// tasks for it. One instance per logical connection; construct a new one
/// (or reuse the same one, `connect` tears down the old transport first) on
/// each reconnect attempt.
#[derive(Debug)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
    connect_lock: Mutex<()>,
}

impl ConnectionManager {
    /// Construct a manager with no live transport. `config` supplies every
    /// timeout named in the concurrency model.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (session_events_tx, _) = broadcast::channel(64);
        let (terminal_events_tx, _) = broadcast::channel(128);
        let (initial_state_tx, _) = broadcast::channel(1);
        let (errors_tx, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(Inner {
                config,
                transport: Mutex::new(None),
                codec: Mutex::new(None),
                tasks: Mutex::new(None),
                is_connected: AtomicBool::new(false),
                is_healthy: AtomicBool::new(false),
                last_activity: Mutex::new(Instant::now()),
                session_events_tx,
                terminal_events_tx,
                last_terminal_event: StdMutex::new(None),
                initial_state_tx,
                last_initial_state: StdMutex::new(None),
                errors_tx,
            }),
            connect_lock: Mutex::new(()),
        }
    }

    /// Whether a transport is currently installed and believed live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected.load(Ordering::Acquire)
    }

    /// Whether the connection has produced traffic within the configured
    /// idle threshold. Independent of `is_connected`: an unhealthy
    /// connection is not automatically torn down, only flagged.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.inner.is_healthy.load(Ordering::Acquire)
    }

    /// Subscribe to session-lifecycle events. No replay: a subscriber only
    /// sees events published after it subscribes.
    #[must_use]
    pub fn subscribe_session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.session_events_tx.subscribe()
    }

    /// Subscribe to terminal I/O events, replaying the most recent one (if
    /// any) before the live stream.
    #[must_use]
    pub fn subscribe_terminal_events(&self) -> ReplayOne<TerminalEvent> {
        let receiver = self.inner.terminal_events_tx.subscribe();
        let last = self.inner.last_terminal_event.lock().unwrap().clone();
        ReplayOne { last, receiver }
    }

    /// Subscribe to full-state snapshots, replaying the most recent one (if
    /// any) before the live stream.
    #[must_use]
    pub fn subscribe_initial_state(&self) -> ReplayOne<StateSnapshot> {
        let receiver = self.inner.initial_state_tx.subscribe();
        let last = self.inner.last_initial_state.lock().unwrap().clone();
        ReplayOne { last, receiver }
    }

    /// Subscribe to connection-health errors. Consumed by
    /// [`crate::reconnect::ReconnectionController`] to trigger a reconnect
    /// attempt on an unsolicited disconnect.
    #[must_use]
    pub fn subscribe_errors(&self) -> broadcast::Receiver<ConnectionError> {
        self.inner.errors_tx.subscribe()
    }

    /// Take ownership of `transport`, install a fresh [`Codec`] derived from
    /// `key`, send the `ConnectionReady` handshake frame, and spawn the
    /// listener/heartbeat tasks.
    ///
    /// If a transport is already live it is closed first. Serialised against
    /// concurrent `connect`/`disconnect` calls on this manager.
    ///
    /// # Errors
    ///
    /// [`ManagerError::InvalidKeyLength`] if `key` is not exactly 32 bytes;
    /// [`ManagerError::HandshakeFailed`] if the `ConnectionReady` frame can't
    /// be sent within [`Config::connection_ready_send_timeout`] or the
    /// transport rejects the send.
    pub async fn connect(&self, transport: Arc<dyn Transport>, key: &[u8]) -> Result<(), ManagerError> {
        let key_array: [u8; AUTH_KEY_SIZE] = key
            .try_into()
            .map_err(|_| ManagerError::InvalidKeyLength(AUTH_KEY_SIZE))?;

        let _guard = self.connect_lock.lock().await;

        if let Some(previous) = self.inner.transport.lock().await.take() {
            log::debug!("closing previous transport before installing a new one");
            previous.close().await;
        }
        if let Some(handles) = self.inner.tasks.lock().await.take() {
            handles.abort();
        }

        let codec = Codec::new(AuthKey::from_bytes(key_array));
        *self.inner.codec.lock().await = Some(codec);

        if let Err(e) = self.send_handshake(&transport).await {
            log::warn!("connection handshake failed: {e}");
            self.teardown(&transport).await;
            return Err(e);
        }

        self.inner.is_connected.store(true, Ordering::Release);
        self.inner.is_healthy.store(true, Ordering::Release);
        *self.inner.last_activity.lock().await = Instant::now();
        *self.inner.transport.lock().await = Some(Arc::clone(&transport));

        let listener = tokio::spawn(Self::run_listener(Arc::clone(&self.inner), Arc::clone(&transport)));
        let heartbeat = tokio::spawn(Self::run_heartbeat(Arc::clone(&self.inner), Arc::clone(&transport)));
        *self.inner.tasks.lock().await = Some(TaskHandles { listener, heartbeat });

        Ok(())
    }

    /// Encode and send `ConnectionReady` as the first frame on `transport`,
    /// bounded by `connection_ready_send_timeout`.
    async fn send_handshake(&self, transport: &Arc<dyn Transport>) -> Result<(), ManagerError> {
        let plaintext = encode_outbound(&Outbound::ConnectionReady).map_err(map_codec_error)?;
        let ciphertext = {
            let guard = self.inner.codec.lock().await;
            let codec = guard.as_ref().expect("codec installed just above");
            codec.encode(&plaintext).map_err(map_codec_error)?
        };

        timeout(
            self.inner.config.connection_ready_send_timeout,
            transport.send(&ciphertext),
        )
        .await
        .map_err(|_| ManagerError::HandshakeFailed("timed out sending ConnectionReady".into()))?
        .map_err(|e| ManagerError::HandshakeFailed(e.to_string()))
    }

    /// Tear down a connection attempt that failed its handshake, or close an
    /// active one on disconnect. Idempotent.
    async fn teardown(&self, transport: &Arc<dyn Transport>) {
        transport.close().await;
        self.inner.is_connected.store(false, Ordering::Release);
        self.inner.is_healthy.store(false, Ordering::Release);
        if let Some(mut codec) = self.inner.codec.lock().await.take() {
            codec.close();
        }
    }

    /// Close the active connection, if any. Idempotent.
    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        if let Some(handles) = self.inner.tasks.lock().await.take() {
            handles.abort();
        }
        if let Some(transport) = self.inner.transport.lock().await.take() {
            self.teardown(&transport).await;
        } else {
            self.inner.is_connected.store(false, Ordering::Release);
            self.inner.is_healthy.store(false, Ordering::Release);
        }
    }

    /// Send a session-management command.
    ///
    /// # Errors
    ///
    /// [`ManagerError::NotConnected`] if no transport is installed;
    /// [`ManagerError::TooLarge`] if the encoded frame exceeds the maximum
    /// message size.
    pub async fn send_session_command(&self, command: SessionCommand) -> Result<(), ManagerError> {
        self.send_outbound(Outbound::SessionCommand(command)).await
    }

    /// Send raw terminal input bound for a session.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::send_session_command`].
    pub async fn send_terminal_command(&self, command: TerminalCommand) -> Result<(), ManagerError> {
        self.send_outbound(Outbound::TerminalCommand(command)).await
    }

    /// Send a heartbeat probe. Exposed publicly in addition to the
    /// automatic heartbeat task so a caller can force an out-of-band probe.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::send_session_command`].
    pub async fn send_ping(&self) -> Result<(), ManagerError> {
        self.send_outbound(Outbound::Ping).await
    }

    /// Send a clipboard payload to the daemon side.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::send_session_command`].
    pub async fn send_clipboard(&self, bytes: Vec<u8>) -> Result<(), ManagerError> {
        self.send_outbound(Outbound::Clipboard(bytes)).await
    }

    /// Send a pre-built [`Outbound`] frame. The lower-level primitive
    /// backing the typed `send_*` helpers above.
    ///
    /// # Errors
    ///
    /// See [`ConnectionManager::send_session_command`].
    pub async fn send(&self, message: Outbound) -> Result<(), ManagerError> {
        self.send_outbound(message).await
    }

    async fn send_outbound(&self, message: Outbound) -> Result<(), ManagerError> {
        if !self.is_connected() {
            return Err(ManagerError::NotConnected);
        }
        let plaintext = encode_outbound(&message).map_err(map_codec_error)?;
        let ciphertext = {
            let guard = self.inner.codec.lock().await;
            let codec = guard.as_ref().ok_or(ManagerError::NotConnected)?;
            codec.encode(&plaintext).map_err(map_codec_error)?
        };
        let transport = {
            let guard = self.inner.transport.lock().await;
            guard.as_ref().cloned().ok_or(ManagerError::NotConnected)?
        };
        transport.send(&ciphertext).await?;
        Ok(())
    }

    async fn run_listener(inner: Arc<Inner>, transport: Arc<dyn Transport>) {
        loop {
            match timeout(inner.config.listener_receive_timeout, transport.receive()).await {
                Err(_elapsed) => {
                    let idle_for = inner.last_activity.lock().await.elapsed();
                    if idle_for > inner.config.health_idle_threshold {
                        inner.is_healthy.store(false, Ordering::Release);
                    }
                }
                Ok(Err(TransportError::Timeout)) => {}
                Ok(Err(TransportError::Closed)) => {
                    log::info!("transport closed; listener shutting down");
                    break;
                }
                Ok(Err(e)) => {
                    log::warn!("transport receive failed, tearing down connection: {e}");
                    let _ = inner.errors_tx.send(ConnectionError::Disconnected(e.to_string()));
                    break;
                }
                Ok(Ok(ciphertext)) => {
                    *inner.last_activity.lock().await = Instant::now();
                    inner.is_healthy.store(true, Ordering::Release);
                    Self::handle_frame(&inner, &ciphertext).await;
                }
            }
        }
        inner.is_connected.store(false, Ordering::Release);
        inner.is_healthy.store(false, Ordering::Release);
    }

    async fn handle_frame(inner: &Arc<Inner>, ciphertext: &[u8]) {
        let plaintext = {
            let guard = inner.codec.lock().await;
            let Some(codec) = guard.as_ref() else {
                return;
            };
            match codec.decode(ciphertext) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("dropping undecryptable frame: {e}");
                    return;
                }
            }
        };
        let message = match decode_inbound(&plaintext) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("dropping malformed frame: {e}");
                return;
            }
        };
        Self::route_message(inner, message);
    }

    fn route_message(inner: &Arc<Inner>, message: Inbound) {
        match message {
            Inbound::ConnectionReady => {
                log::debug!("received a ConnectionReady frame from the peer");
            }
            Inbound::SessionEvent(Some(event)) => {
                let _ = inner.session_events_tx.send(event);
            }
            Inbound::SessionEvent(None) => {}
            Inbound::TerminalEvent(Some(event)) => {
                *inner.last_terminal_event.lock().unwrap() = Some(event.clone());
                let _ = inner.terminal_events_tx.send(event);
            }
            Inbound::TerminalEvent(None) => {}
            Inbound::InitialState(snapshot) => {
                let snapshot = snapshot.unwrap_or_default();
                *inner.last_initial_state.lock().unwrap() = Some(snapshot.clone());
                let _ = inner.initial_state_tx.send(snapshot);
            }
            Inbound::Clipboard(_) => {
                log::debug!("dropping unhandled clipboard frame");
            }
            Inbound::Pong => {}
        }
    }

    async fn run_heartbeat(inner: Arc<Inner>, transport: Arc<dyn Transport>) {
        let mut ticker = tokio::time::interval(inner.config.heartbeat_poll_interval);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            if !inner.is_connected.load(Ordering::Acquire) {
                break;
            }

            let idle_for = inner.last_activity.lock().await.elapsed();
            inner
                .is_healthy
                .store(idle_for <= inner.config.health_idle_threshold, Ordering::Release);

            let plaintext = match encode_outbound(&Outbound::Ping) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("failed to encode heartbeat ping: {e}");
                    continue;
                }
            };
            let ciphertext = {
                let guard = inner.codec.lock().await;
                match guard.as_ref().map(|c| c.encode(&plaintext)) {
                    Some(Ok(c)) => c,
                    Some(Err(e)) => {
                        log::warn!("failed to encrypt heartbeat ping: {e}");
                        continue;
                    }
                    None => break,
                }
            };
            if let Err(e) = transport.send(&ciphertext).await {
                log::warn!("heartbeat ping send failed: {e}");
            }
        }
    }
}

fn map_codec_error(error: CodecError) -> ManagerError {
    match error {
        CodecError::TooLarge { size, limit } => ManagerError::TooLarge { size, limit },
        CodecError::Closed => ManagerError::NotConnected,
        CodecError::AuthenticationFailed | CodecError::Malformed => {
            ManagerError::HandshakeFailed(error.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    use crate::transport::{TransportKind, TransportStats};

    struct FakeTransport {
        inbound: AsyncMutex<Vec<Vec<u8>>>,
        sent: AsyncMutex<Vec<Vec<u8>>>,
        closed: AtomicBool,
        stats: Arc<TransportStats>,
    }

    impl FakeTransport {
        fn new(inbound: Vec<Vec<u8>>) -> Arc<Self> {
            Arc::new(Self {
                inbound: AsyncMutex::new(inbound),
                sent: AsyncMutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                stats: Arc::new(TransportStats::default()),
            })
        }
    }

    #[async_trait::async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            self.sent.lock().await.push(message.to_vec());
            Ok(())
        }

        async fn receive(&self) -> Result<Vec<u8>, TransportError> {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            let mut guard = self.inbound.lock().await;
            if guard.is_empty() {
                drop(guard);
                std::future::pending::<Result<Vec<u8>, TransportError>>().await
            } else {
                Ok(guard.remove(0))
            }
        }

        async fn close(&self) {
            self.closed.store(true, Ordering::Release);
        }

        fn kind(&self) -> TransportKind {
            TransportKind::LanDirect
        }

        fn stats(&self) -> Arc<TransportStats> {
            Arc::clone(&self.stats)
        }
    }

    #[tokio::test]
    async fn connect_rejects_short_key() {
        let manager = ConnectionManager::new(Config::default());
        let transport = FakeTransport::new(vec![]);
        let err = manager.connect(transport, &[0u8; 16]).await.unwrap_err();
        assert!(matches!(err, ManagerError::InvalidKeyLength(32)));
    }

    #[tokio::test]
    async fn connect_sends_connection_ready_as_first_frame() {
        let key = [7u8; AUTH_KEY_SIZE];
        let transport = FakeTransport::new(vec![]);

        let manager = ConnectionManager::new(Config::default());
        manager.connect(Arc::clone(&transport), &key).await.unwrap();
        assert!(manager.is_connected());
        assert!(manager.is_healthy());

        let decoder = Codec::new(AuthKey::from_bytes(key));
        let sent = transport.sent.lock().await;
        let plaintext = decoder.decode(&sent[0]).unwrap();
        let msg: Outbound = bincode::deserialize(&plaintext).unwrap();
        assert!(matches!(msg, Outbound::ConnectionReady));
    }

    #[tokio::test]
    async fn connect_fails_when_handshake_send_fails() {
        let key = [8u8; AUTH_KEY_SIZE];
        let transport = FakeTransport::new(vec![]);
        transport.close().await;

        let manager = ConnectionManager::new(Config::default());
        let err = manager.connect(transport, &key).await.unwrap_err();
        assert!(matches!(err, ManagerError::HandshakeFailed(_)));
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn send_before_connect_fails_not_connected() {
        let manager = ConnectionManager::new(Config::default());
        let err = manager.send_ping().await.unwrap_err();
        assert!(matches!(err, ManagerError::NotConnected));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let manager = ConnectionManager::new(Config::default());
        manager.disconnect().await;
        manager.disconnect().await;
        assert!(!manager.is_connected());
    }

    #[tokio::test]
    async fn unset_session_event_is_not_published() {
        let inner = Arc::new(Inner {
            config: Config::default(),
            transport: Mutex::new(None),
            codec: Mutex::new(None),
            tasks: Mutex::new(None),
            is_connected: AtomicBool::new(true),
            is_healthy: AtomicBool::new(true),
            last_activity: Mutex::new(Instant::now()),
            session_events_tx: broadcast::channel(64).0,
            terminal_events_tx: broadcast::channel(128).0,
            last_terminal_event: StdMutex::new(None),
            initial_state_tx: broadcast::channel(1).0,
            last_initial_state: StdMutex::new(None),
            errors_tx: broadcast::channel(16).0,
        });
        let mut rx = inner.session_events_tx.subscribe();
        ConnectionManager::route_message(&inner, Inbound::SessionEvent(None));
        assert!(rx.try_recv().is_err());
    }
}
