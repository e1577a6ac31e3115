//! Property-style tests for the boundary conditions that aren't already
//! pinned down by a module's own `#[cfg(test)]` block: these exercise the
//! public API across module boundaries rather than a single type in
//! isolation.

mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use linkcore::{
    AuthKey, Codec, Config, ConnectionContext, ConnectionManager, DetectOutcome, Orchestrator,
    Outbound, ReconnectGuards, ReconnectionController, Strategy, StrategyError, TerminalCommand,
    Transport, TransportError,
};

use support::{FakeTransport, NoPeerSignalling, SingleDeviceRepo};

/// Invariant: the first frame this side ever sends on a fresh connection is
/// `ConnectionReady`.
#[tokio::test]
async fn connection_ready_is_first_frame_sent() {
    let key = [3u8; 32];
    let transport = Arc::new(FakeTransport::new(Vec::new()));

    let manager = ConnectionManager::new(Config::default());
    manager.connect(Arc::clone(&transport), &key).await.expect("handshake succeeds");
    assert!(manager.is_connected());

    let decoder = Codec::new(AuthKey::from_bytes(key));
    let sent = transport.sent.lock().await;
    let plaintext = decoder.decode(&sent[0]).unwrap();
    let msg: Outbound = bincode::deserialize(&plaintext).unwrap();
    assert!(matches!(msg, Outbound::ConnectionReady));
}

/// Invariant: an oversize inbound frame is dropped at the codec boundary
/// and leaves `isConnected`/`isHealthy` untouched.
#[tokio::test]
async fn oversize_inbound_frame_does_not_disconnect() {
    let key = [3u8; 32];
    let oversize_blob =
        vec![0u8; linkcore::constants::MAX_MESSAGE_SIZE + linkcore::constants::NONCE_SIZE + 17];

    let transport = Arc::new(FakeTransport::new(vec![oversize_blob]));
    let transport: Arc<dyn Transport> = transport;

    let manager = ConnectionManager::new(Config::default());
    manager.connect(transport, &key).await.expect("handshake succeeds");
    assert!(manager.is_connected());

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(manager.is_connected(), "oversize frame must not flip isConnected");
    assert!(manager.is_healthy(), "oversize frame must not flip isHealthy");
}

/// Invariant: a closed transport's `send`/`receive` return `Closed`, never
/// `Timeout`, and `close()` is idempotent.
#[tokio::test]
async fn closed_transport_returns_closed_not_timeout() {
    let transport = FakeTransport::new(Vec::new());
    transport.close().await;
    transport.close().await;
    transport.close().await;

    let send_err = transport.send(b"hello").await.unwrap_err();
    assert!(matches!(send_err, TransportError::Closed));

    let recv_err = transport.receive().await.unwrap_err();
    assert!(matches!(recv_err, TransportError::Closed));
}

/// Invariant: `encode_outbound` accepts a payload exactly at
/// `MAX_MESSAGE_SIZE` and rejects one byte over.
#[tokio::test]
async fn outbound_size_boundary() {
    let overhead = bincode_overhead_for_terminal_command();

    let at_limit = Outbound::TerminalCommand(TerminalCommand {
        session_id: "s".repeat(1),
        bytes: vec![0u8; linkcore::constants::MAX_MESSAGE_SIZE - overhead],
    });
    assert!(linkcore::envelope::encode_outbound(&at_limit).is_ok());

    let over_limit = Outbound::TerminalCommand(TerminalCommand {
        session_id: "s".repeat(1),
        bytes: vec![0u8; linkcore::constants::MAX_MESSAGE_SIZE - overhead + 1],
    });
    let err = linkcore::envelope::encode_outbound(&over_limit).unwrap_err();
    assert!(matches!(err, linkcore::CodecError::TooLarge { .. }));
}

fn bincode_overhead_for_terminal_command() -> usize {
    let probe = Outbound::TerminalCommand(TerminalCommand {
        session_id: "s".repeat(1),
        bytes: Vec::new(),
    });
    bincode::serialize(&probe).unwrap().len()
}

struct SlowSucceedStrategy {
    delay: Duration,
}

#[async_trait]
impl Strategy for SlowSucceedStrategy {
    fn name(&self) -> &'static str {
        "slow"
    }
    fn priority(&self) -> u32 {
        5
    }
    async fn detect(&self, _ctx: &ConnectionContext) -> DetectOutcome {
        DetectOutcome::Available(None)
    }
    async fn connect(&self, _ctx: &ConnectionContext) -> Result<Arc<dyn Transport>, StrategyError> {
        tokio::time::sleep(self.delay).await;
        Ok(Arc::new(FakeTransport::new(Vec::new())))
    }
}

struct AlwaysAllow;

#[async_trait]
impl ReconnectGuards for AlwaysAllow {
    async fn manual_disconnect_latched(&self) -> bool {
        false
    }
    async fn has_selected_credential(&self) -> bool {
        true
    }
}

/// Invariant: two genuinely concurrent `attemptReconnectIfNeeded()` calls
/// collapse to at most one in-flight attempt.
#[tokio::test]
async fn concurrent_reconnect_attempts_collapse_to_one() {
    let repo = Arc::new(SingleDeviceRepo::new("device-concurrent"));
    let slow: Arc<dyn Strategy> = Arc::new(SlowSucceedStrategy {
        delay: Duration::from_millis(60),
    });
    let orchestrator = Arc::new(Orchestrator::new(vec![slow], repo.clone()));
    let manager = Arc::new(ConnectionManager::new(Config::default()));
    let controller = Arc::new(ReconnectionController::new(
        orchestrator,
        manager,
        repo,
        Arc::new(AlwaysAllow),
    ));

    let c1 = Arc::clone(&controller);
    let c2 = Arc::clone(&controller);
    let h1 = tokio::spawn(async move {
        let (progress, _rx) = linkcore::ProgressSink::channel();
        c1.attempt_reconnect_if_needed(Arc::new(NoPeerSignalling), progress).await
    });
    // Give h1 a chance to acquire the try-lock before h2 races in.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let h2 = tokio::spawn(async move {
        let (progress, _rx) = linkcore::ProgressSink::channel();
        c2.attempt_reconnect_if_needed(Arc::new(NoPeerSignalling), progress).await
    });

    let (r1, r2) = tokio::join!(h1, h2);
    let r1 = r1.unwrap();
    let r2 = r2.unwrap();

    assert!(r1, "the first caller should win the in-flight slot");
    assert!(!r2, "the second caller must observe the lock already held");
    assert!(!controller.is_reconnecting(), "flag must reset once the winner finishes");
}
