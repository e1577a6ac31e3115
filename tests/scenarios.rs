//! End-to-end scenarios driving `Orchestrator` + `ConnectionManager` +
//! `ReconnectionController` together through in-memory fakes, one per
//! documented scenario.

mod support;

use std::sync::Arc;

use linkcore::{
    AuthKey, Codec, Config, ConnectionManager, Inbound, OrchestratorError, Orchestrator,
    ReconnectGuards, ReconnectionController, SessionEvent, Strategy, StrategyError,
};

use support::{FakeTransport, NoDeviceRepo, NoPeerSignalling, ScriptedStrategy, SingleDeviceRepo};

fn session_event_frame(key: &[u8; 32], session_id: &str) -> Vec<u8> {
    let codec = Codec::new(AuthKey::from_bytes(*key));
    let msg = Inbound::SessionEvent(Some(SessionEvent {
        session_id: session_id.to_string(),
        kind: "attached".into(),
        data: serde_json::Value::Null,
    }));
    let plaintext = bincode::serialize(&msg).unwrap();
    codec.encode(&plaintext).unwrap()
}

struct AlwaysAllowReconnect;

#[async_trait::async_trait]
impl ReconnectGuards for AlwaysAllowReconnect {
    async fn manual_disconnect_latched(&self) -> bool {
        false
    }
    async fn has_selected_credential(&self) -> bool {
        true
    }
}

/// S1: LAN-direct succeeds on the first strategy tried; session events flow
/// through to subscribers afterward.
#[tokio::test]
async fn s1_lan_happy_path() {
    let repo = Arc::new(SingleDeviceRepo::new("device-1"));
    let key = AuthKey::derive(&repo.credentials.master_secret, &repo.credentials.device_id).to_array();

    let transport = Arc::new(FakeTransport::new(vec![session_event_frame(&key, "sess-1")]));
    let lan: Arc<dyn Strategy> = Arc::new(ScriptedStrategy::available_and_succeeds(
        "lan-direct",
        5,
        transport,
    ));

    let orchestrator = Arc::new(Orchestrator::new(vec![lan], repo.clone()));
    let (progress, _rx) = linkcore::ProgressSink::channel();
    let transport = orchestrator
        .connect(Arc::new(NoPeerSignalling), progress)
        .await
        .expect("lan strategy should succeed");

    let manager = ConnectionManager::new(Config::default());
    manager.connect(transport, &key).await.expect("handshake should succeed");
    assert!(manager.is_connected());

    let mut events = manager.subscribe_session_events();
    let event = events.recv().await.expect("session event should be delivered");
    assert_eq!(event.session_id, "sess-1");
}

/// S2: LAN-direct is unavailable, Tailscale is tried next and succeeds.
#[tokio::test]
async fn s2_tailscale_fallback() {
    let repo = Arc::new(SingleDeviceRepo::new("device-2"));
    let key = AuthKey::derive(&repo.credentials.master_secret, &repo.credentials.device_id).to_array();

    let lan: Arc<dyn Strategy> = Arc::new(ScriptedStrategy::unavailable("lan-direct", 5, "no lan endpoint cached"));
    let transport = Arc::new(FakeTransport::new(Vec::new()));
    let tailscale: Arc<dyn Strategy> = Arc::new(ScriptedStrategy::available_and_succeeds(
        "tailscale",
        10,
        transport,
    ));

    let orchestrator = Arc::new(Orchestrator::new(vec![lan, tailscale], repo.clone()));
    let (progress, _rx) = linkcore::ProgressSink::channel();
    let transport = orchestrator
        .connect(Arc::new(NoPeerSignalling), progress)
        .await
        .expect("tailscale strategy should succeed after lan is skipped");

    let manager = ConnectionManager::new(Config::default());
    manager.connect(transport, &key).await.expect("handshake should succeed");
    assert!(manager.is_connected());
}

/// S3: LAN and Tailscale both fail, WebRTC (the last-resort strategy)
/// succeeds.
#[tokio::test]
async fn s3_webrtc_last_resort() {
    let repo = Arc::new(SingleDeviceRepo::new("device-3"));
    let key = AuthKey::derive(&repo.credentials.master_secret, &repo.credentials.device_id).to_array();

    let lan: Arc<dyn Strategy> = Arc::new(ScriptedStrategy::available_and_fails(
        "lan-direct",
        5,
        StrategyError::Transport(linkcore::TransportError::Fatal("connection refused".into())),
    ));
    let tailscale: Arc<dyn Strategy> = Arc::new(ScriptedStrategy::available_and_fails(
        "tailscale",
        10,
        StrategyError::Transport(linkcore::TransportError::Fatal("handshake timeout".into())),
    ));
    let transport = Arc::new(FakeTransport::new(Vec::new()));
    let webrtc: Arc<dyn Strategy> = Arc::new(ScriptedStrategy::available_and_succeeds(
        "webrtc",
        20,
        transport,
    ));

    let orchestrator = Arc::new(Orchestrator::new(vec![lan, tailscale, webrtc], repo.clone()));
    let (progress, _rx) = linkcore::ProgressSink::channel();
    let transport = orchestrator
        .connect(Arc::new(NoPeerSignalling), progress)
        .await
        .expect("webrtc should win as the last resort");

    let manager = ConnectionManager::new(Config::default());
    manager.connect(transport, &key).await.expect("handshake should succeed");
    assert!(manager.is_connected());
}

/// S4: every strategy fails; the orchestrator reports the exact failure
/// count and no transport is produced.
#[tokio::test]
async fn s4_all_strategies_fail() {
    let repo = Arc::new(SingleDeviceRepo::new("device-4"));

    let lan: Arc<dyn Strategy> = Arc::new(ScriptedStrategy::available_and_fails(
        "lan-direct",
        5,
        StrategyError::Transport(linkcore::TransportError::Fatal("refused".into())),
    ));
    let tailscale: Arc<dyn Strategy> = Arc::new(ScriptedStrategy::available_and_fails(
        "tailscale",
        10,
        StrategyError::AuthFailed("rejected".into()),
    ));

    let orchestrator = Arc::new(Orchestrator::new(vec![lan, tailscale], repo.clone()));
    let (progress, _rx) = linkcore::ProgressSink::channel();
    let err = orchestrator
        .connect(Arc::new(NoPeerSignalling), progress)
        .await
        .expect_err("every strategy failed");

    assert!(matches!(err, OrchestratorError::AllFailed(2)));
}

/// S5: a decryption failure on an inbound frame (bit-flip / wrong key) is
/// dropped silently and does not tear the connection down or publish a
/// bogus event.
#[tokio::test]
async fn s5_decryption_poisoning_is_dropped() {
    let repo = Arc::new(SingleDeviceRepo::new("device-5"));
    let key = AuthKey::derive(&repo.credentials.master_secret, &repo.credentials.device_id).to_array();
    let wrong_key = [0xAAu8; 32];

    let mut poisoned = session_event_frame(&wrong_key, "sess-poison");
    let last = poisoned.len() - 1;
    poisoned[last] ^= 0xFF;

    let transport = Arc::new(FakeTransport::new(vec![poisoned]));
    let transport: Arc<dyn linkcore::Transport> = transport;

    let manager = ConnectionManager::new(Config::default());
    manager.connect(transport, &key).await.expect("handshake uses the real key");
    assert!(manager.is_connected());

    let mut events = manager.subscribe_session_events();
    let outcome = tokio::time::timeout(std::time::Duration::from_millis(200), events.recv()).await;
    assert!(outcome.is_err(), "a poisoned frame must not surface as a session event");
    assert!(manager.is_connected(), "a dropped frame must not disconnect the manager");
}

/// S6: a disconnect fires the error stream, which `watch_disconnects`
/// turns into exactly one reconnection attempt even if the underlying
/// orchestrator has nothing left to offer (reconnect storm contained to a
/// single attempt per disconnect).
#[tokio::test]
async fn s6_reconnect_storm_is_contained() {
    let repo = Arc::new(NoDeviceRepo);

    let failing: Arc<dyn Strategy> = Arc::new(ScriptedStrategy::available_and_fails(
        "lan-direct",
        5,
        StrategyError::Transport(linkcore::TransportError::Fatal("no route".into())),
    ));
    let orchestrator = Arc::new(Orchestrator::new(vec![failing], repo));
    let manager = Arc::new(ConnectionManager::new(Config::default()));

    let controller = Arc::new(ReconnectionController::new(
        Arc::clone(&orchestrator),
        Arc::clone(&manager),
        Arc::new(NoDeviceRepo),
        Arc::new(AlwaysAllowReconnect),
    ));

    assert!(!controller.is_reconnecting());

    let (progress, _rx) = linkcore::ProgressSink::channel();
    let performed = controller
        .attempt_reconnect_if_needed(Arc::new(NoPeerSignalling), progress)
        .await;

    // The orchestrator has no selected device (`NoDeviceRepo`), so the
    // attempt reaches `Orchestrator::connect` and fails there rather than
    // at the reconnect guards; either way exactly one attempt runs and the
    // in-flight flag is released afterward.
    assert!(!performed);
    assert!(!controller.is_reconnecting(), "flag must reset after the attempt finishes");
}
