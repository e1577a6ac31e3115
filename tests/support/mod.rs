//! Shared in-memory fakes for the integration tests in this directory.
//!
//! These mirror the trait-double shapes already used in the crate's own
//! `#[cfg(test)]` modules, lifted to the public API boundary.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use linkcore::{
    ConnectionCapabilities, ConnectionContext, Credentials, CredentialRepository, DetectOutcome,
    Endpoint, SignallingChannel, SignallingError, SignalledAnswer, Strategy, StrategyError,
    Transport, TransportError, TransportKind, TransportStats,
};
use tokio::sync::Mutex as AsyncMutex;

/// A transport backed by an in-process queue, so a test can feed it frames
/// and inspect what was sent without any real socket.
pub struct FakeTransport {
    pub inbound: AsyncMutex<Vec<Vec<u8>>>,
    pub sent: AsyncMutex<Vec<Vec<u8>>>,
    pub closed: AtomicBool,
    pub stats: Arc<TransportStats>,
}

impl FakeTransport {
    pub fn new(inbound: Vec<Vec<u8>>) -> Self {
        Self {
            inbound: AsyncMutex::new(inbound),
            sent: AsyncMutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            stats: Arc::new(TransportStats::default()),
        }
    }
}

#[async_trait]
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
        let mut queue = self.inbound.lock().await;
        if queue.is_empty() {
            drop(queue);
            std::future::pending::<()>().await;
            unreachable!("pending future never resolves");
        }
        Ok(queue.remove(0))
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

/// A strategy whose `detect`/`connect` outcomes are fixed at construction.
pub struct ScriptedStrategy {
    pub strategy_name: &'static str,
    pub strategy_priority: u32,
    pub detect_outcome: DetectOutcome,
    pub connect_result: AsyncMutex<Option<Result<Arc<dyn Transport>, StrategyError>>>,
    pub connect_attempts: AtomicUsize,
}

impl ScriptedStrategy {
    pub fn available_and_succeeds(name: &'static str, priority: u32, transport: Arc<dyn Transport>) -> Self {
        Self {
            strategy_name: name,
            strategy_priority: priority,
            detect_outcome: DetectOutcome::Available(None),
            connect_result: AsyncMutex::new(Some(Ok(transport))),
            connect_attempts: AtomicUsize::new(0),
        }
    }

    pub fn available_and_fails(name: &'static str, priority: u32, error: StrategyError) -> Self {
        Self {
            strategy_name: name,
            strategy_priority: priority,
            detect_outcome: DetectOutcome::Available(None),
            connect_result: AsyncMutex::new(Some(Err(error))),
            connect_attempts: AtomicUsize::new(0),
        }
    }

    pub fn unavailable(name: &'static str, priority: u32, reason: &str) -> Self {
        Self {
            strategy_name: name,
            strategy_priority: priority,
            detect_outcome: DetectOutcome::Unavailable(reason.to_string()),
            connect_result: AsyncMutex::new(None),
            connect_attempts: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Strategy for ScriptedStrategy {
    fn name(&self) -> &'static str {
        self.strategy_name
    }

    fn priority(&self) -> u32 {
        self.strategy_priority
    }

    async fn detect(&self, _ctx: &ConnectionContext) -> DetectOutcome {
        self.detect_outcome.clone()
    }

    async fn connect(&self, _ctx: &ConnectionContext) -> Result<Arc<dyn Transport>, StrategyError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        self.connect_result
            .lock()
            .await
            .take()
            .unwrap_or(Err(StrategyError::Signalling))
    }
}

/// A signalling channel that never actually reaches a peer; adequate for
/// scenarios where capability exchange/WebRTC signalling isn't exercised.
pub struct NoPeerSignalling;

#[async_trait]
impl SignallingChannel for NoPeerSignalling {
    async fn exchange_capabilities(
        &self,
        _local: &ConnectionCapabilities,
    ) -> Result<Option<ConnectionCapabilities>, SignallingError> {
        Ok(None)
    }

    async fn send_offer(
        &self,
        _offer_sdp: &str,
        _ice_candidates: &[String],
    ) -> Result<Option<SignalledAnswer>, SignallingError> {
        Err(SignallingError("no peer in this test".into()))
    }

    async fn close(&self) {}
}

/// A credential repository with a single fixed, always-selected device.
pub struct SingleDeviceRepo {
    pub credentials: Credentials,
    pub tailscale_updates: AsyncMutex<Vec<(String, String, u16)>>,
}

impl SingleDeviceRepo {
    pub fn new(device_id: &str) -> Self {
        Self {
            credentials: Credentials {
                device_id: device_id.to_string(),
                master_secret: [9u8; 32],
                lan_endpoint: Some(Endpoint {
                    host: "192.168.1.50".into(),
                    port: 8765,
                }),
                tailscale_endpoint: None,
                vpn_endpoint: None,
                signalling_topic: Credentials::derive_signalling_topic(&[9u8; 32]),
            },
            tailscale_updates: AsyncMutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CredentialRepository for SingleDeviceRepo {
    async fn get_selected_device(&self) -> Option<Credentials> {
        Some(self.credentials.clone())
    }

    async fn update_tailscale_info(&self, device_id: &str, host: &str, port: u16) {
        self.tailscale_updates
            .lock()
            .await
            .push((device_id.to_string(), host.to_string(), port));
    }
}

/// A credential repository reporting no selected device.
pub struct NoDeviceRepo;

#[async_trait]
impl CredentialRepository for NoDeviceRepo {
    async fn get_selected_device(&self) -> Option<Credentials> {
        None
    }

    async fn update_tailscale_info(&self, _device_id: &str, _host: &str, _port: u16) {}
}
