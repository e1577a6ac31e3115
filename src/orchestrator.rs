//! Four-phase connection attempt sequencing: discovery, detection,
//! connection, post-connect enrichment.
//!
//! Control flow follows a "try candidates in priority order, collect
//! errors, stop at first success" shape: strategies run in ascending
//! priority order and the first one to produce a live transport wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::codec::AuthKey;
use crate::credentials::{ConnectionCapabilities, CredentialRepository};
use crate::errors::OrchestratorError;
use crate::net_util::local_tailscale_address;
use crate::progress::{FailedAttempt, ProgressEvent, ProgressSink};
use crate::signalling::SignallingChannel;
use crate::strategy::{ConnectionContext, DetectOutcome, Strategy};
use crate::transport::Transport;

/// Protocol version this side speaks, reported during capability exchange.
const PROTOCOL_VERSION: u32 = 1;

/// Orchestrator state machine, per spec §4.4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No attempt in flight, no live transport.
    Idle,
    /// Phase 0/1 running.
    Detecting,
    /// Phase 2 running.
    Connecting,
    /// A transport was established and is held by this orchestrator.
    Connected,
    /// The most recent attempt failed.
    Failed,
    /// The most recent attempt was cancelled.
    Cancelled,
}

/// Drives a single connect attempt across every registered [`Strategy`],
/// in ascending `priority()` order, and owns the resulting
/// [`Transport`] until `disconnect()`.
pub struct Orchestrator {
    strategies: Vec<Arc<dyn Strategy>>,
    credentials: Arc<dyn CredentialRepository>,
    state: Mutex<OrchestratorState>,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    cancelled: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Construct an orchestrator. `strategies` is sorted by ascending
    /// `priority()` internally; callers may pass them in any order.
    #[must_use]
    pub fn new(
        mut strategies: Vec<Arc<dyn Strategy>>,
        credentials: Arc<dyn CredentialRepository>,
    ) -> Self {
        strategies.sort_by_key(|s| s.priority());
        Self {
            strategies,
            credentials,
            state: Mutex::new(OrchestratorState::Idle),
            transport: Mutex::new(None),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Current state.
    pub async fn state(&self) -> OrchestratorState {
        *self.state.lock().await
    }

    /// Run a single connect attempt against the currently selected device's
    /// credentials.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::NoneAvailable`] if no device is selected or no
    /// strategy reports itself available; [`OrchestratorError::AllFailed`]
    /// if every available strategy's `connect()` failed;
    /// [`OrchestratorError::Cancelled`] if `cancel()` was called while the
    /// attempt was in flight.
    pub async fn connect(
        &self,
        signalling: Arc<dyn SignallingChannel>,
        progress: ProgressSink,
    ) -> Result<Arc<dyn Transport>, OrchestratorError> {
        {
            let state = self.state.lock().await;
            if *state == OrchestratorState::Connecting {
                log::debug!("connect() called while already connecting; rejecting");
                return Err(OrchestratorError::NoneAvailable);
            }
            if *state == OrchestratorState::Connected {
                if let Some(existing) = self.transport.lock().await.clone() {
                    log::debug!("connect() called while already connected; returning existing transport");
                    return Ok(existing);
                }
            }
        }

        self.cancelled.store(false, Ordering::SeqCst);
        *self.state.lock().await = OrchestratorState::Detecting;
        progress.report(ProgressEvent::DiscoveryStarted);

        let Some(credentials) = self.credentials.get_selected_device().await else {
            log::warn!("connect() called with no selected device");
            *self.state.lock().await = OrchestratorState::Failed;
            return Err(OrchestratorError::NoneAvailable);
        };

        let auth_key_bytes = AuthKey::derive(&credentials.master_secret, &credentials.device_id).to_array();

        // Phase 0: parallel discovery.
        let (local_tailscale_available, daemon_capabilities) =
            self.phase0_discovery(&credentials, &signalling, &progress).await;

        let ctx = ConnectionContext {
            device_id: credentials.device_id.clone(),
            lan_endpoint: credentials.lan_endpoint.clone(),
            vpn_endpoint: credentials.vpn_endpoint.clone(),
            tailscale_endpoint: daemon_capabilities
                .and_then(|caps| caps.tailscale_endpoint)
                .or_else(|| credentials.tailscale_endpoint.clone()),
            signalling: Arc::clone(&signalling),
            auth_key: auth_key_bytes,
            local_tailscale_available,
            progress: progress.clone(),
        };

        if self.cancelled.load(Ordering::SeqCst) {
            *self.state.lock().await = OrchestratorState::Cancelled;
            progress.report(ProgressEvent::Cancelled);
            return Err(OrchestratorError::Cancelled);
        }

        // Phase 1: detection, strictly in priority order.
        let available = match self.phase1_detect(&ctx, &progress).await {
            Ok(available) => available,
            Err(e) => {
                *self.state.lock().await = OrchestratorState::Failed;
                return Err(e);
            }
        };

        *self.state.lock().await = OrchestratorState::Connecting;

        // Phase 2: connection, first success wins.
        let outcome = self.phase2_connect(&ctx, &available, &progress).await;

        let transport = match outcome {
            Phase2Outcome::Success(transport) => transport,
            Phase2Outcome::Cancelled => {
                *self.state.lock().await = OrchestratorState::Cancelled;
                progress.report(ProgressEvent::Cancelled);
                return Err(OrchestratorError::Cancelled);
            }
            Phase2Outcome::AllFailed(attempts) => {
                let count = attempts.len();
                progress.report(ProgressEvent::AllFailed { attempts });
                *self.state.lock().await = OrchestratorState::Failed;
                return Err(OrchestratorError::AllFailed(count));
            }
        };

        // Phase 3: best-effort post-connect enrichment. Never surfaces an
        // error; a failure here must not undo a successful connect.
        self.phase3_enrich(&credentials.device_id, transport.as_ref()).await;

        *self.transport.lock().await = Some(Arc::clone(&transport));
        *self.state.lock().await = OrchestratorState::Connected;
        Ok(transport)
    }

    async fn phase0_discovery(
        &self,
        credentials: &crate::credentials::Credentials,
        signalling: &Arc<dyn SignallingChannel>,
        progress: &ProgressSink,
    ) -> (bool, Option<ConnectionCapabilities>) {
        progress.report(ProgressEvent::TailscaleDetecting);
        let tailscale_probe = tokio::task::spawn_blocking(detect_local_tailscale);

        let local_tailscale_available = tailscale_probe.await.unwrap_or(false);
        progress.report(ProgressEvent::LocalCapabilities {
            tailscale_available: local_tailscale_available,
        });

        if !local_tailscale_available {
            progress.report(ProgressEvent::CapabilityExchangeSkipped {
                reason: "no local Tailscale interface".into(),
            });
            return (local_tailscale_available, None);
        }

        progress.report(ProgressEvent::ExchangingCapabilities);
        let ours = ConnectionCapabilities {
            tailscale_endpoint: credentials.tailscale_endpoint.clone(),
            webrtc_supported: true,
            relay_supported: true,
            protocol_version: PROTOCOL_VERSION,
        };
        match signalling.exchange_capabilities(&ours).await {
            Ok(Some(theirs)) => {
                progress.report(ProgressEvent::DaemonCapabilities(theirs.clone()));
                (local_tailscale_available, Some(theirs))
            }
            Ok(None) => {
                progress.report(ProgressEvent::CapabilityExchangeSkipped {
                    reason: "peer does not support capability exchange".into(),
                });
                (local_tailscale_available, None)
            }
            Err(e) => {
                log::debug!("capability exchange failed: {e}");
                progress.report(ProgressEvent::CapabilityExchangeFailed {
                    reason: e.to_string(),
                });
                (local_tailscale_available, None)
            }
        }
    }

    async fn phase1_detect(
        &self,
        ctx: &ConnectionContext,
        progress: &ProgressSink,
    ) -> Result<Vec<Arc<dyn Strategy>>, OrchestratorError> {
        let mut available = Vec::new();
        for strategy in &self.strategies {
            progress.report(ProgressEvent::Detecting { name: strategy.name() });
            match strategy.detect(ctx).await {
                DetectOutcome::Available(info) => {
                    progress.report(ProgressEvent::StrategyAvailable {
                        name: strategy.name(),
                        info,
                    });
                    available.push(Arc::clone(strategy));
                }
                DetectOutcome::Unavailable(reason) => {
                    progress.report(ProgressEvent::StrategyUnavailable {
                        name: strategy.name(),
                        reason,
                    });
                }
            }
        }

        if available.is_empty() {
            log::warn!("no connection strategy is available");
            return Err(OrchestratorError::NoneAvailable);
        }
        Ok(available)
    }

    async fn phase2_connect(
        &self,
        ctx: &ConnectionContext,
        available: &[Arc<dyn Strategy>],
        progress: &ProgressSink,
    ) -> Phase2Outcome {
        let mut attempts = Vec::new();

        for (i, strategy) in available.iter().enumerate() {
            if self.cancelled.load(Ordering::SeqCst) {
                return Phase2Outcome::Cancelled;
            }

            let will_try_next = i + 1 < available.len();
            let started = Instant::now();
            match strategy.connect(ctx).await {
                Ok(transport) => {
                    progress.report(ProgressEvent::Connected {
                        name: strategy.name(),
                        transport: transport.kind(),
                        duration_ms: elapsed_ms(started),
                    });
                    return Phase2Outcome::Success(transport);
                }
                Err(crate::errors::StrategyError::Cancelled) => {
                    return Phase2Outcome::Cancelled;
                }
                Err(e) => {
                    let duration_ms = elapsed_ms(started);
                    log::warn!("strategy {} failed: {e}", strategy.name());
                    progress.report(ProgressEvent::StrategyFailed {
                        name: strategy.name(),
                        error: e.to_string(),
                        duration_ms,
                        will_try_next,
                    });
                    attempts.push(FailedAttempt {
                        name: strategy.name(),
                        error: e.to_string(),
                        duration_ms,
                    });
                }
            }
        }

        Phase2Outcome::AllFailed(attempts)
    }

    async fn phase3_enrich(&self, device_id: &str, transport: &dyn Transport) {
        // Best-effort: a missing endpoint (non-WebRTC transport, or a
        // WebRTC transport whose active pair wasn't Tailscale-range) is not
        // an error, per spec §4.4 Phase 3.
        if let Some(endpoint) = transport.discovered_tailscale_endpoint() {
            self.credentials
                .update_tailscale_info(device_id, &endpoint.host, endpoint.port)
                .await;
        }
    }

    /// Cancel any in-flight attempt. Does not close an already-live
    /// transport; call `disconnect()` for that.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Cancel any in-flight attempt and close the current transport, if any.
    /// Idempotent: calling this any number of times in a row has the same
    /// effect as calling it once.
    pub async fn disconnect(&self) {
        self.cancel();
        if let Some(transport) = self.transport.lock().await.take() {
            transport.close().await;
        }
        *self.state.lock().await = OrchestratorState::Idle;
    }
}

enum Phase2Outcome {
    Success(Arc<dyn Transport>),
    AllFailed(Vec<FailedAttempt>),
    Cancelled,
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Scan local interfaces for a Tailscale-range IPv4 address, per spec §4.4
/// Phase 0. Synchronous (interface enumeration is a syscall, not async I/O);
/// callers run it via `spawn_blocking`.
fn detect_local_tailscale() -> bool {
    local_tailscale_address().is_some()
}
