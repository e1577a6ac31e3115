//! Single-flight reconnection glue: wires the foreground-signal and
//! disconnect-error triggers to the orchestrator, guarded by a try-lock so
//! concurrent triggers collapse into at most one in-flight attempt.
//!
//! Grounded directly in spec §4.6; `tokio::sync::Mutex::try_lock` is the
//! natural idiomatic fit for "try-lock semantics" given the rest of the
//! crate's preference for explicit `tokio::sync` primitives over hand-rolled
//! atomics for anything beyond a single flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::codec::AuthKey;
use crate::credentials::CredentialRepository;
use crate::errors::ConnectionError;
use crate::manager::ConnectionManager;
use crate::orchestrator::Orchestrator;
use crate::progress::ProgressSink;
use crate::signalling::SignallingChannel;

/// Guard conditions injected from the host application rather than read
/// from ambient global state (spec §9: "explicitly constructed, explicitly
/// injected values rather than ambient globals").
#[async_trait::async_trait]
pub trait ReconnectGuards: Send + Sync {
    /// Whether the user has manually disconnected since the last successful
    /// connection (a persistent "disconnected-once" latch).
    async fn manual_disconnect_latched(&self) -> bool;

    /// Whether a device is currently selected in the credential repository.
    async fn has_selected_credential(&self) -> bool;
}

/// Drives at most one reconnection attempt at a time.
pub struct ReconnectionController {
    orchestrator: Arc<Orchestrator>,
    manager: Arc<ConnectionManager>,
    credentials: Arc<dyn CredentialRepository>,
    guards: Arc<dyn ReconnectGuards>,
    lock: Mutex<()>,
    is_reconnecting: AtomicBool,
}

impl std::fmt::Debug for ReconnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectionController")
            .field("is_reconnecting", &self.is_reconnecting.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ReconnectionController {
    /// Build a controller over an existing orchestrator/manager pair. The
    /// same `manager` instance must be the one the rest of the application
    /// reads `is_connected`/subscribes to events on.
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        manager: Arc<ConnectionManager>,
        credentials: Arc<dyn CredentialRepository>,
        guards: Arc<dyn ReconnectGuards>,
    ) -> Self {
        Self {
            orchestrator,
            manager,
            credentials,
            guards,
            lock: Mutex::new(()),
            is_reconnecting: AtomicBool::new(false),
        }
    }

    /// Whether a reconnection attempt is currently in flight.
    #[must_use]
    pub fn is_reconnecting(&self) -> bool {
        self.is_reconnecting.load(Ordering::Acquire)
    }

    /// Attempt a reconnect if the guard conditions allow it. Returns
    /// `true` iff this call actually performed (and completed) a
    /// reconnection attempt; `false` for every guard rejection, including
    /// "another attempt is already in flight".
    ///
    /// Guards are checked in the order spec §4.6 specifies: already
    /// connected, no selected credential, manual-disconnect latch, then the
    /// try-lock. The lock is released on every exit path, including a panic
    /// unwinding through the held guard.
    pub async fn attempt_reconnect_if_needed(
        &self,
        signalling: Arc<dyn SignallingChannel>,
        progress: ProgressSink,
    ) -> bool {
        if self.manager.is_connected() {
            return false;
        }
        if !self.guards.has_selected_credential().await {
            return false;
        }
        if self.guards.manual_disconnect_latched().await {
            return false;
        }
        let Ok(_permit) = self.lock.try_lock() else {
            return false;
        };

        self.is_reconnecting.store(true, Ordering::Release);
        let _reset = scopeguard::guard(&self.is_reconnecting, |flag| {
            flag.store(false, Ordering::Release);
        });

        self.run_reconnect(signalling, progress).await
    }

    async fn run_reconnect(&self, signalling: Arc<dyn SignallingChannel>, progress: ProgressSink) -> bool {
        let transport = match self.orchestrator.connect(signalling, progress).await {
            Ok(transport) => transport,
            Err(e) => {
                log::warn!("reconnect attempt failed to establish a transport: {e}");
                return false;
            }
        };

        let Some(credentials) = self.credentials.get_selected_device().await else {
            log::warn!("reconnect attempt: credential went missing mid-attempt");
            transport.close().await;
            return false;
        };
        let key = AuthKey::derive(&credentials.master_secret, &credentials.device_id).to_array();

        match self.manager.connect(transport, &key).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("reconnect attempt's handshake failed: {e}");
                false
            }
        }
    }

    /// Background task implementing the second trigger: watches the
    /// manager's error stream and calls [`Self::attempt_reconnect_if_needed`]
    /// on every [`ConnectionError::Disconnected`] event. The foreground
    /// false-to-true trigger has no concrete signal type in this crate (the
    /// host owns that), so it is left for the host to call
    /// `attempt_reconnect_if_needed` directly; this helper only covers the
    /// trigger this crate already has a concrete stream for.
    ///
    /// Runs until `self` is dropped (the owning `Arc` goes away) or the
    /// error stream closes.
    pub async fn watch_disconnects(
        self: Arc<Self>,
        signalling_factory: impl Fn() -> Arc<dyn SignallingChannel> + Send + Sync + 'static,
        progress: ProgressSink,
    ) {
        let mut errors = self.manager.subscribe_errors();
        loop {
            match errors.recv().await {
                Ok(ConnectionError::Disconnected(reason)) => {
                    log::info!("disconnect observed ({reason}), attempting reconnect");
                    let signalling = signalling_factory();
                    let _ = self.attempt_reconnect_if_needed(signalling, progress.clone()).await;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
