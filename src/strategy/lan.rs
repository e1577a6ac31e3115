//! LAN-direct strategy: detect via a cached endpoint or mDNS-equivalent
//! probe, connect via [`crate::transport::lan::LanTransport`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use super::{ConnectionContext, DetectOutcome, Strategy};
use crate::constants::LAN_DEFAULT_PORT;
use crate::credentials::{Endpoint, WifiNetworkLease};
use crate::errors::StrategyError;
use crate::transport::lan::LanTransport;
use crate::transport::Transport;

/// Strategy priority: lowest, tried first, per spec §3.
pub const PRIORITY: u32 = 5;

/// LAN-direct connection strategy.
pub struct LanStrategy {
    wifi_lease: Arc<dyn WifiNetworkLease>,
    detect_timeout: Duration,
}

impl LanStrategy {
    /// Construct a LAN strategy with the given VPN-bypass lease provider and
    /// detect timeout (spec default: 1s).
    #[must_use]
    pub fn new(wifi_lease: Arc<dyn WifiNetworkLease>, detect_timeout: Duration) -> Self {
        Self {
            wifi_lease,
            detect_timeout,
        }
    }
}

async fn probe_reachable(endpoint: &Endpoint, detect_timeout: Duration) -> bool {
    timeout(
        detect_timeout,
        tokio::net::TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
    )
    .await
    .is_ok_and(|r| r.is_ok())
}

#[async_trait]
impl Strategy for LanStrategy {
    fn name(&self) -> &'static str {
        "LAN Direct"
    }

    fn priority(&self) -> u32 {
        PRIORITY
    }

    async fn detect(&self, ctx: &ConnectionContext) -> DetectOutcome {
        let Some(endpoint) = ctx.lan_endpoint.as_ref() else {
            return DetectOutcome::Unavailable("no cached LAN endpoint".into());
        };

        if probe_reachable(endpoint, self.detect_timeout).await {
            DetectOutcome::Available(Some(format!("{}:{}", endpoint.host, endpoint.port)))
        } else {
            DetectOutcome::Unavailable(format!("{}:{} unreachable", endpoint.host, endpoint.port))
        }
    }

    async fn connect(&self, ctx: &ConnectionContext) -> Result<Arc<dyn Transport>, StrategyError> {
        let endpoint = ctx.lan_endpoint.as_ref().ok_or_else(|| {
            StrategyError::Transport(crate::errors::TransportError::Fatal(
                "connect() called without a detected LAN endpoint".into(),
            ))
        })?;
        let port = if endpoint.port == 0 {
            LAN_DEFAULT_PORT
        } else {
            endpoint.port
        };

        let transport = LanTransport::connect(
            &endpoint.host,
            port,
            &ctx.device_id,
            &ctx.auth_key,
            self.wifi_lease.bind_interface().as_deref(),
        )
        .await?;

        Ok(Arc::new(transport))
    }
}
