//! Tailscale connection strategy: detect via a cached endpoint plus local
//! interface presence, connect via
//! [`crate::transport::tailscale::TailscaleTransport`].

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ConnectionContext, DetectOutcome, Strategy};
use crate::config::Config;
use crate::constants::TAILSCALE_DEFAULT_PORT;
use crate::errors::{StrategyError, TransportError};
use crate::transport::tailscale::TailscaleTransport;
use crate::transport::Transport;

/// Strategy priority per spec §3.
pub const PRIORITY: u32 = 10;

/// Tailscale-UDP connection strategy.
pub struct TailscaleStrategy {
    config: Config,
}

impl TailscaleStrategy {
    /// Construct a Tailscale strategy with the given timeout configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Strategy for TailscaleStrategy {
    fn name(&self) -> &'static str {
        "Tailscale"
    }

    fn priority(&self) -> u32 {
        PRIORITY
    }

    async fn detect(&self, ctx: &ConnectionContext) -> DetectOutcome {
        if !ctx.local_tailscale_available {
            return DetectOutcome::Unavailable("no local Tailscale interface".into());
        }
        let Some(endpoint) = ctx.tailscale_endpoint.as_ref() else {
            return DetectOutcome::Unavailable("no cached Tailscale endpoint".into());
        };
        DetectOutcome::Available(Some(format!("{}:{}", endpoint.host, endpoint.port)))
    }

    async fn connect(&self, ctx: &ConnectionContext) -> Result<Arc<dyn Transport>, StrategyError> {
        let endpoint = ctx.tailscale_endpoint.as_ref().ok_or_else(|| {
            StrategyError::Transport(TransportError::Fatal(
                "connect() called without a detected Tailscale endpoint".into(),
            ))
        })?;
        let port = if endpoint.port == 0 {
            TAILSCALE_DEFAULT_PORT
        } else {
            endpoint.port
        };
        let addr: SocketAddr = format!("{}:{port}", endpoint.host)
            .parse()
            .map_err(|e| StrategyError::Transport(TransportError::Fatal(format!("invalid Tailscale address: {e}"))))?;

        let transport =
            TailscaleTransport::connect(addr, &ctx.device_id, &ctx.auth_key, &self.config).await?;

        Ok(Arc::new(transport))
    }
}
