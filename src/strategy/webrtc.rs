//! WebRTC connection strategy: always available (last resort), connect via
//! [`crate::transport::webrtc::WebRtcTransport`].

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use rustrtc::{IceCredentialType, IceServer};

use super::{ConnectionContext, DetectOutcome, Strategy};
use crate::config::Config;
use crate::errors::StrategyError;
use crate::net_util::local_tailscale_address;
use crate::transport::webrtc::WebRtcTransport;
use crate::transport::Transport;

/// Strategy priority per spec §3: highest (tried last).
pub const PRIORITY: u32 = 20;

/// WebRTC data-channel connection strategy.
pub struct WebRtcStrategy {
    ice_servers: Vec<IceServer>,
    config: Config,
}

impl WebRtcStrategy {
    /// Construct a WebRTC strategy using the given STUN/TURN servers.
    #[must_use]
    pub fn new(stun_turn_urls: Vec<String>, config: Config) -> Self {
        let ice_servers = stun_turn_urls
            .into_iter()
            .map(|url| IceServer {
                urls: vec![url],
                username: String::new(),
                credential: String::new(),
                credential_type: IceCredentialType::Password,
            })
            .collect();
        Self { ice_servers, config }
    }
}

#[async_trait]
impl Strategy for WebRtcStrategy {
    fn name(&self) -> &'static str {
        "WebRTC"
    }

    fn priority(&self) -> u32 {
        PRIORITY
    }

    async fn detect(&self, _ctx: &ConnectionContext) -> DetectOutcome {
        // WebRTC needs only a signalling channel, which every ConnectionContext
        // carries; it is the connectivity method of last resort and is
        // always reported available.
        DetectOutcome::Available(None)
    }

    async fn connect(&self, ctx: &ConnectionContext) -> Result<Arc<dyn Transport>, StrategyError> {
        let local_tailscale_ip: Option<IpAddr> = if ctx.local_tailscale_available {
            local_tailscale_address().map(IpAddr::V4)
        } else {
            None
        };

        let transport = WebRtcTransport::connect(
            self.ice_servers.clone(),
            ctx.signalling.as_ref(),
            local_tailscale_ip,
            &self.config,
        )
        .await?;

        Ok(Arc::new(transport))
    }
}
