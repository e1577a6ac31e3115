//! WebRTC data-channel transport: the connectivity method of last resort,
//! reachable even when neither peer is on the same LAN or tailnet.
//!
//! Built on `rustrtc`'s peer-connection/data-channel plumbing and
//! ICE-candidate forwarding; this side always offers and waits for an
//! answer over a [`crate::signalling::SignallingChannel`]. No
//! Signal-Protocol/compression layer here — the codec above this transport
//! already provides authenticated encryption.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustrtc::transports::ice::IceCandidate;
use rustrtc::transports::sctp::DataChannel;
use rustrtc::{DataChannelEvent, IceServer, PeerConnection, RtcConfiguration, SdpType, SessionDescription};
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{Transport, TransportKind, TransportStats};
use crate::config::Config;
use crate::errors::TransportError;
use crate::net_util::{is_tailscale_range, same_slash_24};
use crate::signalling::SignallingChannel;

/// Candidate-pair shape parsed out of a raw ICE candidate SDP line, used
/// only to classify the eventual connection path (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateKind {
    Host,
    ServerReflexive,
    Relay,
    Other,
}

fn parse_candidate_kind_and_ip(sdp_line: &str) -> Option<(CandidateKind, IpAddr)> {
    let fields: Vec<&str> = sdp_line.split_whitespace().collect();
    // ICE candidate SDP: foundation component transport priority address port "typ" type ...
    let ip: IpAddr = fields.get(4)?.parse().ok()?;
    let kind = match fields.get(7).copied() {
        Some("host") => CandidateKind::Host,
        Some("srflx") | Some("prflx") => CandidateKind::ServerReflexive,
        Some("relay") => CandidateKind::Relay,
        _ => CandidateKind::Other,
    };
    Some((kind, ip))
}

/// Pull the `(address, port)` out of an ICE candidate SDP line, ignoring its
/// type. Used to record the active pair's remote endpoint once classified.
fn parse_candidate_addr(sdp_line: &str) -> Option<(IpAddr, u16)> {
    let fields: Vec<&str> = sdp_line.split_whitespace().collect();
    let ip: IpAddr = fields.get(4)?.parse().ok()?;
    let port: u16 = fields.get(5)?.parse().ok()?;
    Some((ip, port))
}

/// The remote candidate's Tailscale-range endpoint, if the active pair was
/// classified as [`TransportKind::WebRtcTailscale`] and at least one remote
/// candidate carries a Tailscale-range address.
fn remote_tailscale_endpoint(remote_candidates: &[String]) -> Option<crate::credentials::Endpoint> {
    remote_candidates.iter().find_map(|line| {
        let (ip, port) = parse_candidate_addr(line)?;
        is_tailscale_range(ip).then(|| crate::credentials::Endpoint {
            host: ip.to_string(),
            port,
        })
    })
}

/// WebRTC data-channel transport.
pub struct WebRtcTransport {
    pc: PeerConnection,
    data_channel: Mutex<Option<Arc<DataChannel>>>,
    stats: Arc<TransportStats>,
    closed: AtomicBool,
    path: Mutex<TransportKind>,
    tailscale_endpoint: Option<crate::credentials::Endpoint>,
}

impl std::fmt::Debug for WebRtcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebRtcTransport").finish_non_exhaustive()
    }
}

impl WebRtcTransport {
    /// Offer a WebRTC connection over `signalling`, gather ICE candidates,
    /// exchange SDP, and wait for the data channel to open.
    ///
    /// `local_tailscale_ip`, when `Some`, lets path classification recognise
    /// a same-tailnet candidate pair even if it didn't go through the
    /// dedicated Tailscale transport (e.g. the peer only advertised a
    /// Tailscale host candidate over WebRTC).
    ///
    /// # Errors
    ///
    /// [`TransportError::Timeout`] if the data channel doesn't open within
    /// [`Config::webrtc_datachannel_timeout`]; [`TransportError::Fatal`] on
    /// any ICE/SDP negotiation failure.
    pub async fn connect(
        ice_servers: Vec<IceServer>,
        signalling: &dyn SignallingChannel,
        local_tailscale_ip: Option<IpAddr>,
        config: &Config,
    ) -> Result<Self, TransportError> {
        let rtc_config = RtcConfiguration {
            ice_servers,
            ..Default::default()
        };
        let pc = PeerConnection::new(rtc_config);

        let dc = pc
            .create_data_channel("linkcore", None)
            .await
            .map_err(|e| TransportError::Fatal(format!("create_data_channel failed: {e}")))?;

        let offer = pc
            .create_offer()
            .await
            .map_err(|e| TransportError::Fatal(format!("create_offer failed: {e}")))?;
        pc.set_local_description(offer.clone())
            .map_err(|e| TransportError::Fatal(format!("set_local_description failed: {e}")))?;

        let mut ice_rx = pc.subscribe_ice_candidates();
        let mut local_candidates = Vec::new();
        let gather_deadline = tokio::time::sleep(Duration::from_secs(5));
        tokio::pin!(gather_deadline);
        loop {
            tokio::select! {
                candidate = ice_rx.recv() => {
                    match candidate {
                        Ok(candidate) => local_candidates.push(candidate.to_sdp()),
                        Err(_) => break,
                    }
                    if local_candidates.len() >= config.webrtc_min_expected_candidates {
                        break;
                    }
                }
                () = &mut gather_deadline => break,
            }
        }

        let offered_candidates = if local_tailscale_ip.is_none() {
            local_candidates
                .iter()
                .filter(|sdp_line| {
                    parse_candidate_kind_and_ip(sdp_line)
                        .map(|(_, ip)| !is_tailscale_range(ip))
                        .unwrap_or(true)
                })
                .cloned()
                .collect::<Vec<_>>()
        } else {
            local_candidates.clone()
        };

        let answer_sdp = signalling
            .send_offer(&offer.to_sdp_string(), &offered_candidates)
            .await
            .map_err(|e| TransportError::Fatal(format!("signalling exchange failed: {e}")))?
            .ok_or_else(|| TransportError::Fatal("signalling returned no answer".into()))?;

        let answer = SessionDescription::parse(SdpType::Answer, &answer_sdp.sdp)
            .map_err(|e| TransportError::Fatal(format!("invalid SDP answer: {e}")))?;
        pc.set_remote_description(answer)
            .await
            .map_err(|e| TransportError::Fatal(format!("set_remote_description failed: {e}")))?;

        for candidate_sdp in &answer_sdp.ice_candidates {
            if let Ok(candidate) = IceCandidate::from_sdp(candidate_sdp) {
                let _ = pc.add_ice_candidate(candidate).await;
            }
        }

        let path = classify_path(&local_candidates, &answer_sdp.ice_candidates, local_tailscale_ip);
        let tailscale_endpoint = (path == TransportKind::WebRtcTailscale && local_tailscale_ip.is_some())
            .then(|| remote_tailscale_endpoint(&answer_sdp.ice_candidates))
            .flatten();

        let transport = Self {
            pc,
            data_channel: Mutex::new(Some(dc)),
            stats: Arc::new(TransportStats::default()),
            closed: AtomicBool::new(false),
            path: Mutex::new(path),
            tailscale_endpoint,
        };

        timeout(config.webrtc_datachannel_timeout, transport.wait_for_open())
            .await
            .map_err(|_| TransportError::Timeout)??;

        Ok(transport)
    }

    async fn wait_for_open(&self) -> Result<(), TransportError> {
        let guard = self.data_channel.lock().await;
        let Some(dc) = guard.as_ref() else {
            return Err(TransportError::Fatal("no data channel".into()));
        };
        loop {
            match dc.recv().await {
                Some(DataChannelEvent::Open) => return Ok(()),
                Some(DataChannelEvent::Message(_)) => continue,
                Some(DataChannelEvent::Close) | None => {
                    return Err(TransportError::Fatal("data channel closed before open".into()))
                }
            }
        }
    }
}

fn classify_path(
    local_candidates: &[String],
    remote_candidates: &[String],
    local_tailscale_ip: Option<IpAddr>,
) -> TransportKind {
    let parsed_local: Vec<_> = local_candidates
        .iter()
        .filter_map(|s| parse_candidate_kind_and_ip(s))
        .collect();
    let parsed_remote: Vec<_> = remote_candidates
        .iter()
        .filter_map(|s| parse_candidate_kind_and_ip(s))
        .collect();

    if parsed_local.iter().any(|(k, _)| *k == CandidateKind::Relay)
        || parsed_remote.iter().any(|(k, _)| *k == CandidateKind::Relay)
    {
        return TransportKind::WebRtcRelay;
    }

    if parsed_remote
        .iter()
        .any(|(_, ip)| is_tailscale_range(*ip))
        || local_tailscale_ip.is_some() && parsed_remote.iter().any(|(_, ip)| {
            local_tailscale_ip.is_some_and(|local| is_tailscale_range(*ip) || same_slash_24(local, *ip))
        })
    {
        return TransportKind::WebRtcTailscale;
    }

    if let Some(local_ip) = parsed_local.iter().find(|(k, _)| *k == CandidateKind::Host).map(|(_, ip)| *ip) {
        if parsed_remote.iter().any(|(_, ip)| same_slash_24(local_ip, *ip)) {
            return TransportKind::WebRtcLanDirect;
        }
    }

    if parsed_local.iter().any(|(k, _)| *k == CandidateKind::ServerReflexive)
        || parsed_remote.iter().any(|(k, _)| *k == CandidateKind::ServerReflexive)
    {
        return TransportKind::WebRtcServerReflexive;
    }

    TransportKind::WebRtcDirect
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn send(&self, message: &[u8]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let guard = self.data_channel.lock().await;
        let dc = guard.as_ref().ok_or(TransportError::Closed)?;
        let dc_id = dc.id;
        self.pc
            .send_data(dc_id, message)
            .await
            .map_err(|e| TransportError::Fatal(format!("send_data failed: {e}")))?;
        self.stats.record_send(message.len());
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let guard = self.data_channel.lock().await;
        let dc = guard.as_ref().ok_or(TransportError::Closed)?;
        loop {
            match dc.recv().await {
                Some(DataChannelEvent::Message(data)) => {
                    self.stats.record_receive(data.len());
                    return Ok(data);
                }
                Some(DataChannelEvent::Open) => continue,
                Some(DataChannelEvent::Close) | None => return Err(TransportError::Fatal("data channel closed".into())),
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.data_channel.lock().await.take();
    }

    fn kind(&self) -> TransportKind {
        // Safe best-effort: classification is computed once at connect time
        // and never changes for the life of the transport.
        self.path
            .try_lock()
            .map(|g| *g)
            .unwrap_or(TransportKind::WebRtcDirect)
    }

    fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }

    fn discovered_tailscale_endpoint(&self) -> Option<crate::credentials::Endpoint> {
        self.tailscale_endpoint.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relay_candidate_wins_classification() {
        let local = vec!["1 1 UDP 2113932031 10.0.0.5 54321 typ host".to_string()];
        let remote = vec!["1 1 UDP 2113932031 203.0.113.9 54322 typ relay".to_string()];
        assert_eq!(classify_path(&local, &remote, None), TransportKind::WebRtcRelay);
    }

    #[test]
    fn tailscale_remote_candidate_is_detected() {
        let local = vec!["1 1 UDP 2113932031 10.0.0.5 54321 typ host".to_string()];
        let remote = vec!["1 1 UDP 2113932031 100.64.1.2 54322 typ host".to_string()];
        assert_eq!(classify_path(&local, &remote, None), TransportKind::WebRtcTailscale);
    }

    #[test]
    fn same_subnet_host_candidates_classify_as_lan_direct() {
        let local = vec!["1 1 UDP 2113932031 192.168.1.5 54321 typ host".to_string()];
        let remote = vec!["1 1 UDP 2113932031 192.168.1.9 54322 typ host".to_string()];
        assert_eq!(classify_path(&local, &remote, None), TransportKind::WebRtcLanDirect);
    }

    #[test]
    fn server_reflexive_only_classifies_as_reflexive() {
        let local = vec!["1 1 UDP 2113932031 198.51.100.2 54321 typ srflx".to_string()];
        let remote = vec!["1 1 UDP 2113932031 198.51.100.9 54322 typ srflx".to_string()];
        assert_eq!(
            classify_path(&local, &remote, None),
            TransportKind::WebRtcServerReflexive
        );
    }

    #[test]
    fn unrelated_public_candidates_default_to_direct() {
        let local = vec!["1 1 UDP 2113932031 198.51.100.2 54321 typ host".to_string()];
        let remote = vec!["1 1 UDP 2113932031 203.0.113.7 54322 typ host".to_string()];
        assert_eq!(classify_path(&local, &remote, None), TransportKind::WebRtcDirect);
    }

    #[test]
    fn tailscale_range_candidate_is_filterable_without_local_interface() {
        let candidates = vec![
            "1 1 UDP 2113932031 100.64.1.2 54321 typ host".to_string(),
            "1 1 UDP 2113932031 192.168.1.5 54322 typ host".to_string(),
        ];
        let filtered: Vec<_> = candidates
            .iter()
            .filter(|sdp_line| {
                parse_candidate_kind_and_ip(sdp_line)
                    .map(|(_, ip)| !is_tailscale_range(ip))
                    .unwrap_or(true)
            })
            .collect();
        assert_eq!(filtered.len(), 1);
        assert!(filtered[0].contains("192.168.1.5"));
    }
}
