//! Client-side capability discovery
//!
//! A viewer asks the server what it supports, then negotiates locally.
//! Discovery is an external call and may fail; negotiation must not, so
//! every failure degrades to a socket-only result pointing at the server's
//! stream endpoint.

use std::time::Duration;
use tracing::{debug, warn};

use super::negotiator::{
    negotiate, websocket_url, CapabilityAdvertisement, Capabilities, NegotiationResult,
    STREAM_PATH,
};

/// Default discovery timeout
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Fetches a server's capability advertisement and negotiates against it
#[derive(Clone)]
pub struct CapabilityProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl CapabilityProbe {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    /// Fetch `GET {base_url}/api/capabilities`
    pub async fn fetch(&self, base_url: &str) -> Result<CapabilityAdvertisement, reqwest::Error> {
        let url = format!("{}/api/capabilities", base_url.trim_end_matches('/'));
        debug!("Probing server capabilities at {}", url);

        self.client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?
            .json::<CapabilityAdvertisement>()
            .await
    }

    /// Discover and negotiate. Never fails.
    pub async fn negotiate(&self, base_url: &str, client: &Capabilities) -> NegotiationResult {
        match self.fetch(base_url).await {
            Ok(advert) => negotiate(client, &advert.capabilities, &advert.endpoints),
            Err(e) => {
                warn!(
                    "Capability probe of {} failed ({}), defaulting to socket transport",
                    base_url, e
                );
                NegotiationResult::socket_only(websocket_url(base_url, STREAM_PATH))
            }
        }
    }
}

impl Default for CapabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{NetworkQuality, TransportKind};

    #[tokio::test]
    async fn test_unreachable_server_defaults_to_socket() {
        // Nothing listens on the discard port
        let probe = CapabilityProbe::with_timeout(Duration::from_millis(500));
        let client = Capabilities::new(true, true, NetworkQuality::Excellent);

        let result = probe.negotiate("http://127.0.0.1:9", &client).await;

        assert_eq!(result.transport, TransportKind::Socket);
        assert_eq!(
            result.socket_endpoint.as_deref(),
            Some("ws://127.0.0.1:9/ws/stream")
        );
        assert!(result.signaling_endpoint.is_none());
        assert!(result.ice_servers.is_empty());
    }
}
