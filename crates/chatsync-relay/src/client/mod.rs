//! Client side of the relay: a [`BroadcastTransport`] over HTTP and SSE.

mod sse;

pub use sse::decode_broadcasts;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Url;

use chatsync_core::{BroadcastFeed, BroadcastTransport};
use chatsync_types::StreamingBroadcast;

/// Streaming transport backed by a `chatsync-relay` server.
///
/// Every frame is POSTed on its own task, so frames may arrive out of order or
/// not at all. Receivers cope through the monotonic merge rule.
pub struct RelayTransport {
    http_client: reqwest::Client,
    channel_url: Url,
}

impl RelayTransport {
    /// Transport for `user_id`'s channel on the relay at `base_url`
    pub fn new(base_url: &str, user_id: &str) -> Result<Self> {
        let mut channel_url = Url::parse(base_url).context("Invalid relay URL")?;
        channel_url
            .path_segments_mut()
            .map_err(|_| anyhow!("Relay URL cannot carry a path: {}", base_url))?
            .pop_if_empty()
            .extend(["users", user_id, "broadcasts"]);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            channel_url,
        })
    }

    pub fn channel_url(&self) -> &Url {
        &self.channel_url
    }
}

#[async_trait]
impl BroadcastTransport for RelayTransport {
    fn publish(&self, broadcast: StreamingBroadcast) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime; dropping streaming frame");
            return;
        };
        let request = self.http_client.post(self.channel_url.clone()).json(&broadcast);

        runtime.spawn(async move {
            match request.send().await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => {
                    tracing::debug!(status = %response.status(), "Relay refused streaming frame");
                }
                Err(e) => tracing::debug!("Failed to publish streaming frame: {}", e),
            }
        });
    }

    async fn subscribe(&self) -> Result<BroadcastFeed> {
        let response = self
            .http_client
            .get(self.channel_url.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .context("Failed to connect to relay")?
            .error_for_status()
            .context("Relay rejected subscription")?;

        tracing::info!(url = %self.channel_url, "Subscribed to relay");
        Ok(decode_broadcasts(response.bytes_stream()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_url_is_built_from_segments() {
        let transport = RelayTransport::new("http://localhost:8787/", "user 1").unwrap();
        assert_eq!(
            transport.channel_url().as_str(),
            "http://localhost:8787/users/user%201/broadcasts"
        );

        let nested = RelayTransport::new("https://example.com/relay", "u1").unwrap();
        assert_eq!(nested.channel_url().path(), "/relay/users/u1/broadcasts");
    }

    #[test]
    fn test_rejects_unusable_base_url() {
        assert!(RelayTransport::new("not a url", "u1").is_err());
        assert!(RelayTransport::new("mailto:someone@example.com", "u1").is_err());
    }
}
