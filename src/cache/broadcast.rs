//! Cross-instance invalidation broadcast.
//!
//! Outbound messages are fire-and-forget: each publish spawns one task that
//! posts to every peer concurrently. A lost message only means the peer serves
//! its snapshot until the TTL runs out.

use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use reqwest::Client;
use subtle::ConstantTimeEq;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use super::events::{BroadcastMessage, InvalidationRequest};

pub const BROADCAST_PATH: &str = "/internal/cache/invalidate";
pub const SECRET_HEADER: &str = "x-atrium-broadcast-secret";

const METRIC_BROADCAST_FAILED: &str = "atrium_broadcast_failed_total";
const DEFAULT_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub peers: Vec<Url>,
    pub secret: Option<String>,
    pub timeout: Duration,
    pub instance_id: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            secret: None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            instance_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl From<&crate::config::BroadcastSettings> for BroadcastConfig {
    fn from(settings: &crate::config::BroadcastSettings) -> Self {
        Self {
            peers: settings.peers.clone(),
            secret: settings.secret.clone(),
            timeout: settings.timeout,
            instance_id: settings.instance_id.clone(),
        }
    }
}

pub struct Broadcaster {
    client: Client,
    config: BroadcastConfig,
}

impl Broadcaster {
    pub fn new(config: BroadcastConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn instance_id(&self) -> &str {
        &self.config.instance_id
    }

    pub fn peers(&self) -> &[Url] {
        &self.config.peers
    }

    /// Post the request to every peer in the background.
    ///
    /// Returns `None` when no peers are configured.
    pub fn publish(&self, request: &InvalidationRequest) -> Option<JoinHandle<()>> {
        if self.config.peers.is_empty() {
            return None;
        }

        let message = BroadcastMessage::from_request(request, &self.config.instance_id);
        let client = self.client.clone();
        let secret = self.config.secret.clone();
        let targets: Vec<Url> = self
            .config
            .peers
            .iter()
            .filter_map(|peer| match peer.join(BROADCAST_PATH) {
                Ok(url) => Some(url),
                Err(err) => {
                    warn!(
                        target: "atrium::invalidator",
                        peer = %peer,
                        error = %err,
                        "skipping peer with unusable url"
                    );
                    None
                }
            })
            .collect();

        Some(tokio::spawn(async move {
            let sends = targets.into_iter().map(|url| {
                let client = client.clone();
                let secret = secret.clone();
                let message = message.clone();
                async move { send_one(&client, url, secret.as_deref(), &message).await }
            });
            join_all(sends).await;
        }))
    }

    /// Constant-time check of the shared secret carried by an inbound message.
    ///
    /// With no secret configured every message is accepted.
    pub fn verify_secret(&self, provided: Option<&str>) -> bool {
        match (&self.config.secret, provided) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(expected), Some(provided)) => {
                expected.as_bytes().ct_eq(provided.as_bytes()).into()
            }
        }
    }

    /// True for messages this instance sent itself.
    pub fn is_own_message(&self, message: &BroadcastMessage) -> bool {
        message.data.instance.as_deref() == Some(self.config.instance_id.as_str())
    }
}

async fn send_one(client: &Client, url: Url, secret: Option<&str>, message: &BroadcastMessage) {
    let mut request = client.post(url.clone()).json(message);
    if let Some(secret) = secret {
        request = request.header(SECRET_HEADER, secret);
    }

    match request.send().await {
        Ok(response) if response.status().is_success() => {
            debug!(
                target: "atrium::invalidator",
                peer = %url,
                resource = %message.resource_type,
                "invalidation broadcast delivered"
            );
        }
        Ok(response) => {
            counter!(METRIC_BROADCAST_FAILED).increment(1);
            warn!(
                target: "atrium::invalidator",
                peer = %url,
                status = response.status().as_u16(),
                "peer rejected invalidation broadcast"
            );
        }
        Err(err) => {
            counter!(METRIC_BROADCAST_FAILED).increment(1);
            warn!(
                target: "atrium::invalidator",
                peer = %url,
                error = %err,
                "invalidation broadcast failed"
            );
        }
    }
}
