//! Bounded retry-on-throttle existence checks against public registries.

use crate::registry::client::RegistryClient;
use crate::registry::endpoints::RegistryEndpoints;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry behaviour on HTTP 429.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt before giving up.
    pub max_retries: u32,
    /// Fixed sleep between throttled attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(10),
        }
    }
}

/// How a 200 response body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyCheck {
    /// Any 200 means the name is taken.
    None,
    /// npm-shaped document: a non-empty `time.unpublished.name` means every
    /// version was unpublished and the name can be retaken.
    NpmUnpublished,
    /// The body must decode as JSON.
    Json,
}

/// A single existence check.
#[derive(Debug, Clone)]
pub struct ProbeRequest {
    pub url: String,
    pub follow_redirects: bool,
    pub check: BodyCheck,
}

impl ProbeRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            follow_redirects: true,
            check: BodyCheck::None,
        }
    }

    pub fn check(mut self, check: BodyCheck) -> Self {
        self.check = check;
        self
    }

    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct NpmDocument {
    #[serde(default)]
    time: NpmTime,
}

#[derive(Debug, Default, Deserialize)]
struct NpmTime {
    #[serde(default)]
    unpublished: Option<NpmUnpublished>,
}

#[derive(Debug, Default, Deserialize)]
struct NpmUnpublished {
    #[serde(default)]
    name: String,
}

/// True when an npm-shaped response says every version was unpublished.
pub fn all_versions_unpublished(body: &str) -> bool {
    serde_json::from_str::<NpmDocument>(body)
        .ok()
        .and_then(|doc| doc.time.unpublished)
        .map(|unpublished| !unpublished.name.is_empty())
        .unwrap_or(false)
}

/// Shared prober handed to every resolver.
#[derive(Clone)]
pub struct Prober {
    client: Arc<dyn RegistryClient>,
    policy: RetryPolicy,
    endpoints: RegistryEndpoints,
}

impl Prober {
    pub fn new(client: Arc<dyn RegistryClient>, policy: RetryPolicy, endpoints: RegistryEndpoints) -> Self {
        Self {
            client,
            policy,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &RegistryEndpoints {
        &self.endpoints
    }

    /// Check whether the probed name exists in its public registry.
    ///
    /// Transport errors, non-200 statuses and retry exhaustion all report
    /// `false`, so uncertain names end up flagged rather than silently dropped.
    pub async fn is_public(&self, request: &ProbeRequest) -> bool {
        let mut retry = 0;

        loop {
            if retry > self.policy.max_retries {
                warn!("Maximum number of retries exhausted for {}", request.url);
                return false;
            }

            debug!("Checking: {}", request.url);
            let reply = match self.client.get(&request.url, request.follow_redirects).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("Error when trying to request {}: {}", request.url, e);
                    return false;
                }
            };
            debug!("{} -> {}", request.url, reply.status);

            match reply.status {
                200 => return Self::accepts(request, &reply.body),
                429 => {
                    warn!("Server responded with 429 (Too many requests), throttling and retrying...");
                    tokio::time::sleep(self.policy.delay).await;
                    retry += 1;
                }
                _ => return false,
            }
        }
    }

    fn accepts(request: &ProbeRequest, body: &str) -> bool {
        match request.check {
            BodyCheck::None => true,
            BodyCheck::NpmUnpublished => {
                if all_versions_unpublished(body) {
                    warn!(
                        "{} was found, but all its versions are unpublished, making anyone able to takeover the namespace",
                        request.url
                    );
                    return false;
                }
                true
            }
            BodyCheck::Json => match serde_json::from_str::<serde_json::Value>(body) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Error when trying to unmarshal response from {}: {}", request.url, e);
                    false
                }
            },
        }
    }
}
