//! HTTP seam used by every registry probe.

use crate::types::{HttpConfig, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::trace;

/// Status and body of a registry response.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

/// Issues GET requests against public registries.
///
/// Implementations must be shareable across resolver instances; the
/// resolvers themselves hold no state between calls.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch `url`, optionally refusing to follow redirects.
    async fn get(&self, url: &str, follow_redirects: bool) -> Result<HttpReply>;
}

/// `reqwest` backed client.
pub struct HttpRegistryClient {
    client: Client,
    no_redirect_client: Client,
}

impl HttpRegistryClient {
    /// Create a new client from HTTP settings.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = Self::builder(config)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        let no_redirect_client = Self::builder(config)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            no_redirect_client,
        })
    }

    fn builder(config: &HttpConfig) -> reqwest::ClientBuilder {
        Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(&config.user_agent)
            .http1_only() // Force HTTP/1.1 to avoid HTTP/2 stream limit issues
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(30))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn get(&self, url: &str, follow_redirects: bool) -> Result<HttpReply> {
        let client = if follow_redirects {
            &self.client
        } else {
            &self.no_redirect_client
        };

        let response = client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        trace!("GET {} -> {}", url, status);

        Ok(HttpReply { status, body })
    }
}
