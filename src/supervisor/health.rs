//! Liveness probing of the core server.

use std::time::Duration;

use async_trait::async_trait;

/// Per-request timeout; the poll loop bounds the total wait.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Paths tried on each attempt, in order.
pub const PROBE_PATHS: &[&str] = &["/health", "/"];

#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// True as soon as the server answers with any HTTP status.
    async fn probe(&self, port: u16) -> bool;
}

pub struct HttpHealthProbe {
    client: reqwest::Client,
    host: String,
}

impl HttpHealthProbe {
    pub fn new(host: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build()?;
        Ok(Self {
            client,
            host: host.into(),
        })
    }

    pub fn url(&self, port: u16, path: &str) -> String {
        format!("http://{}:{}{}", self.host, port, path)
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, port: u16) -> bool {
        for path in PROBE_PATHS {
            let url = self.url(port, path);
            match self.client.get(&url).send().await {
                Ok(response) => {
                    tracing::debug!(url = %url, status = %response.status(), "server answered");
                    return true;
                }
                Err(e) => tracing::trace!(url = %url, error = %e, "no answer"),
            }
        }
        false
    }
}
