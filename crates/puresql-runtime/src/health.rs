//! Liveness probe for the runtime HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Fixed liveness path exposed by the runtime.
pub const HEALTH_PATH: &str = "/api/health";

/// A single liveness check. Failures are reported as `false`, never as errors.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> bool;
}

/// HTTP probe against `GET {base_url}/api/health`.
#[derive(Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HealthProbe {
    pub fn new(api_base_url: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!("{}{}", api_base_url.trim_end_matches('/'), HEALTH_PATH),
            timeout,
        }
    }

    /// Full URL being probed.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthCheck for HealthProbe {
    async fn check(&self) -> bool {
        match self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health probe {} failed: {}", self.url, e);
                false
            }
        }
    }
}
