//! HTTP client for the runtime API (`/api/tags`, `/api/pull`, `/api/generate`).

use std::time::Duration;

use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RuntimeError};
use crate::health::HEALTH_PATH;

/// Client for communicating with the runtime.
#[derive(Clone)]
pub struct RuntimeClient {
    client: reqwest::Client,
    base_url: String,
}

/// Request to the generate API.
#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<&'a GenerateOptions>,
}

/// Sampling options forwarded to the runtime.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<i32>,
}

/// Response from the generate API.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateResponse {
    pub model: String,
    pub response: String,
    pub done: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Response from the tags API (list models).
#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

/// An installed model as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelEntry {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub digest: Option<String>,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    name: &'a str,
    stream: bool,
}

/// One line of the streamed pull response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PullProgress {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

impl RuntimeClient {
    /// Create a new client for the runtime at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Get the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the runtime is running and healthy.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}{}", self.base_url, HEALTH_PATH);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RuntimeError::ServerNotRunning(self.base_url.clone()))
        }
    }

    /// List installed models.
    pub async fn list_models(&self) -> Result<Vec<ModelEntry>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Api(format!("{}: {}", status, text)));
        }

        let body = response.bytes().await?;
        let tags: TagsResponse = serde_json::from_slice(&body)?;
        Ok(tags.models)
    }

    /// Check whether `model` is installed.
    ///
    /// A name without a tag also matches its `:latest` variant.
    pub async fn has_model(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| model_matches(&m.name, model)))
    }

    /// Pull a model, calling `on_progress` for every streamed status line.
    pub async fn pull<F>(&self, model: &str, mut on_progress: F) -> Result<()>
    where
        F: FnMut(&PullProgress),
    {
        let url = format!("{}/api/pull", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&PullRequest {
                name: model,
                stream: true,
            })
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Api(format!(
                "failed to pull model {}: {}: {}",
                model, status, text
            )));
        }

        let mut stream = response.bytes_stream();
        let mut pending: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            pending.extend_from_slice(&chunk?);
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                handle_pull_line(&line, &mut on_progress)?;
            }
        }
        handle_pull_line(&pending, &mut on_progress)?;

        debug!("Pulled model {}", model);
        Ok(())
    }

    /// Send a prompt and get the full (non-streamed) response.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: Option<&GenerateOptions>,
    ) -> Result<GenerateResponse> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
            options,
        };

        let url = format!("{}/api/generate", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RuntimeError::Api(format!("{}: {}", status, text)));
        }

        let response: GenerateResponse = response.json().await?;
        if let Some(error) = response.error {
            return Err(RuntimeError::Api(error));
        }
        Ok(response)
    }

    fn map_send_error(&self, e: reqwest::Error) -> RuntimeError {
        if e.is_connect() || e.is_timeout() {
            RuntimeError::ServerNotRunning(self.base_url.clone())
        } else {
            RuntimeError::Http(e)
        }
    }
}

fn handle_pull_line<F>(line: &[u8], on_progress: &mut F) -> Result<()>
where
    F: FnMut(&PullProgress),
{
    let line = String::from_utf8_lossy(line);
    let line = line.trim();
    if line.is_empty() {
        return Ok(());
    }
    let progress: PullProgress = serde_json::from_str(line)?;
    if let Some(error) = progress.error {
        return Err(RuntimeError::Api(error));
    }
    on_progress(&progress);
    Ok(())
}

/// Exact match, or `name` without a tag matching `name:latest`.
pub(crate) fn model_matches(installed: &str, wanted: &str) -> bool {
    if installed == wanted {
        return true;
    }
    !wanted.contains(':') && installed.strip_suffix(":latest") == Some(wanted)
}
