//! Transport abstraction for model calls.
//!
//! The [`Transport`] trait decouples the gateway from the HTTP client. Tests
//! use a scripted transport that returns predetermined bodies and records
//! every request.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// One outgoing POST.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Abstraction over the HTTP backend.
pub trait Transport {
    /// POST `request.body` as JSON and return the response body text.
    ///
    /// Non-success statuses are errors.
    fn post(&self, request: &HttpRequest) -> Result<String>;
}

/// Blocking HTTP transport.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder().build().context("build http client")?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    #[instrument(skip_all, fields(url = %request.url, timeout_secs = request.timeout.as_secs()))]
    fn post(&self, request: &HttpRequest) -> Result<String> {
        let mut builder = self.client.post(&request.url).timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .json(&request.body)
            .send()
            .context("send model request")?;
        let status = response.status();
        let body = response.text().context("read model response body")?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "model endpoint returned an error status");
            return Err(anyhow!("http error {}: {}", status.as_u16(), body));
        }
        debug!(status = status.as_u16(), bytes = body.len(), "model response received");
        Ok(body)
    }
}
