//! Model gateway: one HTTP call per invocation, vendor adaptation both ways,
//! and bounded retries.
//!
//! Callers always hand in a vendor-neutral JSON payload. The gateway reshapes
//! it for the target vendor, decodes the body and classifies it into a
//! [`RawReply`] so the normalizer never has to guess the vendor again.

use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::normalize::RawReply;
use crate::core::types::{AuthMode, Connection, Platform};
use crate::io::console::Console;
use crate::io::transport::{HttpRequest, Transport};

/// Header used for API-key auth when the configured name is blank.
pub const DEFAULT_API_KEY_HEADER: &str = "x-goog-api-key";
/// Model name sent to chat endpoints when the config names none.
pub const DEFAULT_CHAT_MODEL: &str = "gpt-35-turbo";

static GENERATE_CONTENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r":generateContent(?:$|[?#/])").expect("generateContent pattern should be valid")
});

/// Response/request shape family of the endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vendor {
    /// `generateContent` endpoints: `contents[].parts[].text` in, `candidates[]` out.
    Candidate,
    /// Chat-completion endpoints: `messages[]` in, `choices[]` out.
    Chat,
    /// Anything else: payload sent as-is.
    Generic,
}

impl Vendor {
    pub fn detect(connection: &Connection) -> Self {
        if connection.platform == Platform::AzureOpenAi {
            return Self::Chat;
        }
        if GENERATE_CONTENT_RE.is_match(&connection.endpoint) {
            return Self::Candidate;
        }
        Self::Generic
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyBody {
    Json(Value),
    Text(String),
}

impl ReplyBody {
    fn decode(body: String) -> Self {
        match serde_json::from_str(&body) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(body),
        }
    }
}

/// Classify a body for `vendor`. `None` means the reply is empty and worth a retry.
pub fn classify_reply(body: ReplyBody, vendor: Vendor) -> Option<RawReply> {
    if vendor == Vendor::Candidate {
        let ReplyBody::Json(value) = body else {
            return None;
        };
        return value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
            .map(|text| RawReply::Candidate(text.to_string()));
    }

    match body {
        ReplyBody::Text(text) if text.trim().is_empty() => None,
        ReplyBody::Text(text) => Some(RawReply::PlainText(text)),
        ReplyBody::Json(Value::Null) => None,
        ReplyBody::Json(Value::String(text)) if text.trim().is_empty() => None,
        ReplyBody::Json(Value::String(text)) => Some(RawReply::PlainText(text)),
        ReplyBody::Json(Value::Object(object)) => match first_choice_content(&object) {
            Some(content) => Some(RawReply::Chat(content)),
            None => Some(RawReply::Object(object)),
        },
        ReplyBody::Json(other) => Some(RawReply::PlainText(other.to_string())),
    }
}

/// Null content (tool-call style choices) counts as no content.
fn first_choice_content(object: &serde_json::Map<String, Value>) -> Option<Value> {
    let choice = object.get("choices")?.as_array()?.first()?.as_object()?;
    if let Some(content) = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .filter(|content| !content.is_null())
    {
        return Some(content.clone());
    }
    choice.get("text").filter(|text| !text.is_null()).cloned()
}

/// Retry schedule: `backoff_unit * attempt` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_unit: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("empty model response after {attempts} attempts (last error: {last_error})")]
    Exhausted { attempts: u32, last_error: String },
}

/// Stateless wrapper around one model endpoint.
pub struct ModelGateway<T: Transport> {
    transport: T,
    connection: Connection,
    vendor: Vendor,
    retry: RetryPolicy,
    console: Console,
}

impl<T: Transport> ModelGateway<T> {
    pub fn new(transport: T, connection: Connection, retry: RetryPolicy, console: Console) -> Self {
        let vendor = Vendor::detect(&connection);
        Self {
            transport,
            connection,
            vendor,
            retry,
            console,
        }
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Build the HTTP request for a vendor-neutral payload.
    pub fn build_request(&self, payload: &Value) -> HttpRequest {
        let mut headers = vec![("Content-Type".to_string(), "application/json".to_string())];
        if let Some(credential) = &self.connection.credential {
            match self.connection.auth {
                AuthMode::ApiKey => {
                    let name = if self.connection.auth_header.trim().is_empty() {
                        DEFAULT_API_KEY_HEADER.to_string()
                    } else {
                        self.connection.auth_header.clone()
                    };
                    headers.push((name, credential.clone()));
                }
                AuthMode::Bearer => {
                    headers.push(("Authorization".to_string(), format!("Bearer {credential}")));
                }
            }
        }

        HttpRequest {
            url: self.connection.endpoint.clone(),
            headers,
            body: self.shape_body(payload),
            timeout: self.connection.timeout,
        }
    }

    fn shape_body(&self, payload: &Value) -> Value {
        match self.vendor {
            Vendor::Chat => {
                let text = payload
                    .pointer("/contents/0/parts/0/text")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| payload.to_string());
                let model = self
                    .connection
                    .model
                    .as_deref()
                    .or_else(|| payload.get("model").and_then(Value::as_str))
                    .unwrap_or(DEFAULT_CHAT_MODEL);
                json!({"model": model, "messages": [{"role": "user", "content": text}]})
            }
            Vendor::Candidate => {
                if payload.get("contents").is_some() {
                    return payload.clone();
                }
                json!({"contents": [{"parts": [{"text": payload.to_string()}]}]})
            }
            Vendor::Generic => payload.clone(),
        }
    }

    /// Issue a single call and decode the body.
    #[instrument(skip_all, fields(platform = self.connection.platform.as_str(), vendor = ?self.vendor))]
    pub fn invoke(&self, payload: &Value) -> Result<ReplyBody> {
        let request = self.build_request(payload);
        debug!(
            endpoint = %request.url,
            api_key_present = self.connection.credential.is_some(),
            "sending model request"
        );
        self.console.sent(&request.body);
        let body = self.transport.post(&request)?;
        self.console.received(&body);
        Ok(ReplyBody::decode(body))
    }

    /// Call until a non-empty reply arrives or attempts run out.
    pub fn invoke_with_retries(&self, payload: &Value) -> Result<RawReply, GatewayError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::from("empty reply");
        for attempt in 1..=max_attempts {
            info!(attempt, max_attempts, "calling model");
            match self.invoke(payload) {
                Ok(body) => match classify_reply(body, self.vendor) {
                    Some(reply) => return Ok(reply),
                    None => {
                        warn!(attempt, "model reply was empty");
                        last_error = String::from("empty reply");
                    }
                },
                Err(err) => {
                    warn!(attempt, error = %format!("{err:#}"), "model call failed");
                    last_error = format!("{err:#}");
                }
            }
            if attempt < max_attempts {
                thread::sleep(self.retry.backoff_unit * attempt);
            }
        }
        Err(GatewayError::Exhausted {
            attempts: max_attempts,
            last_error,
        })
    }
}
