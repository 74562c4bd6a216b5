//! Wire transport to the remote image model, with bounded retry.

use std::env;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use mane_contracts::payload::ImagePayload;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use crate::error::EngineError;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image-preview";
const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(90);
const ERROR_BODY_MAX_CHARS: usize = 512;

/// Parts of one model reply, in response order.
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub images: Vec<ImagePayload>,
    pub texts: Vec<String>,
}

impl ModelResponse {
    /// Joined text parts, used as refusal detail when no image came back.
    pub fn refusal_text(&self) -> Option<String> {
        if self.texts.is_empty() {
            return None;
        }
        Some(self.texts.join(" "))
    }
}

/// One attempt against the model. [`call_with_retry`] adds the retry budget
/// on top; scripted implementations stand in for the wire in tests.
pub trait ModelTransport: Send + Sync {
    fn send(&self, source: &ImagePayload, instruction: &str) -> Result<ModelResponse, EngineError>;
}

/// Attempt budget and exponential backoff base for transient server faults.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`.
    fn backoff_after(&self, attempt: usize) -> Duration {
        self.base_delay * (1u32 << (attempt.saturating_sub(1)).min(16) as u32)
    }
}

/// Sends one request, retrying only transient server faults, up to the
/// policy's attempt budget. The last failure propagates unchanged.
pub fn call_with_retry(
    transport: &dyn ModelTransport,
    policy: RetryPolicy,
    source: &ImagePayload,
    instruction: &str,
) -> Result<ModelResponse, EngineError> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match transport.send(source, instruction) {
            Ok(response) => return Ok(response),
            Err(err) => {
                if !err.is_transient() || attempt == attempts {
                    return Err(err);
                }
                thread::sleep(policy.backoff_after(attempt));
            }
        }
    }
    unreachable!("retry loop returns on the final attempt")
}

/// Extracts the single result image, or the classified refusal.
pub(crate) fn image_from_response(response: ModelResponse) -> Result<ImagePayload, EngineError> {
    let detail = response.refusal_text();
    match response.images.into_iter().next() {
        Some(image) => Ok(image),
        None => Err(EngineError::NoImageReturned { detail }),
    }
}

/// Blocking HTTP transport against the Gemini `generateContent` endpoint.
pub struct HttpTransport {
    api_base: String,
    api_key: String,
    model: String,
    http: HttpClient,
}

impl HttpTransport {
    /// Reads the API credential at construction time; a missing key is a
    /// fatal startup condition, not a per-request one.
    pub fn from_env() -> Result<Self> {
        let api_key = non_empty_env("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .context("GEMINI_API_KEY or GOOGLE_API_KEY not set")?;
        let api_base = non_empty_env("GEMINI_API_BASE")
            .map(|value| value.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Ok(Self {
            api_base,
            api_key,
            model: DEFAULT_MODEL.to_string(),
            http: HttpClient::new(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }
}

impl ModelTransport for HttpTransport {
    fn send(&self, source: &ImagePayload, instruction: &str) -> Result<ModelResponse, EngineError> {
        let payload = build_payload(source, instruction);
        let response = self
            .http
            .post(self.endpoint())
            .query(&[("key", self.api_key.as_str())])
            .timeout(REQUEST_TIMEOUT)
            .json(&payload)
            .send()
            .map_err(classify_send_error)?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| EngineError::Request(format!("response body read failed: {err}")))?;
        if status.is_server_error() {
            return Err(EngineError::TransientServer(format!(
                "status {}: {}",
                status.as_u16(),
                truncate(&body, ERROR_BODY_MAX_CHARS)
            )));
        }
        if !status.is_success() {
            return Err(EngineError::Request(format!(
                "status {}: {}",
                status.as_u16(),
                truncate(&body, ERROR_BODY_MAX_CHARS)
            )));
        }

        let parsed: Value = serde_json::from_str(&body)
            .map_err(|err| EngineError::Request(format!("invalid JSON payload: {err}")))?;
        Ok(parse_model_response(&parsed))
    }
}

/// Single logical call shape: the source image part, then the instruction.
pub(crate) fn build_payload(source: &ImagePayload, instruction: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                { "inlineData": { "mimeType": source.media_type, "data": source.data } },
                { "text": instruction },
            ],
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE", "TEXT"],
        },
    })
}

/// Scans every candidate's content parts for inline image data and text.
/// Parts that fail payload validation are skipped, not fatal.
pub(crate) fn parse_model_response(payload: &Value) -> ModelResponse {
    let mut response = ModelResponse::default();
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    response.texts.push(text.trim().to_string());
                }
                continue;
            }
            let Some(inline) = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
            else {
                continue;
            };
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let media_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .unwrap_or("image/png");
            if let Ok(image) = ImagePayload::new(media_type, data) {
                response.images.push(image);
            }
        }
    }

    response
}

fn classify_send_error(err: reqwest::Error) -> EngineError {
    if err.is_timeout() || err.is_connect() {
        EngineError::TransientServer(err.to_string())
    } else {
        EngineError::Request(err.to_string())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
