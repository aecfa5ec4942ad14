mod google;
mod openai;

use std::time::Duration;

use anyhow::Result;
use imggen_contracts::providers::ProviderKind;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;
use thiserror::Error;

use crate::request::{GenerationFailure, GenerationRequest, GenerationResult};

pub use google::{GoogleProvider, GOOGLE_MAX_REFERENCE_IMAGES};
pub use openai::OpenAiProvider;

pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);
const ERROR_BODY_MAX_CHARS: usize = 512;

/// A vendor adapter that turns one request into one image.
///
/// Adapters never return `Err`: every transport, HTTP or payload problem is
/// reported as `GenerationResult::Failure` so sibling variations keep going.
pub trait ImageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn name(&self) -> &str {
        self.kind().name()
    }

    fn generate_image(&self, request: &GenerationRequest) -> GenerationResult;

    /// Model used when the request carries no override.
    fn get_generate_model(&self) -> &str;

    fn model_for(&self, request: &GenerationRequest) -> String {
        request
            .model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(self.get_generate_model())
            .to_string()
    }
}

pub fn create_provider(kind: ProviderKind, api_key: &str) -> Result<Box<dyn ImageProvider>> {
    let provider: Box<dyn ImageProvider> = match kind {
        ProviderKind::OpenAi => Box::new(OpenAiProvider::new(api_key)?),
        ProviderKind::Google => Box::new(GoogleProvider::new(api_key)?),
    };
    Ok(provider)
}

pub fn create_provider_by_name(name: &str, api_key: &str) -> Result<Box<dyn ImageProvider>> {
    create_provider(ProviderKind::from_name(name)?, api_key)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProviderInvocationError {
    pub message: String,
    pub finish_reason: Option<String>,
    pub rate_limited: bool,
}

impl ProviderInvocationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            finish_reason: None,
            rate_limited: false,
        }
    }

    pub fn rate_limited() -> Self {
        Self {
            message: "Rate limit exceeded".to_string(),
            finish_reason: None,
            rate_limited: true,
        }
    }

    pub fn with_finish_reason(mut self, finish_reason: Option<String>) -> Self {
        self.finish_reason = finish_reason;
        self
    }
}

impl From<ProviderInvocationError> for GenerationFailure {
    fn from(err: ProviderInvocationError) -> Self {
        Self {
            error: err.message,
            finish_reason: err.finish_reason,
            rate_limited: err.rate_limited,
        }
    }
}

impl From<ProviderInvocationError> for GenerationResult {
    fn from(err: ProviderInvocationError) -> Self {
        GenerationResult::Failure(err.into())
    }
}

pub(crate) fn http_client() -> Result<HttpClient> {
    Ok(HttpClient::builder().timeout(REQUEST_TIMEOUT).build()?)
}

/// `{ENV}` if set and non-blank, trailing slashes trimmed.
pub(crate) fn api_base_from_env(var: &str, default: &str) -> String {
    std::env::var(var)
        .ok()
        .map(|value| normalize_api_base(&value))
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub(crate) fn normalize_api_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

pub(crate) fn transport_error(
    provider: &str,
    err: reqwest::Error,
) -> ProviderInvocationError {
    let err =
        anyhow::Error::new(err.without_url()).context(format!("{provider} request failed"));
    ProviderInvocationError::new(error_chain_text(&err, ERROR_BODY_MAX_CHARS))
}

/// Parse a JSON body, mapping 429 and other non-2xx statuses into failures.
pub(crate) fn response_json_or_error(
    provider: &str,
    response: HttpResponse,
) -> Result<Value, ProviderInvocationError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        let err = err.without_url();
        ProviderInvocationError::new(format!("{provider} response body read failed: {err}"))
    })?;
    if code == 429 {
        tracing::warn!(provider, "rate limited");
        return Err(ProviderInvocationError::rate_limited());
    }
    if !status.is_success() {
        let detail = vendor_error_message(&body)
            .unwrap_or_else(|| truncate_text(&body, ERROR_BODY_MAX_CHARS));
        return Err(ProviderInvocationError::new(format!(
            "{provider} request failed ({code}): {detail}"
        )));
    }
    serde_json::from_str(&body).map_err(|err| {
        ProviderInvocationError::new(format!("{provider} returned invalid JSON payload: {err}"))
    })
}

fn vendor_error_message(body: &str) -> Option<String> {
    let parsed: Value = serde_json::from_str(body).ok()?;
    parsed
        .get("error")
        .and_then(|error| error.get("message"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts.last().is_some_and(|existing| existing == trimmed) {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
