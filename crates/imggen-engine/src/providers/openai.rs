use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use imggen_contracts::metadata::ProviderMetadata;
use imggen_contracts::pricing::cost_for_openai;
use imggen_contracts::providers::ProviderKind;
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{
    api_base_from_env, http_client, normalize_api_base, response_json_or_error, transport_error,
    ImageProvider, ProviderInvocationError,
};
use crate::request::{GeneratedImage, GenerationRequest, GenerationResult};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-image-1.5";

pub struct OpenAiProvider {
    api_key: String,
    api_base: String,
    http: HttpClient,
}

/// What was asked for, kept to backfill fields the response leaves out.
struct Requested<'a> {
    model: String,
    prompt: &'a str,
    quality: &'static str,
    size: &'static str,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            api_base: api_base_from_env("OPENAI_API_BASE", DEFAULT_API_BASE),
            http: http_client()?,
        })
    }

    pub fn with_api_base(mut self, api_base: impl AsRef<str>) -> Self {
        self.api_base = normalize_api_base(api_base.as_ref());
        self
    }

    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedImage, ProviderInvocationError> {
        let requested = Requested {
            model: self.model_for(request),
            prompt: &request.prompt,
            quality: request.quality.unwrap_or_default().as_str(),
            size: request.aspect_ratio.unwrap_or_default().openai_size(),
        };
        let response_payload = if request.has_references() {
            self.edit_image(request, &requested)?
        } else {
            self.create_image(&requested)?
        };
        Self::parse_image(&response_payload, &requested)
    }

    fn create_image(&self, requested: &Requested<'_>) -> Result<Value, ProviderInvocationError> {
        let endpoint = format!("{}/images/generations", self.api_base);
        let payload = json!({
            "model": requested.model,
            "prompt": requested.prompt,
            "n": 1,
            "size": requested.size,
            "quality": requested.quality,
        });
        tracing::debug!(%endpoint, model = %requested.model, "OpenAI generation request");
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .map_err(|err| transport_error("OpenAI", err))?;
        response_json_or_error("OpenAI", response)
    }

    fn edit_image(
        &self,
        request: &GenerationRequest,
        requested: &Requested<'_>,
    ) -> Result<Value, ProviderInvocationError> {
        let endpoint = format!("{}/images/edits", self.api_base);
        let mut form = MultipartForm::new()
            .text("model", requested.model.clone())
            .text("prompt", requested.prompt.to_string())
            .text("n", "1")
            .text("size", requested.size)
            .text("quality", requested.quality);
        if let Some(fidelity) = request.input_fidelity {
            form = form.text("input_fidelity", fidelity.as_str());
        }
        for reference in &request.reference_images {
            let part = MultipartPart::bytes(reference.bytes.clone())
                .file_name(reference.name.clone())
                .mime_str(&reference.mime_type)
                .map_err(|err| {
                    ProviderInvocationError::new(format!(
                        "invalid mime '{}' for {}: {err}",
                        reference.mime_type, reference.name
                    ))
                })?;
            form = form.part("image[]", part);
        }
        tracing::debug!(
            %endpoint,
            model = %requested.model,
            references = request.reference_images.len(),
            "OpenAI edit request"
        );
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .map_err(|err| transport_error("OpenAI edits", err))?;
        response_json_or_error("OpenAI edits", response)
    }

    fn parse_image(
        payload: &Value,
        requested: &Requested<'_>,
    ) -> Result<GeneratedImage, ProviderInvocationError> {
        let item = payload
            .get("data")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first())
            .ok_or_else(|| ProviderInvocationError::new("OpenAI response returned no images"))?;
        let encoded = item
            .get("b64_json")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ProviderInvocationError::new("OpenAI response is missing b64_json image data")
            })?;
        let bytes = BASE64.decode(encoded.as_bytes()).map_err(|err| {
            ProviderInvocationError::new(format!("OpenAI image base64 decode failed: {err}"))
        })?;

        let field = |key: &str| -> Option<String> {
            item.get(key)
                .and_then(Value::as_str)
                .or_else(|| payload.get(key).and_then(Value::as_str))
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let revised_prompt =
            field("revised_prompt").unwrap_or_else(|| requested.prompt.to_string());
        let quality = field("quality").unwrap_or_else(|| requested.quality.to_string());
        let size = field("size").unwrap_or_else(|| requested.size.to_string());
        let created = payload
            .get("created")
            .and_then(Value::as_i64)
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .map(|stamp| stamp.to_rfc3339());
        let output_format = field("output_format");

        let cost_usd = cost_for_openai(&quality, &size);
        Ok(GeneratedImage {
            bytes,
            mime_type: mime_for_output_format(output_format.as_deref()).to_string(),
            model: requested.model.clone(),
            metadata: ProviderMetadata::OpenAi {
                revised_prompt,
                created,
                quality,
                size,
            },
            cost_usd,
        })
    }
}

fn mime_for_output_format(format: Option<&str>) -> &'static str {
    match format.map(str::to_ascii_lowercase).as_deref() {
        Some("jpeg") | Some("jpg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}

impl ImageProvider for OpenAiProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn generate_image(&self, request: &GenerationRequest) -> GenerationResult {
        match self.generate(request) {
            Ok(image) => GenerationResult::Success(image),
            Err(err) => {
                tracing::warn!(
                    error = %err.message,
                    rate_limited = err.rate_limited,
                    "OpenAI generation failed"
                );
                err.into()
            }
        }
    }

    fn get_generate_model(&self) -> &str {
        DEFAULT_MODEL
    }
}
