use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use imggen_contracts::metadata::ProviderMetadata;
use imggen_contracts::pricing::cost_for_google;
use imggen_contracts::providers::ProviderKind;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

use super::{
    api_base_from_env, http_client, normalize_api_base, response_json_or_error, transport_error,
    ImageProvider, ProviderInvocationError,
};
use crate::request::{GeneratedImage, GenerationRequest, GenerationResult};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-3-pro-image-preview";
const API_KEY_HEADER: &str = "x-goog-api-key";
pub const GOOGLE_MAX_REFERENCE_IMAGES: usize = 14;

pub struct GoogleProvider {
    api_key: String,
    api_base: String,
    http: HttpClient,
}

impl GoogleProvider {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: api_key.into(),
            api_base: api_base_from_env("GEMINI_API_BASE", DEFAULT_API_BASE),
            http: http_client()?,
        })
    }

    pub fn with_api_base(mut self, api_base: impl AsRef<str>) -> Self {
        self.api_base = normalize_api_base(api_base.as_ref());
        self
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_payload(request: &GenerationRequest) -> Value {
        let mut parts: Vec<Value> = request
            .reference_images
            .iter()
            .map(|reference| {
                json!({
                    "inlineData": {
                        "mimeType": reference.mime_type,
                        "data": BASE64.encode(&reference.bytes),
                    }
                })
            })
            .collect();
        parts.push(json!({ "text": request.prompt }));

        let mut image_config = Map::new();
        if let Some(aspect_ratio) = request.aspect_ratio {
            image_config.insert(
                "aspectRatio".to_string(),
                Value::String(aspect_ratio.as_str().to_string()),
            );
        }
        image_config.insert(
            "imageSize".to_string(),
            Value::String(request.resolution.unwrap_or_default().as_str().to_string()),
        );

        json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": {
                "responseModalities": ["TEXT", "IMAGE"],
                "imageConfig": image_config,
            },
        })
    }

    fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedImage, ProviderInvocationError> {
        let count = request.reference_images.len();
        if count > GOOGLE_MAX_REFERENCE_IMAGES {
            return Err(ProviderInvocationError::new(format!(
                "Too many reference images: {count}. Max {GOOGLE_MAX_REFERENCE_IMAGES} allowed"
            )));
        }

        let model = self.model_for(request);
        let endpoint = self.endpoint_for_model(&model);
        tracing::debug!(%endpoint, %model, references = count, "Gemini generation request");
        let response = self
            .http
            .post(&endpoint)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .json(&Self::build_payload(request))
            .send()
            .map_err(|err| transport_error("Gemini", err))?;
        let payload = response_json_or_error("Gemini", response)?;
        Self::parse_image(&payload, &model)
    }

    fn parse_image(
        payload: &Value,
        model: &str,
    ) -> Result<GeneratedImage, ProviderInvocationError> {
        let candidate = payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|rows| rows.first());
        let finish_reason = candidate
            .and_then(|candidate| candidate.get("finishReason"))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let inline = candidate
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|part| part.get("inlineData").or_else(|| part.get("inline_data")))
            .find(|inline| {
                inline
                    .get("data")
                    .and_then(Value::as_str)
                    .is_some_and(|data| !data.is_empty())
            });
        let Some(inline) = inline else {
            let reason = finish_reason.or_else(|| {
                payload
                    .get("promptFeedback")
                    .and_then(|feedback| feedback.get("blockReason"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
            let message = match reason.as_deref() {
                Some(reason) => format!("No image data in response (finish reason: {reason})"),
                None => "No image data in response".to_string(),
            };
            return Err(ProviderInvocationError::new(message).with_finish_reason(reason));
        };

        let bytes = BASE64
            .decode(inline.get("data").and_then(Value::as_str).unwrap_or_default())
            .map_err(|err| {
                ProviderInvocationError::new(format!("Gemini image base64 decode failed: {err}"))
            })?;
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or("image/png")
            .to_string();

        let text = |key: &str| {
            payload
                .get(key)
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        let usage = payload.get("usageMetadata");
        let tokens = |key: &str| {
            usage
                .and_then(|usage| usage.get(key))
                .and_then(Value::as_u64)
                .unwrap_or(0)
        };
        let prompt_tokens = tokens("promptTokenCount");
        let output_tokens = tokens("candidatesTokenCount");
        let model_version = text("modelVersion").unwrap_or_else(|| model.to_string());
        if usage.is_none() {
            tracing::warn!(%model, "Gemini response has no usage metadata; cost recorded as $0");
        }

        Ok(GeneratedImage {
            bytes,
            mime_type,
            model: model.to_string(),
            metadata: ProviderMetadata::Google {
                model_version,
                response_id: text("responseId").unwrap_or_default(),
                finish_reason: finish_reason.unwrap_or_else(|| "UNKNOWN".to_string()),
                prompt_tokens,
                output_tokens,
            },
            cost_usd: cost_for_google(prompt_tokens, output_tokens, false),
        })
    }
}

impl ImageProvider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn generate_image(&self, request: &GenerationRequest) -> GenerationResult {
        match self.generate(request) {
            Ok(image) => GenerationResult::Success(image),
            Err(err) => {
                tracing::warn!(
                    error = %err.message,
                    finish_reason = ?err.finish_reason,
                    rate_limited = err.rate_limited,
                    "Gemini generation failed"
                );
                err.into()
            }
        }
    }

    fn get_generate_model(&self) -> &str {
        DEFAULT_MODEL
    }
}

#[cfg(test)]
mod tests {
    use httpmock::{Method::POST, MockServer};
    use imggen_contracts::metadata::ProviderMetadata;
    use imggen_contracts::options::{AspectRatio, Resolution};
    use imggen_contracts::pricing::cost_for_google;
    use serde_json::json;

    use super::{GoogleProvider, GOOGLE_MAX_REFERENCE_IMAGES};
    use crate::providers::ImageProvider;
    use crate::request::{GenerationRequest, GenerationResult, ReferenceImage};
    use crate::test_support::should_skip_httpmock;

    fn provider(server: &MockServer) -> anyhow::Result<GoogleProvider> {
        Ok(GoogleProvider::new("AIza-test")?.with_api_base(server.url("/v1beta")))
    }

    #[test]
    fn payload_lists_references_before_prompt() {
        let mut request = GenerationRequest::new("a cabin");
        request.aspect_ratio = Some(AspectRatio::Landscape16x9);
        request.resolution = Some(Resolution::TwoK);
        request.reference_images = vec![ReferenceImage::from_bytes("ref.png", vec![1, 2, 3])];

        let payload = GoogleProvider::build_payload(&request);
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[0]["inlineData"]["data"], json!("AQID"));
        assert_eq!(parts[1]["text"], json!("a cabin"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["TEXT", "IMAGE"])
        );
        assert_eq!(
            payload["generationConfig"]["imageConfig"],
            json!({"aspectRatio": "16:9", "imageSize": "2K"})
        );
    }

    #[test]
    fn payload_omits_aspect_ratio_when_unset() {
        let payload = GoogleProvider::build_payload(&GenerationRequest::new("p"));
        assert_eq!(
            payload["generationConfig"]["imageConfig"],
            json!({"imageSize": "1K"})
        );
    }

    #[test]
    fn generation_reads_image_usage_and_metadata() -> anyhow::Result<()> {
        if should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-3-pro-image-preview:generateContent")
                .header("x-goog-api-key", "AIza-test")
                .body_includes("\"text\":\"a cabin\"");
            then.status(200)
                .header("content-type", "application/json")
                .body(
                    json!({
                        "candidates": [{
                            "content": {"parts": [
                                {"text": "Here is your cabin"},
                                {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
                            ]},
                            "finishReason": "STOP"
                        }],
                        "usageMetadata": {"promptTokenCount": 125, "candidatesTokenCount": 1120},
                        "modelVersion": "gemini-3-pro-image-preview-001",
                        "responseId": "abc123xyz789"
                    })
                    .to_string(),
                );
        });

        let result = provider(&server)?.generate_image(&GenerationRequest::new("a cabin"));

        mock.assert();
        let GenerationResult::Success(image) = result else {
            panic!("expected success, got {result:?}");
        };
        assert_eq!(image.bytes, vec![1, 2, 3]);
        assert_eq!(image.model, "gemini-3-pro-image-preview");
        assert_eq!(image.cost_usd, cost_for_google(125, 1120, false));
        assert_eq!(
            image.metadata,
            ProviderMetadata::Google {
                model_version: "gemini-3-pro-image-preview-001".to_string(),
                response_id: "abc123xyz789".to_string(),
                finish_reason: "STOP".to_string(),
                prompt_tokens: 125,
                output_tokens: 1120,
            }
        );
        Ok(())
    }

    #[test]
    fn missing_metadata_uses_fallbacks() -> anyhow::Result<()> {
        if should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/v1beta/models/gemini-2.5-flash-image:generateContent");
            then.status(200).body(
                json!({
                    "candidates": [{"content": {"parts": [{"inlineData": {"data": "AQID"}}]}}]
                })
                .to_string(),
            );
        });

        let mut request = GenerationRequest::new("p");
        request.model = Some("gemini-2.5-flash-image".to_string());
        let result = provider(&server)?.generate_image(&request);

        let GenerationResult::Success(image) = result else {
            panic!("expected success, got {result:?}");
        };
        assert_eq!(image.cost_usd, 0.0);
        assert_eq!(
            image.metadata,
            ProviderMetadata::Google {
                model_version: "gemini-2.5-flash-image".to_string(),
                response_id: String::new(),
                finish_reason: "UNKNOWN".to_string(),
                prompt_tokens: 0,
                output_tokens: 0,
            }
        );
        Ok(())
    }

    #[test]
    fn blocked_response_carries_finish_reason() -> anyhow::Result<()> {
        if should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).body(
                json!({"candidates": [{"content": {"parts": []}, "finishReason": "SAFETY"}]})
                    .to_string(),
            );
        });

        let result = provider(&server)?.generate_image(&GenerationRequest::new("p"));
        let GenerationResult::Failure(failure) = result else {
            panic!("expected failure, got {result:?}");
        };
        assert_eq!(failure.finish_reason.as_deref(), Some("SAFETY"));
        assert!(failure.error.contains("No image data in response"));
        Ok(())
    }

    #[test]
    fn prompt_block_reason_is_reported() -> anyhow::Result<()> {
        if should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(200)
                .body(json!({"promptFeedback": {"blockReason": "PROHIBITED_CONTENT"}}).to_string());
        });

        let result = provider(&server)?.generate_image(&GenerationRequest::new("p"));
        let GenerationResult::Failure(failure) = result else {
            panic!("expected failure, got {result:?}");
        };
        assert_eq!(failure.finish_reason.as_deref(), Some("PROHIBITED_CONTENT"));
        Ok(())
    }

    #[test]
    fn rate_limit_is_flagged() -> anyhow::Result<()> {
        if should_skip_httpmock() {
            return Ok(());
        }
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST);
            then.status(429)
                .body(json!({"error": {"message": "Resource exhausted"}}).to_string());
        });

        let result = provider(&server)?.generate_image(&GenerationRequest::new("p"));
        let GenerationResult::Failure(failure) = result else {
            panic!("expected failure, got {result:?}");
        };
        assert!(failure.rate_limited);
        Ok(())
    }

    #[test]
    fn too_many_references_fail_without_a_call() -> anyhow::Result<()> {
        let provider = GoogleProvider::new("k")?.with_api_base("http://127.0.0.1:9");
        let mut request = GenerationRequest::new("p");
        request.reference_images = (0..=GOOGLE_MAX_REFERENCE_IMAGES)
            .map(|idx| ReferenceImage::from_bytes(format!("ref{idx}.png"), vec![0]))
            .collect();

        let result = provider.generate_image(&request);
        let GenerationResult::Failure(failure) = result else {
            panic!("expected failure, got {result:?}");
        };
        assert_eq!(failure.error, "Too many reference images: 15. Max 14 allowed");
        assert!(!failure.rate_limited);
        Ok(())
    }

    #[test]
    fn transport_failures_never_echo_the_api_key() -> anyhow::Result<()> {
        let key = "AIza-SECRET-KEY-123";
        let provider = GoogleProvider::new(key)?.with_api_base("http://127.0.0.1:9/v1beta");

        let result = provider.generate_image(&GenerationRequest::new("p"));
        let GenerationResult::Failure(failure) = result else {
            panic!("expected failure, got {result:?}");
        };
        assert!(failure.error.starts_with("Gemini request failed"));
        assert!(!failure.error.contains(key), "{}", failure.error);
        Ok(())
    }
}
