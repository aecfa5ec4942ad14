use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::pricing::{cost_for_google, cost_for_openai};

/// Provider-specific fields captured from one successful generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderMetadata {
    #[serde(rename = "openai")]
    OpenAi {
        revised_prompt: String,
        created: Option<String>,
        quality: String,
        size: String,
    },
    Google {
        model_version: String,
        response_id: String,
        finish_reason: String,
        prompt_tokens: u64,
        output_tokens: u64,
    },
}

/// The JSON sidecar written next to every generated image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub original_prompt: String,
    pub provider: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
}

impl MetadataRecord {
    pub fn new(
        original_prompt: &str,
        provider: &str,
        model: &str,
        cost_usd: f64,
        details: &ProviderMetadata,
    ) -> Self {
        let mut record = Self {
            original_prompt: original_prompt.to_string(),
            provider: provider.to_string(),
            model: model.to_string(),
            revised_prompt: None,
            created: None,
            quality: None,
            size: None,
            cost_usd,
            model_version: None,
            response_id: None,
            finish_reason: None,
            prompt_tokens: None,
            output_tokens: None,
        };
        match details {
            ProviderMetadata::OpenAi {
                revised_prompt,
                created,
                quality,
                size,
            } => {
                if revised_prompt != original_prompt {
                    record.revised_prompt = Some(revised_prompt.clone());
                }
                record.created = created.clone();
                record.quality = Some(quality.clone());
                record.size = Some(size.clone());
            }
            ProviderMetadata::Google {
                model_version,
                response_id,
                finish_reason,
                prompt_tokens,
                output_tokens,
            } => {
                record.model_version = Some(model_version.clone());
                record.response_id = Some(response_id.clone());
                record.finish_reason = Some(finish_reason.clone());
                record.prompt_tokens = Some(*prompt_tokens);
                record.output_tokens = Some(*output_tokens);
            }
        }
        record
    }

    /// Recompute the cost from fields stored in this record alone.
    pub fn audit_cost(&self) -> Option<f64> {
        if let (Some(quality), Some(size)) = (self.quality.as_deref(), self.size.as_deref()) {
            return Some(cost_for_openai(quality, size));
        }
        if let (Some(prompt), Some(output)) = (self.prompt_tokens, self.output_tokens) {
            return Some(cost_for_google(prompt, output, false));
        }
        None
    }
}

/// `foo/imggen_001.png` -> `foo/imggen_001.json`
pub fn sidecar_path(image_path: &Path) -> PathBuf {
    image_path.with_extension("json")
}

pub fn write_metadata(path: &Path, record: &MetadataRecord) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(record)?)?;
    Ok(())
}

pub fn read_metadata(path: &Path) -> anyhow::Result<MetadataRecord> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}
