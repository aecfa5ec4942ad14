use std::path::Path;

use anyhow::{Context, Result};
use imggen_contracts::metadata::ProviderMetadata;
use imggen_contracts::options::{AspectRatio, InputFidelity, Quality, Resolution};

/// A reference image loaded into memory before any worker starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceImage {
    pub name: String,
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ReferenceImage {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed reading reference image {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|value| value.to_str())
            .unwrap_or("image.png")
            .to_string();
        Ok(Self::from_bytes(name, bytes))
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let name = name.into();
        let mime_type = sniff_mime(&bytes)
            .or_else(|| mime_for_name(&name))
            .unwrap_or("image/png")
            .to_string();
        Self {
            name,
            bytes,
            mime_type,
        }
    }
}

fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes)
        .ok()
        .map(|format| format.to_mime_type())
}

fn mime_for_name(name: &str) -> Option<&'static str> {
    let ext = Path::new(name)
        .extension()
        .and_then(|value| value.to_str())?
        .to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

/// One invocation's worth of parameters, shared read-only by every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub reference_images: Vec<ReferenceImage>,
    pub model: Option<String>,
    pub quality: Option<Quality>,
    pub resolution: Option<Resolution>,
    pub aspect_ratio: Option<AspectRatio>,
    pub input_fidelity: Option<InputFidelity>,
    pub variations: usize,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference_images: Vec::new(),
            model: None,
            quality: None,
            resolution: None,
            aspect_ratio: None,
            input_fidelity: None,
            variations: 1,
        }
    }

    pub fn has_references(&self) -> bool {
        !self.reference_images.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    /// The model that actually served the request.
    pub model: String,
    pub metadata: ProviderMetadata,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationFailure {
    pub error: String,
    pub finish_reason: Option<String>,
    pub rate_limited: bool,
}

impl GenerationFailure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            finish_reason: None,
            rate_limited: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    Success(GeneratedImage),
    Failure(GenerationFailure),
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResult::Success(_))
    }
}
