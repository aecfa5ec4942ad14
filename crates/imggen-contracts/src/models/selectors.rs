use crate::error::ImggenError;
use crate::providers::ProviderKind;

use super::registry::ModelRegistry;

/// Resolve the provider that serves `model`.
///
/// Registered model names win outright; otherwise providers are asked in
/// registration order whether they claim the name's prefix.
pub fn infer_from_model(
    registry: &ModelRegistry,
    model: &str,
) -> Result<ProviderKind, ImggenError> {
    let trimmed = model.trim();
    if trimmed.is_empty() {
        return Err(ImggenError::AmbiguousModel(model.to_string()));
    }
    if let Some(spec) = registry.get(trimmed) {
        return Ok(spec.provider);
    }
    let provider = ProviderKind::ALL
        .into_iter()
        .find(|provider| provider.claims_model(trimmed))
        .ok_or_else(|| ImggenError::AmbiguousModel(trimmed.to_string()))?;
    tracing::debug!(model = trimmed, %provider, "inferred provider from model prefix");
    Ok(provider)
}
