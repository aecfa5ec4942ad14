pub mod generator;
pub mod output;
pub mod providers;
pub mod request;

#[cfg(test)]
mod test_support;

pub use generator::{
    CostEstimate, GenerationReport, Generator, SavedImage, VariationOutcome, MAX_VARIATIONS,
};
pub use output::{OutputTarget, PlannedOutput};
pub use providers::{
    create_provider, create_provider_by_name, GoogleProvider, ImageProvider, OpenAiProvider,
    ProviderInvocationError,
};
pub use request::{
    GeneratedImage, GenerationFailure, GenerationRequest, GenerationResult, ReferenceImage,
};
