//! Static pricing for the supported image models.
//!
//! OpenAI images are priced per image from a (quality, size) table. Google
//! images are priced from token usage reported by the response.

use crate::options::{AspectRatio, Quality, Resolution};
use crate::providers::ProviderKind;

const OPENAI_IMAGE_PRICES: [(&str, &str, f64); 9] = [
    ("low", "1024x1024", 0.009),
    ("medium", "1024x1024", 0.034),
    ("high", "1024x1024", 0.133),
    ("low", "1024x1536", 0.013),
    ("low", "1536x1024", 0.013),
    ("medium", "1024x1536", 0.050),
    ("medium", "1536x1024", 0.050),
    ("high", "1024x1536", 0.200),
    ("high", "1536x1024", 0.200),
];

/// USD per input token at standard rates.
pub const GOOGLE_INPUT_RATE: f64 = 2.00 / 1_000_000.0;
/// USD per output token at standard rates.
pub const GOOGLE_OUTPUT_RATE: f64 = 120.00 / 1_000_000.0;
pub const GOOGLE_BATCH_INPUT_RATE: f64 = 1.00 / 1_000_000.0;
pub const GOOGLE_BATCH_OUTPUT_RATE: f64 = 60.00 / 1_000_000.0;

pub fn lookup_openai_cost(quality: &str, size: &str) -> Option<f64> {
    OPENAI_IMAGE_PRICES
        .iter()
        .find(|(row_quality, row_size, _)| *row_quality == quality && *row_size == size)
        .map(|(_, _, cost)| *cost)
}

/// Price of one OpenAI image. Pairs outside the table price at zero.
pub fn cost_for_openai(quality: &str, size: &str) -> f64 {
    match lookup_openai_cost(quality, size) {
        Some(cost) => cost,
        None => {
            tracing::warn!(quality, size, "no OpenAI price for quality/size; recording $0");
            0.0
        }
    }
}

pub fn cost_for_google(prompt_tokens: u64, output_tokens: u64, batch_mode: bool) -> f64 {
    let (input_rate, output_rate) = if batch_mode {
        (GOOGLE_BATCH_INPUT_RATE, GOOGLE_BATCH_OUTPUT_RATE)
    } else {
        (GOOGLE_INPUT_RATE, GOOGLE_OUTPUT_RATE)
    };
    (prompt_tokens as f64 * input_rate) + (output_tokens as f64 * output_rate)
}

/// Flat per-image figure used before a Google call, when token counts are unknown.
pub fn estimate_google_image(resolution: Resolution) -> f64 {
    match resolution {
        Resolution::OneK | Resolution::TwoK => 0.134,
        Resolution::FourK => 0.24,
    }
}

/// Pre-generation estimate for one image. `None` when the request cannot be priced.
pub fn estimate_cost_per_image(
    provider: ProviderKind,
    quality: Option<Quality>,
    resolution: Option<Resolution>,
    aspect_ratio: Option<AspectRatio>,
) -> Option<f64> {
    match provider {
        ProviderKind::OpenAi => {
            let quality = quality.unwrap_or_default();
            let size = aspect_ratio.unwrap_or_default().openai_size();
            lookup_openai_cost(quality.as_str(), size)
        }
        ProviderKind::Google => Some(estimate_google_image(resolution.unwrap_or_default())),
    }
}
