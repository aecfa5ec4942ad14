use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ImggenError;

/// The closed set of image providers, in registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum ProviderKind {
    #[serde(rename = "openai")]
    #[value(name = "openai")]
    OpenAi,
    #[serde(rename = "google")]
    #[value(name = "google")]
    Google,
}

impl ProviderKind {
    /// Registration order. Model inference walks this list and the first match wins.
    pub const ALL: [ProviderKind; 2] = [ProviderKind::OpenAi, ProviderKind::Google];

    pub fn name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Google => "google",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::Google => "Google",
        }
    }

    pub fn from_name(name: &str) -> Result<Self, ImggenError> {
        let normalized = name.trim().to_ascii_lowercase();
        let alias = match normalized.as_str() {
            "gemini" => "google",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == alias)
            .ok_or_else(|| ImggenError::UnknownProvider(name.to_string()))
    }

    /// Model-name prefixes claimed by this provider.
    pub fn model_prefixes(self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &["gpt-", "dall-e-", "chatgpt-image"],
            ProviderKind::Google => &["gemini-", "google-", "imagen-"],
        }
    }

    pub fn claims_model(self, model: &str) -> bool {
        let lowered = model.trim().to_ascii_lowercase();
        self.model_prefixes()
            .iter()
            .any(|prefix| lowered.starts_with(prefix))
    }

    /// Environment variables consulted before the config file, in priority order.
    pub fn api_key_env_vars(self) -> &'static [&'static str] {
        match self {
            ProviderKind::OpenAi => &["OPENAI_API_KEY"],
            ProviderKind::Google => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = ImggenError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::from_name(raw)
    }
}
