use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ImggenError;

/// OpenAI quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    #[default]
    Low,
    Medium,
    High,
}

impl Quality {
    pub const ALL: [Quality; 3] = [Quality::Low, Quality::Medium, Quality::High];

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
        }
    }
}

/// Google output resolution tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
pub enum Resolution {
    #[default]
    #[serde(rename = "1K")]
    #[value(name = "1K")]
    OneK,
    #[serde(rename = "2K")]
    #[value(name = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    #[value(name = "4K")]
    FourK,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::OneK, Resolution::TwoK, Resolution::FourK];

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::OneK => "1K",
            Resolution::TwoK => "2K",
            Resolution::FourK => "4K",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    #[value(name = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    #[value(name = "16:9")]
    Landscape16x9,
    #[serde(rename = "9:16")]
    #[value(name = "9:16")]
    Portrait9x16,
    #[serde(rename = "4:3")]
    #[value(name = "4:3")]
    Landscape4x3,
    #[serde(rename = "3:4")]
    #[value(name = "3:4")]
    Portrait3x4,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Landscape16x9,
        AspectRatio::Portrait9x16,
        AspectRatio::Landscape4x3,
        AspectRatio::Portrait3x4,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Landscape16x9 => "16:9",
            AspectRatio::Portrait9x16 => "9:16",
            AspectRatio::Landscape4x3 => "4:3",
            AspectRatio::Portrait3x4 => "3:4",
        }
    }

    /// Nearest size accepted by the gpt-image models.
    pub fn openai_size(self) -> &'static str {
        match self {
            AspectRatio::Square => "1024x1024",
            AspectRatio::Landscape16x9 | AspectRatio::Landscape4x3 => "1536x1024",
            AspectRatio::Portrait9x16 | AspectRatio::Portrait3x4 => "1024x1536",
        }
    }
}

/// How closely an OpenAI edit should follow the reference images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputFidelity {
    High,
    Low,
}

impl InputFidelity {
    pub const ALL: [InputFidelity; 2] = [InputFidelity::High, InputFidelity::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            InputFidelity::High => "high",
            InputFidelity::Low => "low",
        }
    }
}

macro_rules! impl_option_text {
    ($ty:ty, $label:literal) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = ImggenError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let trimmed = raw.trim();
                <$ty>::ALL
                    .into_iter()
                    .find(|value| value.as_str().eq_ignore_ascii_case(trimmed))
                    .ok_or_else(|| {
                        let valid = <$ty>::ALL
                            .iter()
                            .map(|value| value.as_str())
                            .collect::<Vec<_>>()
                            .join(", ");
                        ImggenError::invalid_argument(format!(
                            "Invalid {}: {raw}\nValid options: {valid}",
                            $label
                        ))
                    })
            }
        }
    };
}

impl_option_text!(Quality, "quality level");
impl_option_text!(Resolution, "resolution");
impl_option_text!(AspectRatio, "aspect ratio");
impl_option_text!(InputFidelity, "input fidelity");
