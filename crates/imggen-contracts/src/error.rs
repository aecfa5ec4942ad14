use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors that stop an invocation before any image is requested.
///
/// Per-variation provider failures are not represented here; they are carried
/// as data in the engine's generation results so siblings keep running.
#[derive(Debug, Error)]
pub enum ImggenError {
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{}", collision_message(.dir, .paths))]
    FileCollision { dir: PathBuf, paths: Vec<String> },

    #[error("{0}")]
    Configuration(String),

    #[error("Unknown provider: {0}. Valid providers: openai, google")]
    UnknownProvider(String),

    #[error("Cannot infer provider from model '{0}'. See `imggen list-models`")]
    AmbiguousModel(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ImggenError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

fn collision_message(dir: &Path, paths: &[String]) -> String {
    let mut lines = vec![
        "File collision detected".to_string(),
        String::new(),
        format!("The following files already exist in {}:", dir.display()),
    ];
    for path in paths {
        lines.push(format!("  - {path}"));
    }
    lines.push(String::new());
    lines.push("Please:".to_string());
    lines.push("  1. Delete or rename these files, OR".to_string());
    lines.push("  2. Use a different --output directory".to_string());
    lines.push(String::new());
    lines.push("No API calls were made (no charges incurred).".to_string());
    lines.join("\n")
}
