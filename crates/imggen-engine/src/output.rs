use std::path::{Path, PathBuf};

use imggen_contracts::metadata::sidecar_path;
use imggen_contracts::ImggenError;

const TEMPLATE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];
const DEFAULT_STEM: &str = "imggen";

/// Where a run writes: a directory, plus an optional basename taken from a
/// file-style `--output`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTarget {
    pub dir: PathBuf,
    pub basename: Option<String>,
}

/// The destination of one variation, fixed before any provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    pub index: usize,
    pub filename: String,
    pub image_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl OutputTarget {
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::directory(".");
        }
        let path = Path::new(trimmed);
        let is_template = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| TEMPLATE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_template {
            let dir = path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let basename = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .map(str::to_string);
            return Self { dir, basename };
        }
        let without_trailing = trimmed.trim_end_matches(['/', std::path::MAIN_SEPARATOR]);
        if without_trailing.is_empty() {
            return Self::directory(trimmed);
        }
        Self::directory(without_trailing)
    }

    pub fn directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            basename: None,
        }
    }

    /// `index` is 1-based.
    pub fn filename(&self, index: usize, variations: usize) -> String {
        match self.basename.as_deref() {
            None => format!("{DEFAULT_STEM}_{index:03}.png"),
            Some(base) if variations == 1 => format!("{base}.png"),
            Some(base) => format!("{base}_{index}.png"),
        }
    }

    pub fn plan(&self, variations: usize) -> Vec<PlannedOutput> {
        (1..=variations)
            .map(|index| {
                let filename = self.filename(index, variations);
                let image_path = self.dir.join(&filename);
                let metadata_path = sidecar_path(&image_path);
                PlannedOutput {
                    index,
                    filename,
                    image_path,
                    metadata_path,
                }
            })
            .collect()
    }

    /// Fail with every pre-existing destination listed, images and sidecars alike.
    pub fn check_collisions(&self, plan: &[PlannedOutput]) -> Result<(), ImggenError> {
        let existing: Vec<String> = plan
            .iter()
            .flat_map(|planned| [&planned.image_path, &planned.metadata_path])
            .filter(|path| path.exists())
            .map(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            })
            .collect();
        if existing.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = existing.len(), dir = %self.dir.display(), "output collision");
        Err(ImggenError::FileCollision {
            dir: self.dir.clone(),
            paths: existing,
        })
    }
}
