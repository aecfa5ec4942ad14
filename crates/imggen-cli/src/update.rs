use std::cmp::Ordering;
use std::process::Command;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;

pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const REPO_URL: &str = "https://github.com/ilkkanisula/imggen";
const REPO_NAME: &str = "ilkkanisula/imggen";
const GITHUB_API_BASE: &str = "https://api.github.com";
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct TagRow {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    UpToDate,
    Available { latest: String },
    NoReleases,
}

pub struct UpdateChecker {
    api_base: String,
    http: HttpClient,
}

impl UpdateChecker {
    pub fn new() -> Result<Self> {
        Ok(Self {
            api_base: GITHUB_API_BASE.to_string(),
            http: HttpClient::builder().timeout(CHECK_TIMEOUT).build()?,
        })
    }

    pub fn with_api_base(mut self, api_base: impl AsRef<str>) -> Self {
        self.api_base = api_base.as_ref().trim().trim_end_matches('/').to_string();
        self
    }

    pub fn latest_tag(&self) -> Result<Option<String>> {
        let endpoint = format!("{}/repos/{REPO_NAME}/tags", self.api_base);
        let response = self
            .http
            .get(&endpoint)
            .header(USER_AGENT, format!("imggen/{CURRENT_VERSION}"))
            .header(ACCEPT, "application/vnd.github+json")
            .send()
            .with_context(|| format!("update check request failed ({endpoint})"))?;
        let status = response.status();
        let body = response.text().context("update check body read failed")?;
        if !status.is_success() {
            bail!("update check failed ({})", status.as_u16());
        }
        let tags: Vec<TagRow> =
            serde_json::from_str(&body).context("update check returned an unexpected payload")?;
        Ok(latest_version(tags.iter().map(|tag| tag.name.as_str())))
    }

    pub fn check(&self, current: &str) -> Result<UpdateStatus> {
        let Some(latest) = self.latest_tag()? else {
            return Ok(UpdateStatus::NoReleases);
        };
        tracing::debug!(%latest, current, "fetched latest release tag");
        Ok(compare_versions(&latest, current))
    }
}

/// `v1.2.3` / `1.2.3` -> `[1, 2, 3]`. Non-version tags yield `None`.
pub fn parse_version(raw: &str) -> Option<Vec<u64>> {
    let trimmed = raw.trim();
    let digits = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if !digits.starts_with(|ch: char| ch.is_ascii_digit()) {
        return None;
    }
    digits
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

fn cmp_versions(left: &[u64], right: &[u64]) -> Ordering {
    let width = left.len().max(right.len());
    let pad = |parts: &[u64]| -> Vec<u64> {
        let mut padded = parts.to_vec();
        padded.resize(width, 0);
        padded
    };
    pad(left).cmp(&pad(right))
}

pub fn latest_version<'a>(tags: impl IntoIterator<Item = &'a str>) -> Option<String> {
    tags.into_iter()
        .filter_map(|tag| parse_version(tag).map(|parts| (parts, tag)))
        .max_by(|(left, _), (right, _)| cmp_versions(left, right))
        .map(|(_, tag)| tag.trim().trim_start_matches('v').to_string())
}

pub fn compare_versions(latest: &str, current: &str) -> UpdateStatus {
    match (parse_version(latest), parse_version(current)) {
        (Some(latest_parts), Some(current_parts))
            if cmp_versions(&latest_parts, &current_parts) == Ordering::Greater =>
        {
            UpdateStatus::Available {
                latest: latest.trim_start_matches('v').to_string(),
            }
        }
        _ => UpdateStatus::UpToDate,
    }
}

pub fn run_self_update() -> Result<i32> {
    println!("Updating imggen from {REPO_URL} ...");
    let status = Command::new("cargo")
        .args(["install", "--git", REPO_URL, "imggen-cli", "--force"])
        .status()
        .context("failed to launch cargo; is the Rust toolchain installed?")?;
    if !status.success() {
        bail!("cargo install exited with {status}");
    }
    println!("imggen updated.");
    Ok(0)
}
