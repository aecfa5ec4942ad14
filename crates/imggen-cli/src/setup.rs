use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use imggen_contracts::config::{Config, ConfigStore};
use imggen_contracts::providers::ProviderKind;
use imggen_contracts::ImggenError;

/// Interactive key setup. Blank answers keep the stored value.
pub fn run_setup<R, W>(store: &ConfigStore, input: &mut R, out: &mut W) -> Result<Config>
where
    R: BufRead,
    W: Write,
{
    let mut config = store.load()?;
    writeln!(out, "imggen setup")?;
    writeln!(out, "Config file: {}", store.path().display())?;
    writeln!(out, "Press Enter to keep the current value.")?;
    writeln!(out)?;

    for kind in ProviderKind::ALL {
        let current = config
            .stored_key(kind)
            .map(mask_key)
            .unwrap_or_else(|| "not set".to_string());
        let answer = prompt(
            input,
            out,
            &format!("{} API key [{current}]: ", kind.display_name()),
        )?;
        if !answer.is_empty() {
            config.set_key(kind, &answer);
        }
    }

    let configured: Vec<ProviderKind> = ProviderKind::ALL
        .into_iter()
        .filter(|kind| config.stored_key(*kind).is_some())
        .collect();
    if configured.is_empty() {
        return Err(ImggenError::configuration("At least one API key is required").into());
    }

    let fallback = config
        .default_provider
        .filter(|kind| configured.contains(kind))
        .unwrap_or(configured[0]);
    let answer = prompt(
        input,
        out,
        &format!("Default provider (openai/google) [{fallback}]: "),
    )?;
    let default_provider = if answer.is_empty() {
        fallback
    } else {
        ProviderKind::from_name(&answer)?
    };
    if config.stored_key(default_provider).is_none() {
        return Err(ImggenError::configuration(format!(
            "No API key configured for default provider {default_provider}"
        ))
        .into());
    }
    config.default_provider = Some(default_provider);

    store.save(&config)?;
    tracing::info!(path = %store.path().display(), "saved config");
    writeln!(out)?;
    writeln!(out, "Saved configuration to {}", store.path().display())?;
    Ok(config)
}

fn prompt<R, W>(input: &mut R, out: &mut W, label: &str) -> Result<String>
where
    R: BufRead,
    W: Write,
{
    write!(out, "{label}")?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line).context("failed reading setup input")?;
    Ok(line.trim().to_string())
}

/// `sk-abcdef123456` -> `sk-a…3456`
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}…{tail}")
}
