use std::path::{Path, PathBuf};

use anyhow::Context;
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

use crate::error::ImggenError;
use crate::providers::ProviderKind;

pub const CONFIG_VERSION: u64 = 2;
pub const CONFIG_DIR_ENV: &str = "IMGGEN_CONFIG_DIR";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub version: u64,
    pub default_provider: Option<ProviderKind>,
    pub api_keys: IndexMap<ProviderKind, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            default_provider: None,
            api_keys: IndexMap::new(),
        }
    }
}

impl Config {
    /// Stored key for `provider`; blank entries count as missing.
    pub fn stored_key(&self, provider: ProviderKind) -> Option<&str> {
        self.api_keys
            .get(&provider)
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
    }

    pub fn set_key(&mut self, provider: ProviderKind, key: &str) {
        let trimmed = key.trim();
        if trimmed.is_empty() {
            self.api_keys.shift_remove(&provider);
        } else {
            self.api_keys.insert(provider, trimmed.to_string());
        }
    }

    /// Configured default, else the first provider holding a key, else openai.
    pub fn preferred_provider(&self) -> ProviderKind {
        self.default_provider
            .or_else(|| {
                ProviderKind::ALL
                    .into_iter()
                    .find(|kind| self.stored_key(*kind).is_some())
            })
            .unwrap_or(ProviderKind::OpenAi)
    }

    /// Key for `provider`, environment first, then the stored config.
    pub fn api_key_for(&self, provider: ProviderKind) -> Option<String> {
        self.api_key_with_env(provider, |name| std::env::var(name).ok())
    }

    pub fn api_key_with_env<F>(&self, provider: ProviderKind, lookup: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        provider
            .api_key_env_vars()
            .iter()
            .filter_map(|name| lookup(name))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
            .or_else(|| self.stored_key(provider).map(str::to_string))
    }

    pub fn to_value(&self) -> Value {
        let keys: Map<String, Value> = self
            .api_keys
            .iter()
            .map(|(kind, key)| (kind.name().to_string(), Value::String(key.clone())))
            .collect();
        let mut payload = Map::new();
        payload.insert("version".to_string(), json!(self.version));
        if let Some(provider) = self.default_provider {
            payload.insert("default_provider".to_string(), json!(provider.name()));
        }
        payload.insert("api_keys".to_string(), Value::Object(keys));
        Value::Object(payload)
    }

    fn from_current(payload: &Map<String, Value>) -> Self {
        let mut config = Self {
            version: payload
                .get("version")
                .and_then(Value::as_u64)
                .unwrap_or(CONFIG_VERSION),
            default_provider: payload
                .get("default_provider")
                .and_then(Value::as_str)
                .and_then(known_provider),
            api_keys: IndexMap::new(),
        };
        if let Some(keys) = payload.get("api_keys").and_then(Value::as_object) {
            for (name, key) in keys {
                let (Some(kind), Some(key)) = (known_provider(name), key.as_str()) else {
                    continue;
                };
                config.set_key(kind, key);
            }
        }
        config
    }

    fn from_legacy(payload: &Map<String, Value>) -> Self {
        let key = payload
            .get("api_key")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let provider = payload
            .get("provider")
            .and_then(Value::as_str)
            .and_then(known_provider)
            .unwrap_or_else(|| provider_for_key_shape(key));
        let mut config = Self {
            default_provider: Some(provider),
            ..Self::default()
        };
        config.set_key(provider, key);
        config
    }
}

fn known_provider(name: &str) -> Option<ProviderKind> {
    match ProviderKind::from_name(name) {
        Ok(kind) => Some(kind),
        Err(err) => {
            tracing::warn!(%err, "ignoring provider entry in config");
            None
        }
    }
}

/// Attribute a bare legacy key by its shape.
pub fn provider_for_key_shape(key: &str) -> ProviderKind {
    let key = key.trim();
    if key.starts_with("sk-") {
        ProviderKind::OpenAi
    } else {
        ProviderKind::Google
    }
}

fn is_legacy(payload: &Map<String, Value>) -> bool {
    payload.contains_key("api_key") && !payload.contains_key("api_keys")
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$IMGGEN_CONFIG_DIR/config.json`, else the platform config directory.
    pub fn default_path() -> Result<PathBuf, ImggenError> {
        if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|dir| !dir.is_empty()) {
            return Ok(PathBuf::from(dir).join(CONFIG_FILE_NAME));
        }
        directories::ProjectDirs::from("", "", "imggen")
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or_else(|| {
                ImggenError::configuration("Unable to locate a config directory for imggen")
            })
    }

    pub fn open_default() -> Result<Self, ImggenError> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Missing file yields the default config without touching disk. A
    /// legacy single-key file is rewritten in the current schema.
    pub fn load(&self) -> anyhow::Result<Config> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read config {}", self.path.display()))?;
        let parsed: Value = serde_json::from_str(&raw)
            .with_context(|| format!("invalid JSON in config {}", self.path.display()))?;
        let Some(payload) = parsed.as_object() else {
            return Err(ImggenError::configuration(format!(
                "config {} must contain a JSON object",
                self.path.display()
            ))
            .into());
        };

        if is_legacy(payload) {
            let migrated = Config::from_legacy(payload);
            tracing::info!(
                path = %self.path.display(),
                provider = ?migrated.default_provider,
                "migrating legacy config"
            );
            self.save(&migrated)?;
            return Ok(migrated);
        }
        Ok(Config::from_current(payload))
    }

    pub fn save(&self, config: &Config) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(&config.to_value())?)
            .with_context(|| format!("failed to write config {}", self.path.display()))?;
        restrict_permissions(&self.path)?;
        Ok(())
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> anyhow::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{provider_for_key_shape, Config, ConfigStore};
    use crate::providers::ProviderKind;

    fn no_env(_name: &str) -> Option<String> {
        None
    }

    #[test]
    fn missing_file_loads_defaults_without_writing() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ConfigStore::new(temp.path().join("config.json"));
        let config = store.load()?;
        assert_eq!(config, Config::default());
        assert!(!store.exists());
        Ok(())
    }

    #[test]
    fn save_then_load_round_trips() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ConfigStore::new(temp.path().join("nested").join("config.json"));
        let mut config = Config {
            default_provider: Some(ProviderKind::Google),
            ..Config::default()
        };
        config.set_key(ProviderKind::OpenAi, "sk-test");
        config.set_key(ProviderKind::Google, "AIza-test");
        store.save(&config)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(store.path())?)?;
        assert_eq!(
            parsed,
            json!({
                "version": 2,
                "default_provider": "google",
                "api_keys": {"openai": "sk-test", "google": "AIza-test"}
            })
        );
        assert_eq!(store.load()?, config);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn saved_config_is_owner_only() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir()?;
        let store = ConfigStore::new(temp.path().join("config.json"));
        store.save(&Config::default())?;
        let mode = std::fs::metadata(store.path())?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        Ok(())
    }

    #[test]
    fn legacy_config_is_migrated_and_persisted() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ConfigStore::new(temp.path().join("config.json"));
        std::fs::write(store.path(), r#"{"api_key": "sk-legacy"}"#)?;

        let first = store.load()?;
        assert_eq!(first.stored_key(ProviderKind::OpenAi), Some("sk-legacy"));
        assert_eq!(first.default_provider, Some(ProviderKind::OpenAi));

        let on_disk: Value = serde_json::from_str(&std::fs::read_to_string(store.path())?)?;
        assert_eq!(on_disk["version"], json!(2));
        assert_eq!(on_disk["api_keys"]["openai"], json!("sk-legacy"));
        assert!(on_disk.get("api_key").is_none());

        let second = store.load()?;
        assert_eq!(second, first);
        Ok(())
    }

    #[test]
    fn legacy_provider_field_wins_over_key_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ConfigStore::new(temp.path().join("config.json"));
        std::fs::write(
            store.path(),
            r#"{"api_key": "sk-looks-openai", "provider": "google"}"#,
        )?;
        let config = store.load()?;
        assert_eq!(config.stored_key(ProviderKind::Google), Some("sk-looks-openai"));
        assert_eq!(config.stored_key(ProviderKind::OpenAi), None);
        Ok(())
    }

    #[test]
    fn key_shape_attribution() {
        assert_eq!(provider_for_key_shape("sk-abc"), ProviderKind::OpenAi);
        assert_eq!(provider_for_key_shape("AIzaSyXYZ"), ProviderKind::Google);
        assert_eq!(provider_for_key_shape("opaque"), ProviderKind::Google);
    }

    #[test]
    fn unknown_providers_in_config_are_ignored() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ConfigStore::new(temp.path().join("config.json"));
        std::fs::write(
            store.path(),
            serde_json::json!({
                "version": 2,
                "default_provider": "stability",
                "api_keys": {"stability": "x", "google": "g"},
            })
            .to_string(),
        )?;
        let config = store.load()?;
        assert_eq!(config.default_provider, None);
        assert_eq!(config.api_keys.len(), 1);
        assert_eq!(config.preferred_provider(), ProviderKind::Google);
        Ok(())
    }

    #[test]
    fn non_object_config_is_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ConfigStore::new(temp.path().join("config.json"));
        std::fs::write(store.path(), "[1, 2]")?;
        assert!(store.load().is_err());
        Ok(())
    }

    #[test]
    fn env_keys_take_priority_and_blank_counts_as_missing() {
        let mut config = Config::default();
        config.set_key(ProviderKind::Google, "stored-google");
        config.set_key(ProviderKind::OpenAi, "   ");

        assert_eq!(config.api_key_with_env(ProviderKind::OpenAi, no_env), None);
        assert_eq!(
            config.api_key_with_env(ProviderKind::Google, no_env),
            Some("stored-google".to_string())
        );

        let env = |name: &str| match name {
            "GOOGLE_API_KEY" => Some("env-google".to_string()),
            "GEMINI_API_KEY" => Some(String::new()),
            _ => None,
        };
        assert_eq!(
            config.api_key_with_env(ProviderKind::Google, env),
            Some("env-google".to_string())
        );
    }

    #[test]
    fn preferred_provider_falls_back_to_openai() {
        assert_eq!(Config::default().preferred_provider(), ProviderKind::OpenAi);
    }
}
