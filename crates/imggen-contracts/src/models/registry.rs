use indexmap::IndexMap;

use crate::providers::ProviderKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: ProviderKind,
    /// The model a provider uses when no `--model` is given.
    pub default: bool,
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim())
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn models_for(&self, provider: ProviderKind) -> Vec<String> {
        self.models
            .values()
            .filter(|model| model.provider == provider)
            .map(|model| model.name.clone())
            .collect()
    }

    /// Models grouped by provider in registration order.
    pub fn grouped(&self) -> IndexMap<ProviderKind, Vec<String>> {
        ProviderKind::ALL
            .into_iter()
            .map(|provider| (provider, self.models_for(provider)))
            .filter(|(_, models)| !models.is_empty())
            .collect()
    }

    pub fn default_for(&self, provider: ProviderKind) -> Option<&ModelSpec> {
        self.models
            .values()
            .find(|model| model.provider == provider && model.default)
            .or_else(|| self.models.values().find(|model| model.provider == provider))
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: ProviderKind, default: bool| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider,
                default,
            },
        );
    };

    insert("gpt-image-1.5", ProviderKind::OpenAi, true);
    insert("gpt-image-1", ProviderKind::OpenAi, false);
    insert("gpt-image-1-mini", ProviderKind::OpenAi, false);
    insert("gemini-3-pro-image-preview", ProviderKind::Google, true);
    insert("gemini-2.5-flash-image", ProviderKind::Google, false);

    map
}
