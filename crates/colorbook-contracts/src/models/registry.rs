use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn new(name: &str, provider: &str, capabilities: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            capabilities: capabilities
                .iter()
                .map(|item| (*item).to_string())
                .collect(),
        }
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Known models in preference order; the first model of a capability is
/// its default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    [
        ModelSpec::new("imagen-4.0-generate-001", "imagen", &["image"]),
        ModelSpec::new("imagen-3.0-generate-002", "imagen", &["image"]),
        ModelSpec::new("gemini-2.5-flash-image", "gemini", &["image"]),
        ModelSpec::new("dryrun-image-1", "dryrun", &["image"]),
        ModelSpec::new("gemini-2.5-flash", "gemini", &["text"]),
        ModelSpec::new("dryrun-text-1", "dryrun", &["text"]),
    ]
    .into_iter()
    .map(|spec| (spec.name.clone(), spec))
    .collect()
}
