use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable for capability '{capability}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (None, None)
        };

        let candidates = self.registry.by_capability(capability);
        let Some(model) = candidates.first().cloned() else {
            return Err(format!(
                "No models available for capability '{capability}'."
            ));
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::ModelSelector;
    use crate::models::{ModelRegistry, ModelSpec};

    #[test]
    fn selector_honors_known_request() {
        let selection = ModelSelector::new(None)
            .select(Some("dryrun-image-1"), "image")
            .unwrap();
        assert_eq!(selection.model.provider, "dryrun");
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn selector_falls_back_when_requested_model_unavailable() {
        let selection = ModelSelector::new(None)
            .select(Some("gemini-2.5-flash"), "image")
            .unwrap();
        assert_eq!(selection.model.name, "imagen-4.0-generate-001");
        assert_eq!(selection.requested.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'gemini-2.5-flash' unavailable for capability 'image'.")
        );
    }

    #[test]
    fn selector_without_request_uses_default_silently() {
        let selection = ModelSelector::new(None).select(Some("  "), "text").unwrap();
        assert_eq!(selection.model.name, "gemini-2.5-flash");
        assert_eq!(selection.requested, None);
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn selector_errors_when_no_models_for_capability() {
        let mut models = IndexMap::new();
        models.insert(
            "text-only".to_string(),
            ModelSpec::new("text-only", "dryrun", &["text"]),
        );
        let err = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(None, "image")
            .err()
            .unwrap_or_default();
        assert_eq!(err, "No models available for capability 'image'.");
    }
}
