use super::registry::{ModelRegistry, ModelSpec};

/// The model a capability will use, plus what was asked for when that
/// request could not be honoured.
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

    /// Picks a model for `capability`. Requests may carry the API's
    /// `models/` resource prefix; blank requests mean "use the default".
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, String> {
        let requested = requested
            .map(|raw| raw.trim().trim_start_matches("models/"))
            .filter(|name| !name.is_empty());

        if let Some(model) = requested.and_then(|name| self.registry.ensure(name, capability)) {
            return Ok(ModelSelection {
                model,
                requested: requested.map(str::to_string),
                fallback_reason: None,
            });
        }

        let default = self
            .registry
            .default_for(capability)
            .cloned()
            .ok_or_else(|| format!("No models available for capability '{capability}'."))?;
        Ok(ModelSelection {
            fallback_reason: requested.map(|name| {
                format!("Requested model '{name}' unavailable for capability '{capability}'.")
            }),
            requested: requested.map(str::to_string),
            model: default,
        })
    }
}
