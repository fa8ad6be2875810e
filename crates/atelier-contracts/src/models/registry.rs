use indexmap::IndexMap;

pub const CAPABILITY_ADVISORY: &str = "advisory";
pub const CAPABILITY_IMAGE: &str = "image";
pub const CAPABILITY_VIDEO: &str = "video";
pub const CAPABILITY_VOICE: &str = "voice";

/// Known Gemini models, defaults first within each capability.
const GEMINI_MODELS: &[(&str, &str)] = &[
    ("gemini-3-pro-preview", CAPABILITY_ADVISORY),
    ("gemini-2.5-flash", CAPABILITY_ADVISORY),
    ("gemini-2.5-flash-image", CAPABILITY_IMAGE),
    ("gemini-3-pro-image-preview", CAPABILITY_IMAGE),
    ("veo-3.1-fast-generate-preview", CAPABILITY_VIDEO),
    ("veo-3.1-generate-preview", CAPABILITY_VIDEO),
    ("gemini-2.5-flash-native-audio-preview-12-2025", CAPABILITY_VOICE),
    ("gemini-live-2.5-flash-preview", CAPABILITY_VOICE),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    fn gemini(name: &str, capability: &str) -> Self {
        Self {
            name: name.to_string(),
            provider: "gemini".to_string(),
            capabilities: vec![capability.to_string()],
        }
    }

    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        let models = models.unwrap_or_else(|| {
            GEMINI_MODELS
                .iter()
                .map(|(name, capability)| (name.to_string(), ModelSpec::gemini(name, capability)))
                .collect()
        });
        Self { models }
    }

    pub fn by_capability<'a>(
        &'a self,
        capability: &'a str,
    ) -> impl Iterator<Item = &'a ModelSpec> + 'a {
        self.models
            .values()
            .filter(move |model| model.supports(capability))
    }

    /// The returned model borrows only the registry, not `capability`.
    pub fn default_for(&self, capability: &str) -> Option<&ModelSpec> {
        self.models.values().find(|model| model.supports(capability))
    }

    /// The named model, only if it can serve `capability`.
    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        self.models
            .get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}
