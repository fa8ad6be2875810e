mod registry;
mod selectors;

pub use registry::{
    ModelRegistry, ModelSpec, CAPABILITY_ADVISORY, CAPABILITY_IMAGE, CAPABILITY_VIDEO,
    CAPABILITY_VOICE,
};
pub use selectors::{ModelSelection, ModelSelector};
