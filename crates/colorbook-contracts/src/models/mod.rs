mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec};
pub use selectors::{ModelSelection, ModelSelector};

pub const IMAGE_CAPABILITY: &str = "image";
pub const TEXT_CAPABILITY: &str = "text";
