mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec};
pub use selectors::infer_from_model;
