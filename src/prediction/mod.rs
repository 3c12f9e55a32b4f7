// src/prediction/mod.rs
pub mod classifier;
pub mod factors;
pub mod manager;
pub mod risk;

pub use classifier::{BreachClassifier, ClassifierParams, ModelMetadata};
pub use manager::{ModelManager, ModelState, ModelStatus, SharedModelManager};
