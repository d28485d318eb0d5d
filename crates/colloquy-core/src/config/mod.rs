//! Configuration for the orchestration engine
//!
//! YAML files are parsed into [`ColloquyConfig`], API keys are resolved from
//! the environment, and the result is validated before anything is built
//! from it.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;

#[cfg(test)]
mod tests;

use crate::errors::ChatError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<ColloquyConfig, ChatError> {
    ConfigLoader::from_file(path).await
}
