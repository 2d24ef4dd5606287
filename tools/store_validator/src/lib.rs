pub mod schema;
pub mod validation;

use schema::{Settings, StoreDocument};
use serde_json::Error as JsonError;
use serde_yaml::Error as YamlError;
use thiserror::Error;

pub use validation::{Location, Severity, ValidationIssue, validate_settings, validate_store};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Settings(#[from] YamlError),
    #[error("JSON parse error: {0}")]
    Store(#[from] JsonError),
}

pub fn parse_settings_str(src: &str) -> Result<Settings, ConfigError> {
    if src.trim().is_empty() {
        return Ok(Settings::default());
    }
    let settings = serde_yaml::from_str::<Settings>(src)?;
    Ok(settings)
}

pub fn parse_store_str(src: &str) -> Result<StoreDocument, ConfigError> {
    if src.trim().is_empty() {
        return Ok(StoreDocument::default());
    }
    let document = serde_json::from_str::<StoreDocument>(src)?;
    Ok(document)
}
