//! Definition Parser
//!
//! Parses stored definition strings (JSON wire format) and loads
//! definition files from disk. Files ending in `.yaml`/`.yml` are read
//! as YAML, everything else as JSON.

use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::Definition;
use super::validator::{validate_definition, ValidationError};
use crate::error::{EngineError, Result};

/// Parses and validates a definition from its stored JSON form.
///
/// Any failure here is fatal for the operation that needed the
/// definition: an instance cannot start or advance without it.
pub fn parse_definition(json: &str) -> Result<Definition> {
    let definition: Definition = serde_json::from_str(json)
        .map_err(|e| EngineError::from(ValidationError::Parse(e.to_string())))?;

    debug!(
        "Parsed definition '{}' with {} steps",
        definition.name,
        definition.len()
    );

    validate_definition(&definition)?;
    Ok(definition)
}

/// Serializes a definition to the JSON wire format.
pub fn to_json(definition: &Definition) -> Result<String> {
    Ok(serde_json::to_string(definition)?)
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Loads a definition file (JSON or YAML).
///
/// # Example
///
/// ```rust,no_run
/// use flowrunner::definition::load_definition;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_definition("approval.json")?;
///     println!("Loaded {} steps", definition.len());
///     Ok(())
/// }
/// ```
pub fn load_definition(path: impl AsRef<Path>) -> Result<Definition> {
    let path = path.as_ref();
    info!("Loading definition from: {}", path.display());

    let content = fs::read_to_string(path)?;
    debug!("Definition content loaded ({} bytes)", content.len());

    if !is_yaml(path) {
        return parse_definition(&content);
    }

    let definition: Definition = serde_yaml::from_str(&content)
        .map_err(|e| EngineError::from(ValidationError::Parse(e.to_string())))?;
    validate_definition(&definition)?;
    Ok(definition)
}

/// Saves a definition to a file (JSON or YAML by extension).
pub fn save_definition(definition: &Definition, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let content = if is_yaml(path) {
        serde_yaml::to_string(definition)
            .map_err(|e| EngineError::Storage(e.to_string()))?
    } else {
        serde_json::to_string_pretty(definition)?
    };

    fs::write(path, content)?;
    info!("Definition saved to: {}", path.display());
    Ok(())
}
