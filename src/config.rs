//! Engine Configuration
//!
//! Tunables for the engine. Every field has a default, so an empty
//! config file (or none at all) is valid.

use std::fs;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::entity::TaskResult;
use crate::error::{EngineError, Result};

/// Default page length when draining an instance's tasks.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Default bound on automatic steps per engine call.
pub const DEFAULT_MAX_AUTO_STEPS: usize = 64;

/// Display labels for task results in the task history block.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ResultLabels {
    pub approved: String,
    pub rejected: String,
    pub completed: String,
}

impl Default for ResultLabels {
    fn default() -> Self {
        Self {
            approved: "Approved".to_string(),
            rejected: "Rejected".to_string(),
            completed: "Completed".to_string(),
        }
    }
}

impl ResultLabels {
    pub fn label(&self, result: TaskResult) -> &str {
        match result {
            TaskResult::Approved => &self.approved,
            TaskResult::Rejected => &self.rejected,
            TaskResult::Completed => &self.completed,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Page length for the paged task listing port
    pub page_size: usize,
    /// Consecutive process/unknown/skipped steps allowed in one call
    pub max_auto_steps: usize,
    pub result_labels: ResultLabels,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_auto_steps: DEFAULT_MAX_AUTO_STEPS,
            result_labels: ResultLabels::default(),
        }
    }
}

impl EngineConfig {
    /// Loads a JSON or YAML (by extension) config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;

        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?,
            _ => serde_json::from_str(&content)
                .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?,
        };

        config.validate()?;
        info!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(EngineError::Config("pageSize must be at least 1".to_string()));
        }
        if self.max_auto_steps == 0 {
            return Err(EngineError::Config("maxAutoSteps must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.result_labels.label(TaskResult::Rejected), "Rejected");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_json() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("engine.json");
        fs::write(&path, r#"{"pageSize": 5, "resultLabels": {"approved": "OK"}}"#).unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.page_size, 5);
        assert_eq!(config.max_auto_steps, DEFAULT_MAX_AUTO_STEPS);
        assert_eq!(config.result_labels.approved, "OK");
        assert_eq!(config.result_labels.rejected, "Rejected");
    }

    #[test]
    fn test_load_yaml() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("engine.yaml");
        fs::write(&path, "maxAutoSteps: 3\n").unwrap();

        assert_eq!(EngineConfig::load(&path).unwrap().max_auto_steps, 3);
    }

    #[test]
    fn test_load_rejects_zero_page_size() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("engine.json");
        fs::write(&path, r#"{"pageSize": 0}"#).unwrap();

        assert!(matches!(EngineConfig::load(&path), Err(EngineError::Config(_))));
    }
}
