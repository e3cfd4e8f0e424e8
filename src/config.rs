//! Runtime configuration
//!
//! Reads configuration from:
//! - `.wixmanaged.yaml` / `.wixmanaged.yml` / `.wixmanaged.json` (project-level)
//! - the same names in the home directory (user-level)

use crate::events::SetupEvent;
use crate::session::props;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_NAMES: [&str; 3] = [".wixmanaged.yaml", ".wixmanaged.yml", ".wixmanaged.json"];

/// Configuration error
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Extend from other configuration files or presets
    pub extends: Vec<String>,

    /// Session properties captured for deferred actions
    pub deferred_properties: Vec<String>,

    /// Session properties snapshotted into the data bag at initialization
    pub session_serializable_properties: Vec<String>,

    /// Turn a failing event handler into a failed action
    pub abort_on_unhandled_exception: bool,

    /// Copy captured properties into the environment of deferred actions
    pub stage_environment: bool,

    /// Events meant to run elevated
    pub elevated_events: Vec<SetupEvent>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            extends: Vec::new(),
            deferred_properties: to_strings(&[
                props::INSTALL_DIR,
                props::UI_LEVEL,
                props::PRODUCT_NAME,
                "FOUNDPREVIOUSVERSION",
                props::UPGRADE_CODE,
                "MsiLogFileLocation",
            ]),
            session_serializable_properties: to_strings(&[
                props::INSTALLED,
                props::REMOVE,
                props::PRODUCT_NAME,
                props::PRODUCT_CODE,
                props::UPGRADE_CODE,
                props::REINSTALL,
                props::MSI_FILE,
                props::UPGRADING_PRODUCT_CODE,
                "FOUNDPREVIOUSVERSION",
                props::UI_LEVEL,
                props::MANAGED_UI,
                props::MANAGED_UI_HANDLE,
            ]),
            abort_on_unhandled_exception: true,
            stage_environment: false,
            elevated_events: Vec::new(),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn extend_unique(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a preset configuration by name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "strict" => Some(Self {
                abort_on_unhandled_exception: true,
                stage_environment: false,
                ..Self::default()
            }),
            "legacy" => Some(Self {
                stage_environment: true,
                ..Self::default()
            }),
            _ => None,
        }
    }

    pub fn preset_names() -> &'static [&'static str] {
        &["default", "strict", "legacy"]
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::load_with_depth(path, 0)
    }

    fn load_with_depth(path: &Path, depth: usize) -> Result<Self, ConfigError> {
        const MAX_DEPTH: usize = 10;
        if depth >= MAX_DEPTH {
            return Err(ConfigError::Invalid(
                "Maximum config inheritance depth exceeded".to_string(),
            ));
        }

        let content = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&content, path)?;

        if !config.extends.is_empty() {
            let base_dir = path.parent().unwrap_or(Path::new("."));
            let mut base_config = Self::default();

            for extend in &config.extends.clone() {
                let extended = match Self::preset(extend) {
                    Some(preset) => preset,
                    None => {
                        let extend_path = if Path::new(extend).is_absolute() {
                            PathBuf::from(extend)
                        } else {
                            base_dir.join(extend)
                        };
                        Self::load_with_depth(&extend_path, depth + 1)?
                    }
                };
                base_config.merge(extended);
            }

            base_config.merge(config);
            config = base_config;
        }

        config.validate()?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse configuration text, choosing the format from the file extension
    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yaml" | "yml" => Ok(serde_yaml::from_str(content)?),
            "json" => Ok(serde_json::from_str(content)?),
            _ => Err(ConfigError::Invalid(format!(
                "Unknown config file format: {}",
                ext
            ))),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(bad) = self
            .deferred_properties
            .iter()
            .chain(&self.session_serializable_properties)
            .find(|p| p.trim().is_empty() || p.contains([';', '=']))
        {
            return Err(ConfigError::Invalid(format!(
                "Invalid property name: '{}'",
                bad
            )));
        }
        Ok(())
    }

    /// Merge another config into this one (other takes precedence)
    pub fn merge(&mut self, other: Self) {
        extend_unique(&mut self.deferred_properties, other.deferred_properties);
        extend_unique(
            &mut self.session_serializable_properties,
            other.session_serializable_properties,
        );
        if !other.abort_on_unhandled_exception {
            self.abort_on_unhandled_exception = false;
        }
        if other.stage_environment {
            self.stage_environment = true;
        }
        for event in other.elevated_events {
            if !self.elevated_events.contains(&event) {
                self.elevated_events.push(event);
            }
        }
    }

    /// First config file found in `dir`
    pub fn find_in(dir: &Path) -> Option<PathBuf> {
        CONFIG_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<Self, ConfigError> {
        if let Some(path) = Self::find_in(Path::new(".")) {
            return Self::load(&path);
        }

        if let Some(home) = dirs::home_dir() {
            if let Some(path) = Self::find_in(&home) {
                return Self::load(&path);
            }
        }

        Ok(Self::default())
    }

    pub fn is_elevated(&self, event: SetupEvent) -> bool {
        self.elevated_events.contains(&event)
    }
}
