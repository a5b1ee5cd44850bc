//! Configuration file loading.
//!
//! This module loads the trainer configuration from TOML files at
//! XDG-compliant locations. Every loaded configuration is validated.

use crate::config::types::TrainerConfig;
use crate::error::ConfigError;
use std::path::{Path, PathBuf};

/// Default configuration file name for project-local config.
const LOCAL_CONFIG_NAME: &str = "mimic-trainer.toml";

/// Default configuration file name within XDG config directory.
const XDG_CONFIG_NAME: &str = "config.toml";

/// Application name for XDG directory lookup.
const APP_NAME: &str = "mimic-trainer";

/// Loads configuration from an explicit path or the default search paths.
///
/// Search order when `explicit` is None:
/// 1. `./mimic-trainer.toml` (project-local)
/// 2. `~/.config/mimic-trainer/config.toml` (XDG config)
///
/// The training hyperparameters have no defaults, so a missing file is an
/// error.
///
/// # Errors
///
/// Returns an error if no file is found, or if the file cannot be read,
/// parsed, or validated.
pub fn load(explicit: Option<&Path>) -> Result<TrainerConfig, ConfigError> {
    if let Some(path) = explicit {
        return from_path(path);
    }

    for path in search_paths() {
        if path.exists() {
            return from_path(&path);
        }
    }

    Err(ConfigError::configuration(
        "config_file",
        format!(
            "no configuration found; looked in {}",
            search_paths()
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    ))
}

/// Loads configuration from a specific file path.
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The file contains invalid TOML
/// - A hyperparameter fails validation
pub fn from_path(path: &Path) -> Result<TrainerConfig, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::read(path, e.to_string()))?;

    from_str(&contents)
}

/// Parses and validates configuration from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is invalid, doesn't match the schema, or a
/// hyperparameter fails validation.
pub fn from_str(toml_str: &str) -> Result<TrainerConfig, ConfigError> {
    let config: TrainerConfig =
        toml::from_str(toml_str).map_err(|e| ConfigError::parse(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

/// Returns the paths that would be searched for configuration files.
#[must_use]
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_NAME)];

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join(APP_NAME).join(XDG_CONFIG_NAME));
    }

    paths
}
