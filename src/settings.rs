//! User-level configuration for calculation workflows.
//!
//! Settings customize the working-directory policy of the execution
//! primitive through an INI-format configuration file, with hierarchical
//! precedence:
//!
//! 1. Local configuration (`./qcflow.cfg`)
//! 2. User configuration (`~/.config/qcflow/qcflow.cfg`)
//! 3. Built-in defaults
//!
//! # Configuration file format
//!
//! ```ini
//! [run]
//! scratch_dir = /scratch/jobs
//! gzip = true
//! clean_dir = true
//!
//! [logging]
//! level = info
//! ```
//!
//! Settings are resolved once, at the edge: callers load them and convert
//! them into an explicit [`RunConfig`] that is passed into the core. Core
//! logic never reads configuration from ambient process state.

use crate::runner::RunConfig;
use configparser::ini::Ini;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// I/O error when reading configuration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// Invalid configuration value
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Working-directory policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSettings {
    /// Scratch directory root; unset executes in the run directory
    pub scratch_dir: Option<PathBuf>,
    /// Gzip-compress result files on copy-back (default: false)
    pub gzip: bool,
    /// Remove the scratch working directory after copy-back (default: true)
    pub clean_dir: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            scratch_dir: None,
            gzip: false,
            clean_dir: true,
        }
    }
}

/// Logging configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (default: "info")
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// All user-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Working-directory policy
    pub run: RunSettings,
    /// Logging configuration
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings with hierarchical precedence: local file, then user
    /// file, then built-in defaults. A malformed file is skipped with a
    /// warning rather than aborting the run.
    pub fn load() -> Self {
        let local = PathBuf::from("qcflow.cfg");
        if local.exists() {
            match Self::load_from(&local) {
                Ok(settings) => {
                    info!("configuration loaded from {}", local.display());
                    return settings;
                }
                Err(e) => warn!("failed to load {}: {e}", local.display()),
            }
        }
        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                match Self::load_from(&user_path) {
                    Ok(settings) => {
                        info!("configuration loaded from {}", user_path.display());
                        return settings;
                    }
                    Err(e) => warn!("failed to load {}: {e}", user_path.display()),
                }
            }
        }
        debug!("using built-in default configuration");
        Settings::default()
    }

    /// Load settings from a single INI file.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        let mut ini = Ini::new();
        ini.read(content)
            .map_err(|e| SettingsError::IniParse(format!("failed to parse INI: {e}")))?;

        let mut settings = Settings::default();
        if let Some(run_map) = ini.get_map_ref().get("run") {
            settings.run = Self::parse_run(run_map)?;
        }
        if let Some(logging_map) = ini.get_map_ref().get("logging") {
            settings.logging = Self::parse_logging(logging_map)?;
        }
        Ok(settings)
    }

    /// Convert into the explicit run configuration passed to the core.
    pub fn run_config(&self) -> RunConfig {
        RunConfig {
            scratch_dir: self.run.scratch_dir.clone(),
            gzip: self.run.gzip,
            clean_dir: self.run.clean_dir,
            ..RunConfig::default()
        }
    }

    fn user_config_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("qcflow")
                .join("qcflow.cfg")
        })
    }

    fn parse_run(section: &HashMap<String, Option<String>>) -> Result<RunSettings, SettingsError> {
        let mut run = RunSettings::default();
        if let Some(Some(scratch_dir)) = section.get("scratch_dir") {
            if !scratch_dir.is_empty() {
                run.scratch_dir = Some(PathBuf::from(scratch_dir));
            }
        }
        if let Some(Some(gzip)) = section.get("gzip") {
            run.gzip = gzip
                .parse()
                .map_err(|_| SettingsError::InvalidValue(format!("invalid gzip value: {gzip}")))?;
        }
        if let Some(Some(clean_dir)) = section.get("clean_dir") {
            run.clean_dir = clean_dir.parse().map_err(|_| {
                SettingsError::InvalidValue(format!("invalid clean_dir value: {clean_dir}"))
            })?;
        }
        Ok(run)
    }

    fn parse_logging(
        section: &HashMap<String, Option<String>>,
    ) -> Result<LoggingSettings, SettingsError> {
        let mut logging = LoggingSettings::default();
        if let Some(Some(level)) = section.get("level") {
            logging.level = level.clone();
        }
        Ok(logging)
    }
}
