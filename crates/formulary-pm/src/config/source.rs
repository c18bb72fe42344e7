use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Where a configuration value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in default
    Default,
    /// `config.toml` in the user config directory, or an explicit `--config` file
    File(PathBuf),
    /// `FORMULARY_*` environment variable
    Environment(String),
    /// Set programmatically, e.g. from a CLI flag
    Command,
}

impl ConfigSource {
    pub fn describe(&self) -> String {
        match self {
            ConfigSource::Default => "default".to_string(),
            ConfigSource::File(path) => path.display().to_string(),
            ConfigSource::Environment(var) => var.clone(),
            ConfigSource::Command => "command".to_string(),
        }
    }
}

/// Reads configuration files, environment overrides and platform directories.
#[derive(Debug)]
pub struct ConfigLoader {
    use_environment: bool,
    /// Replaces the process environment when set.
    vars: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new(use_environment: bool) -> Self {
        Self {
            use_environment,
            vars: None,
        }
    }

    /// A loader that reads `FORMULARY_*` values from `vars` instead of the process environment.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            use_environment: true,
            vars: Some(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("", "", "formulary")
    }

    /// Get a `FORMULARY_*` variable; empty values count as unset.
    pub fn get_env(&self, var: &str) -> Option<String> {
        if !self.use_environment {
            return None;
        }

        let value = match &self.vars {
            Some(vars) => vars.get(var).cloned(),
            None => env::var(var).ok(),
        };
        value.filter(|s| !s.is_empty())
    }

    /// Converts "temp-dir" to "FORMULARY_TEMP_DIR"
    pub fn env_var_name(key: &str) -> String {
        format!("FORMULARY_{}", key.replace('-', "_").to_uppercase())
    }

    pub fn get_env_config(&self, key: &str) -> Option<String> {
        self.get_env(&Self::env_var_name(key))
    }

    pub fn get_env_u64(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        let Some(value) = self.get_env_config(key) else {
            return Ok(None);
        };
        value.trim().parse().map(Some).map_err(|_| {
            ConfigError::Config(format!(
                "{} must be a non-negative integer, got {:?}",
                Self::env_var_name(key),
                value
            ))
        })
    }

    pub fn get_env_path(&self, key: &str) -> Option<PathBuf> {
        self.get_env_config(key).map(|value| expand_path(&value))
    }

    /// `~/.config/formulary` on Linux.
    pub fn config_dir(&self) -> PathBuf {
        if let Some(dirs) = Self::project_dirs() {
            dirs.config_dir().to_path_buf()
        } else if let Some(base) = directories::BaseDirs::new() {
            base.home_dir().join(".formulary")
        } else {
            PathBuf::from(".formulary")
        }
    }

    pub fn default_config_file(&self) -> PathBuf {
        self.config_dir().join("config.toml")
    }

    pub fn default_store(&self) -> PathBuf {
        match Self::project_dirs() {
            Some(dirs) => dirs.data_dir().join("store"),
            None => self.config_dir().join("store"),
        }
    }

    pub fn default_temp_dir(&self) -> PathBuf {
        match Self::project_dirs() {
            Some(dirs) => dirs.cache_dir().join("tmp"),
            None => env::temp_dir().join("formulary"),
        }
    }

    pub fn default_catalog(&self) -> PathBuf {
        self.config_dir().join("formulas")
    }

    /// Read a TOML config file. A missing file yields `None`.
    pub fn load_config_file(&self, path: &Path) -> Result<Option<toml::Table>, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::Config(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        contents.parse::<toml::Table>().map(Some).map_err(|e| ConfigError::Parse {
            source_name: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Expand `~` and `$VAR` in a configured path.
pub(crate) fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(raw),
    }
}
