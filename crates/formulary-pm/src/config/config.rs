use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::source::{expand_path, ConfigLoader, ConfigSource};
use crate::checker::DEFAULT_CHECK_TIMEOUT;
use crate::downloader::DEFAULT_MAX_ARTIFACT_SIZE;
use crate::error::ConfigError;
use crate::http::HttpClientConfig;
use crate::runner::RunnerConfig;

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_fetch_timeout() -> u64 {
    600
}

fn default_check_timeout() -> u64 {
    DEFAULT_CHECK_TIMEOUT.as_secs()
}

/// Keys accepted in `config.toml`. Everything is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
struct FileConfig {
    store: Option<String>,
    temp_dir: Option<String>,
    catalog: Option<String>,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    max_artifact_size: Option<u64>,
    fetch_timeout: Option<u64>,
    check_timeout: Option<u64>,
    proxy: Option<String>,
}

/// Tool configuration.
///
/// Sources, lowest to highest priority: built-in defaults, the config file,
/// `FORMULARY_*` environment variables, then explicit setters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub store: PathBuf,
    pub temp_dir: PathBuf,
    pub catalog: PathBuf,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Bytes.
    pub max_artifact_size: u64,
    /// Seconds, whole fetch including retries.
    pub fetch_timeout: u64,
    /// Seconds, used when a formula's test has no `timeout_secs`.
    pub check_timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    #[serde(skip)]
    sources: HashMap<String, ConfigSource>,
}

impl Config {
    /// Defaults for a given loader's platform directories.
    pub fn defaults(loader: &ConfigLoader) -> Self {
        let mut config = Self {
            store: loader.default_store(),
            temp_dir: loader.default_temp_dir(),
            catalog: loader.default_catalog(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            max_artifact_size: DEFAULT_MAX_ARTIFACT_SIZE,
            fetch_timeout: default_fetch_timeout(),
            check_timeout: default_check_timeout(),
            proxy: None,
            sources: HashMap::new(),
        };
        for key in Self::keys() {
            config.sources.insert(key.to_string(), ConfigSource::Default);
        }
        config
    }

    pub fn keys() -> &'static [&'static str] {
        &[
            "store",
            "temp-dir",
            "catalog",
            "max-retries",
            "retry-delay-ms",
            "max-artifact-size",
            "fetch-timeout",
            "check-timeout",
            "proxy",
        ]
    }

    /// Build the configuration. `config_file` replaces the default
    /// `~/.config/formulary/config.toml`; an explicit file must exist.
    pub fn build(config_file: Option<&Path>, use_environment: bool) -> Result<Self, ConfigError> {
        Self::build_with(&ConfigLoader::new(use_environment), config_file)
    }

    pub fn build_with(loader: &ConfigLoader, config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::defaults(loader);

        // 1. Config file
        let path = match config_file {
            Some(path) => {
                if !path.is_file() {
                    return Err(ConfigError::Config(format!("Config file not found: {}", path.display())));
                }
                path.to_path_buf()
            }
            None => loader.default_config_file(),
        };
        if let Some(table) = loader.load_config_file(&path)? {
            log::debug!("Loading configuration from {}", path.display());
            let file: FileConfig = toml::Value::Table(table).try_into().map_err(|e: toml::de::Error| {
                ConfigError::Parse {
                    source_name: path.display().to_string(),
                    reason: e.to_string(),
                }
            })?;
            config.merge_file(file, ConfigSource::File(path));
        }

        // 2. Environment overrides
        config.apply_env_overrides(loader)?;

        config.validate()?;
        Ok(config)
    }

    fn merge_file(&mut self, file: FileConfig, source: ConfigSource) {
        if let Some(store) = file.store {
            self.store = expand_path(&store);
            self.mark("store", source.clone());
        }
        if let Some(temp_dir) = file.temp_dir {
            self.temp_dir = expand_path(&temp_dir);
            self.mark("temp-dir", source.clone());
        }
        if let Some(catalog) = file.catalog {
            self.catalog = expand_path(&catalog);
            self.mark("catalog", source.clone());
        }
        if let Some(max_retries) = file.max_retries {
            self.max_retries = max_retries;
            self.mark("max-retries", source.clone());
        }
        if let Some(retry_delay_ms) = file.retry_delay_ms {
            self.retry_delay_ms = retry_delay_ms;
            self.mark("retry-delay-ms", source.clone());
        }
        if let Some(max_artifact_size) = file.max_artifact_size {
            self.max_artifact_size = max_artifact_size;
            self.mark("max-artifact-size", source.clone());
        }
        if let Some(fetch_timeout) = file.fetch_timeout {
            self.fetch_timeout = fetch_timeout;
            self.mark("fetch-timeout", source.clone());
        }
        if let Some(check_timeout) = file.check_timeout {
            self.check_timeout = check_timeout;
            self.mark("check-timeout", source.clone());
        }
        if let Some(proxy) = file.proxy {
            self.proxy = Some(proxy);
            self.mark("proxy", source);
        }
    }

    fn apply_env_overrides(&mut self, loader: &ConfigLoader) -> Result<(), ConfigError> {
        let env_source = |key: &str| ConfigSource::Environment(ConfigLoader::env_var_name(key));

        if let Some(store) = loader.get_env_path("store") {
            self.store = store;
            self.mark("store", env_source("store"));
        }
        if let Some(temp_dir) = loader.get_env_path("temp-dir") {
            self.temp_dir = temp_dir;
            self.mark("temp-dir", env_source("temp-dir"));
        }
        if let Some(catalog) = loader.get_env_path("catalog") {
            self.catalog = catalog;
            self.mark("catalog", env_source("catalog"));
        }
        if let Some(max_retries) = loader.get_env_u64("max-retries")? {
            self.max_retries = u32::try_from(max_retries)
                .map_err(|_| ConfigError::Config(format!("FORMULARY_MAX_RETRIES is too large: {}", max_retries)))?;
            self.mark("max-retries", env_source("max-retries"));
        }
        if let Some(max_artifact_size) = loader.get_env_u64("max-artifact-size")? {
            self.max_artifact_size = max_artifact_size;
            self.mark("max-artifact-size", env_source("max-artifact-size"));
        }
        if let Some(fetch_timeout) = loader.get_env_u64("fetch-timeout")? {
            self.fetch_timeout = fetch_timeout;
            self.mark("fetch-timeout", env_source("fetch-timeout"));
        }
        if let Some(check_timeout) = loader.get_env_u64("check-timeout")? {
            self.check_timeout = check_timeout;
            self.mark("check-timeout", env_source("check-timeout"));
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_artifact_size == 0 {
            return Err(ConfigError::InvalidField {
                field: "max-artifact-size",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.fetch_timeout == 0 || self.check_timeout == 0 {
            return Err(ConfigError::InvalidField {
                field: if self.fetch_timeout == 0 { "fetch-timeout" } else { "check-timeout" },
                message: "must be at least one second".to_string(),
            });
        }
        Ok(())
    }

    fn mark(&mut self, key: &str, source: ConfigSource) {
        self.sources.insert(key.to_string(), source);
    }

    /// Override the store root, e.g. from `--store`.
    pub fn set_store(&mut self, store: impl Into<PathBuf>) {
        self.store = store.into();
        self.mark("store", ConfigSource::Command);
    }

    /// Override the catalog directory, e.g. from `--catalog`.
    pub fn set_catalog(&mut self, catalog: impl Into<PathBuf>) {
        self.catalog = catalog.into();
        self.mark("catalog", ConfigSource::Command);
    }

    pub fn get_source(&self, key: &str) -> Option<&ConfigSource> {
        self.sources.get(key)
    }

    pub fn http_config(&self) -> HttpClientConfig {
        let mut http = HttpClientConfig::new()
            .with_max_retries(self.max_retries)
            .with_retry_delay(Duration::from_millis(self.retry_delay_ms));
        if let Some(proxy) = &self.proxy {
            http = http.with_proxy(proxy.clone());
        }
        http
    }

    pub fn to_runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            store_root: self.store.clone(),
            temp_root: self.temp_dir.clone(),
            max_artifact_size: self.max_artifact_size,
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
            check_timeout: Duration::from_secs(self.check_timeout),
            http: self.http_config(),
        }
    }
}
