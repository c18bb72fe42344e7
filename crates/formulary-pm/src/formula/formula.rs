use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use super::digest::{Digest, DigestAlgorithm};
use super::step::{InstallStep, TestCommand};
use crate::error::ConfigError;

fn name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9._+-]*$").unwrap())
}

fn version_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)(?:-[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?(?:\+[0-9A-Za-z-]+(?:\.[0-9A-Za-z-]+)*)?$").unwrap()
    })
}

/// Check that `name` and `version` are safe to use as store path components.
pub fn validate_key(name: &str, version: &str) -> Result<(), ConfigError> {
    if !name_regex().is_match(name) {
        return Err(ConfigError::InvalidField {
            field: "name",
            message: format!("{:?} must be lowercase alphanumerics, '.', '_', '+' or '-'", name),
        });
    }

    if !version_regex().is_match(version) {
        return Err(ConfigError::InvalidField {
            field: "version",
            message: format!("{:?} is not a semantic version", version),
        });
    }
    Ok(())
}

/// Formula file as written by its author, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormulaDefinition {
    pub name: String,
    #[serde(default, alias = "desc")]
    pub description: String,
    #[serde(default)]
    pub homepage: String,
    #[serde(alias = "source_url", alias = "sourceUrl")]
    pub url: String,
    #[serde(default, alias = "sha256", alias = "expected_digest", alias = "expectedDigest")]
    pub digest: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    pub version: String,
    #[serde(default, alias = "install_steps", alias = "installSteps")]
    pub install: Vec<InstallStep>,
    #[serde(alias = "test_command", alias = "testCommand")]
    pub test: TestCommand,
}

/// A validated formula. Immutable once loaded.
#[derive(Debug, Clone, Serialize)]
pub struct Formula {
    name: String,
    description: String,
    homepage: String,
    url: String,
    digest: Digest,
    version: String,
    install: Vec<InstallStep>,
    test: TestCommand,
}

impl Formula {
    /// Load a formula file. `.toml` files are parsed as TOML, everything else as JSON.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let source_name = path.display().to_string();

        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let definition: FormulaDefinition = if is_toml {
            toml::from_str(&contents).map_err(|e| ConfigError::Parse {
                source_name,
                reason: e.to_string(),
            })?
        } else {
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse {
                source_name,
                reason: e.to_string(),
            })?
        };

        Self::from_definition(definition)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let definition: FormulaDefinition =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse {
                source_name: "formula JSON".to_string(),
                reason: e.to_string(),
            })?;
        Self::from_definition(definition)
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let definition: FormulaDefinition = toml::from_str(source).map_err(|e| ConfigError::Parse {
            source_name: "formula TOML".to_string(),
            reason: e.to_string(),
        })?;
        Self::from_definition(definition)
    }

    /// Validate a definition. The digest is checked first so a placeholder
    /// checksum is reported even when other fields are also wrong.
    pub fn from_definition(definition: FormulaDefinition) -> Result<Self, ConfigError> {
        let algorithm = match definition.algorithm.as_deref() {
            Some(name) => name.parse()?,
            None => DigestAlgorithm::default(),
        };
        let digest = Digest::parse(algorithm, &definition.digest)?;

        validate_key(&definition.name, &definition.version)?;

        let url = Url::parse(&definition.url).map_err(|e| ConfigError::InvalidField {
            field: "url",
            message: format!("{:?}: {}", definition.url, e),
        })?;
        if !matches!(url.scheme(), "https" | "http" | "file") {
            return Err(ConfigError::InvalidField {
                field: "url",
                message: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        if definition.install.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "install",
                message: "at least one install step is required".to_string(),
            });
        }
        for step in &definition.install {
            step.validate()?;
        }

        definition.test.validate()?;

        Ok(Self {
            name: definition.name,
            description: definition.description,
            homepage: definition.homepage,
            url: definition.url,
            digest,
            version: definition.version,
            install: definition.install,
            test: definition.test,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn homepage(&self) -> &str {
        &self.homepage
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn digest(&self) -> &Digest {
        &self.digest
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn install_steps(&self) -> &[InstallStep] {
        &self.install
    }

    pub fn test_command(&self) -> &TestCommand {
        &self.test
    }

    /// `name@version`, the key installs are serialized on.
    pub fn key(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }
}
