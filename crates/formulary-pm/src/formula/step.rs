//! Declarative install steps and the post-install test command.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One action executed against the staged artifact, in order.
///
/// Source paths are relative to the unpacked artifact, destination paths are
/// relative to the install prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InstallStep {
    /// Place an executable under `bin/`, optionally renamed.
    Bin {
        source: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Place a file or directory at an arbitrary destination.
    Place {
        source: PathBuf,
        destination: PathBuf,
        #[serde(default)]
        executable: bool,
    },
    Mkdir { path: PathBuf },
    /// Create `link` pointing at `target`; the target is stored as written.
    Symlink { target: PathBuf, link: PathBuf },
}

impl InstallStep {
    pub fn action(&self) -> &'static str {
        match self {
            InstallStep::Bin { .. } => "bin",
            InstallStep::Place { .. } => "place",
            InstallStep::Mkdir { .. } => "mkdir",
            InstallStep::Symlink { .. } => "symlink",
        }
    }

    /// Reject paths that could escape the staging or install directories.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            InstallStep::Bin { source, name } => {
                ensure_relative("install.source", source)?;
                if let Some(name) = name {
                    let as_path = Path::new(name);
                    if name.is_empty() || as_path.components().count() != 1 || name == ".." || name == "." {
                        return Err(ConfigError::InvalidField {
                            field: "install.name",
                            message: format!("{:?} must be a plain file name", name),
                        });
                    }
                }
                Ok(())
            }
            InstallStep::Place { source, destination, .. } => {
                ensure_relative("install.source", source)?;
                ensure_relative("install.destination", destination)
            }
            InstallStep::Mkdir { path } => ensure_relative("install.path", path),
            InstallStep::Symlink { target, link } => {
                ensure_relative("install.link", link)?;
                // The target resolves relative to the link's directory, so
                // `..` is allowed as long as it stays inside the prefix.
                if target.is_absolute() {
                    return Err(ConfigError::InvalidField {
                        field: "install.target",
                        message: format!("{} must be relative", target.display()),
                    });
                }
                let link_depth = link.components().count().saturating_sub(1) as isize;
                let mut depth = link_depth;
                for component in target.components() {
                    match component {
                        Component::ParentDir => depth -= 1,
                        Component::Normal(_) => depth += 1,
                        _ => {}
                    }
                    if depth < 0 {
                        return Err(ConfigError::InvalidField {
                            field: "install.target",
                            message: format!("{} escapes the install prefix", target.display()),
                        });
                    }
                }
                Ok(())
            }
        }
    }
}

fn ensure_relative(field: &'static str, path: &Path) -> Result<(), ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::InvalidField {
            field,
            message: "path is empty".to_string(),
        });
    }

    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ConfigError::InvalidField {
            field,
            message: format!("{} must be a relative path without `..`", path.display()),
        });
    }

    Ok(())
}

/// Smoke test run against the installed prefix.
///
/// Every argument is a template: `${prefix}` expands to the install path and
/// `${bin}` to its `bin/` directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestCommand {
    pub command: Vec<String>,
    #[serde(alias = "expected", alias = "expect_output")]
    pub expect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl TestCommand {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(ConfigError::InvalidField {
                field: "test.command",
                message: "command must name a program".to_string(),
            });
        }
        if self.expect.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "test.expect",
                message: "expected output must not be empty".to_string(),
            });
        }
        Ok(())
    }
}
