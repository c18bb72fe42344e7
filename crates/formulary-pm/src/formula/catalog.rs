//! Formula lookup by name in a catalog directory.

use std::path::{Path, PathBuf};

use super::formula::Formula;
use crate::error::ConfigError;

const EXTENSIONS: &[&str] = &["json", "toml"];

/// A directory of `<name>.json` / `<name>.toml` formula files.
#[derive(Debug, Clone)]
pub struct Catalog {
    root: PathBuf,
}

impl Catalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the formula file for `name`, if the catalog has one.
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        EXTENSIONS
            .iter()
            .map(|ext| self.root.join(format!("{}.{}", name, ext)))
            .find(|path| path.is_file())
    }

    /// Resolve an argument that is either a formula file path or a catalog name.
    pub fn resolve(&self, name_or_path: &str) -> Result<Formula, ConfigError> {
        let as_path = Path::new(name_or_path);
        if as_path.is_file() {
            log::debug!("Loading formula from {}", as_path.display());
            return Formula::load(as_path);
        }

        match self.find(name_or_path) {
            Some(path) => {
                log::debug!("Loading formula {} from {}", name_or_path, path.display());
                Formula::load(&path)
            }
            None => Err(ConfigError::FormulaNotFound {
                name: name_or_path.to_string(),
                catalog: self.root.clone(),
            }),
        }
    }

    /// Names of every formula file in the catalog, sorted.
    pub fn names(&self) -> Result<Vec<String>, ConfigError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            let known = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| EXTENSIONS.contains(&ext))
                .unwrap_or(false);
            if known {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }
}
