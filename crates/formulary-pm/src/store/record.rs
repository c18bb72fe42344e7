use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InstallError;
use crate::formula::Formula;

/// Receipt file written into every installed version directory.
pub const RECEIPT_FILE: &str = "INSTALL_RECEIPT.json";

/// Persisted metadata for one completed install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRecord {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub digest: String,
    pub algorithm: String,
    pub source_url: String,
    pub installed_at: DateTime<Utc>,
}

impl InstallRecord {
    pub fn new(formula: &Formula, path: impl Into<PathBuf>, installed_at: DateTime<Utc>) -> Self {
        Self {
            name: formula.name().to_string(),
            version: formula.version().to_string(),
            path: path.into(),
            digest: formula.digest().as_hex().to_string(),
            algorithm: formula.digest().algorithm().as_str().to_string(),
            source_url: formula.url().to_string(),
            installed_at,
        }
    }

    /// Whether this record describes the same artifact a formula asks for.
    pub fn matches(&self, formula: &Formula) -> bool {
        self.name == formula.name()
            && self.version == formula.version()
            && self.algorithm == formula.digest().algorithm().as_str()
            && formula.digest().matches(&self.digest)
    }

    /// Read the receipt in an install directory, if there is one.
    pub fn read(install_dir: &Path) -> Result<Option<Self>, InstallError> {
        let path = install_dir.join(RECEIPT_FILE);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| InstallError::Record {
                path,
                reason: e.to_string(),
            })
    }

    /// Write the receipt into `self.path` atomically: the file appears
    /// complete or not at all.
    pub fn write(&self) -> Result<(), InstallError> {
        let json = serde_json::to_vec_pretty(self).map_err(|e| InstallError::Record {
            path: self.path.join(RECEIPT_FILE),
            reason: e.to_string(),
        })?;

        let mut temp = tempfile::Builder::new()
            .prefix(".receipt-")
            .tempfile_in(&self.path)?;
        temp.write_all(&json)?;
        temp.as_file().sync_all()?;
        temp.persist(self.path.join(RECEIPT_FILE))
            .map_err(|e| InstallError::Io(e.error))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn formula() -> Formula {
        Formula::from_json_str(
            r#"{
                "name": "macchanger",
                "url": "https://github.com/willcurtis/macchanger/archive/refs/tags/v1.0.0.tar.gz",
                "sha256": "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
                "version": "1.0.0",
                "install": [{"action": "bin", "source": "macchanger.sh", "name": "macchanger"}],
                "test": {"command": ["${bin}/macchanger", "--version"], "expect": "Version:"}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let record = InstallRecord::new(&formula(), dir.path(), Utc::now());

        record.write().unwrap();
        assert!(dir.path().join(RECEIPT_FILE).is_file());

        let read = InstallRecord::read(dir.path()).unwrap().unwrap();
        assert_eq!(read, record);
        assert!(read.matches(&formula()));

        // No temp files are left behind
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".receipt-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(InstallRecord::read(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_read_corrupt_is_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(RECEIPT_FILE), "{ not json").unwrap();
        assert!(matches!(
            InstallRecord::read(dir.path()),
            Err(InstallError::Record { .. })
        ));
    }

    #[test]
    fn test_matches_detects_other_digest() {
        let dir = TempDir::new().unwrap();
        let mut record = InstallRecord::new(&formula(), dir.path(), Utc::now());
        record.digest = "deadbeef".repeat(8);
        assert!(!record.matches(&formula()));
    }
}
