use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::formula::DigestError;

/// Pipeline stage an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Loading,
    Fetching,
    Verifying,
    Installing,
    Checking,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Loading => "loading",
            Stage::Fetching => "fetching",
            Stage::Verifying => "verifying",
            Stage::Installing => "installing",
            Stage::Checking => "checking",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed formula or tool configuration. Raised before any network activity.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    #[error("Invalid field `{field}`: {message}")]
    InvalidField { field: &'static str, message: String },

    #[error("Invalid digest: {0}")]
    Digest(#[from] DigestError),

    #[error("Formula not found: {name} (searched {catalog})")]
    FormulaNotFound { name: String, catalog: PathBuf },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure retrieving an artifact.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error fetching {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    #[error("Artifact not found: {url}")]
    NotFound { url: String },

    #[error("HTTP {status}: {url}")]
    Http { status: u16, url: String },

    #[error("Artifact at {url} exceeds the size limit of {limit} bytes")]
    SizeLimitExceeded { url: String, limit: u64 },

    #[error("Unsupported URL: {url}")]
    UnsupportedUrl { url: String },

    #[error("Max retries exceeded for {url}")]
    MaxRetries { url: String },

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { .. } | FetchError::Timeout { .. } => true,
            FetchError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    pub(crate) fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("{algorithm} digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        algorithm: &'static str,
        expected: String,
        actual: String,
    },

    #[error("IO error while hashing: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Failed to unpack artifact: {0}")]
    Archive(String),

    #[error("Install step {index} ({action}) failed: {reason}")]
    Step {
        index: usize,
        action: &'static str,
        reason: String,
    },

    #[error("Install path already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("{name} {version} is already installed with digest {installed}, formula expects {expected}")]
    Conflict {
        name: String,
        version: String,
        installed: String,
        expected: String,
    },

    #[error("Invalid store key: {0}")]
    InvalidKey(#[from] ConfigError),

    #[error("Invalid install record {}: {reason}", path.display())]
    Record { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("Test command is empty")]
    EmptyCommand,

    #[error("Test program {} does not exist inside the install path", program.display())]
    ProgramOutsidePrefix { program: PathBuf },

    #[error("Failed to run {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("Test command timed out after {0:?}")]
    Timeout(Duration),

    #[error("Test command cancelled")]
    Cancelled,

    #[error("Expected output to contain {expected:?}, got: {output}")]
    ExpectationFailed { expected: String, output: String },
}

/// A failed install, tagged with the stage it failed in.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("[loading] {0}")]
    Config(#[from] ConfigError),

    #[error("[fetching] {0}")]
    Fetch(#[from] FetchError),

    #[error("[verifying] {0}")]
    Verify(#[from] VerifyError),

    #[error("[installing] {0}")]
    Install(#[from] InstallError),

    #[error("[checking] {0}")]
    Check(#[from] CheckError),

    #[error("[{stage}] install cancelled")]
    Cancelled { stage: Stage },
}

impl RunError {
    pub fn stage(&self) -> Stage {
        match self {
            RunError::Config(_) | RunError::Install(InstallError::InvalidKey(_)) => Stage::Loading,
            RunError::Fetch(_) => Stage::Fetching,
            RunError::Verify(_) => Stage::Verifying,
            RunError::Install(_) => Stage::Installing,
            RunError::Check(_) => Stage::Checking,
            RunError::Cancelled { stage } => *stage,
        }
    }

    /// Process exit code for the CLI. Each failure class gets its own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) | RunError::Install(InstallError::InvalidKey(_)) => 2,
            RunError::Fetch(_) => 3,
            RunError::Verify(_) => 4,
            RunError::Install(_) => 5,
            RunError::Check(_) => 6,
            RunError::Cancelled { .. } => 130,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled { .. })
    }
}

pub type Result<T> = std::result::Result<T, RunError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let url = "https://example.com/a.tar.gz".to_string();
        assert!(FetchError::Network { url: url.clone(), reason: "reset".into() }.is_retryable());
        assert!(FetchError::Timeout { url: url.clone() }.is_retryable());
        assert!(FetchError::Http { status: 503, url: url.clone() }.is_retryable());
        assert!(FetchError::Http { status: 429, url: url.clone() }.is_retryable());
        assert!(!FetchError::Http { status: 403, url: url.clone() }.is_retryable());
        assert!(!FetchError::NotFound { url: url.clone() }.is_retryable());
        assert!(!FetchError::SizeLimitExceeded { url, limit: 10 }.is_retryable());
        assert!(!FetchError::Cancelled.is_retryable());
    }

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = vec![
            RunError::Config(ConfigError::Config("bad".into())),
            RunError::Fetch(FetchError::Cancelled),
            RunError::Verify(VerifyError::DigestMismatch {
                algorithm: "sha256",
                expected: "aa".into(),
                actual: "bb".into(),
            }),
            RunError::Install(InstallError::Archive("bad".into())),
            RunError::Check(CheckError::EmptyCommand),
            RunError::Cancelled { stage: Stage::Fetching },
        ];

        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        assert!(codes.iter().all(|c| *c != 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_invalid_store_key_is_a_config_failure() {
        let err = RunError::Install(InstallError::InvalidKey(ConfigError::InvalidField {
            field: "name",
            message: "bad".into(),
        }));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(err.stage(), Stage::Loading);
    }

    #[test]
    fn test_message_is_stage_tagged() {
        let err = RunError::Verify(VerifyError::DigestMismatch {
            algorithm: "sha256",
            expected: "aa".into(),
            actual: "bb".into(),
        });
        assert_eq!(err.stage(), Stage::Verifying);
        assert!(err.to_string().starts_with("[verifying]"));
    }
}
