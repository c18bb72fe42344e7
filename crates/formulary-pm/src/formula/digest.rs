//! Expected artifact digests.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Values formula authors leave behind instead of a real checksum.
const PLACEHOLDERS: &[&str] = &["todo", "fixme", "placeholder", "changeme", "xxx", "none", "skip"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("digest is empty")]
    Empty,

    #[error("digest {0:?} is a placeholder, not a checksum")]
    Placeholder(String),

    #[error("{algorithm} digest must be {expected} hex characters, got {found}")]
    WrongLength {
        algorithm: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("digest {0:?} is not hexadecimal")]
    NotHex(String),

    #[error("unsupported digest algorithm {0:?}")]
    UnknownAlgorithm(String),
}

/// Hash algorithm a formula digest is computed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    /// Length of the hex encoding of a digest.
    pub fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha512 => 128,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Sha512 => "sha512",
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(DigestAlgorithm::Sha256),
            "sha512" => Ok(DigestAlgorithm::Sha512),
            _ => Err(DigestError::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DigestAlgorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// A well-formed expected digest. Constructing one is the only way past
/// formula validation, so an install can never start without a real checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    hex: String,
}

impl Digest {
    pub fn parse(algorithm: DigestAlgorithm, raw: &str) -> Result<Self, DigestError> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(DigestError::Empty);
        }

        let lower = value.to_ascii_lowercase();
        if value.contains('<')
            || value.contains('>')
            || PLACEHOLDERS.contains(&lower.as_str())
            || lower.starts_with("fill-in")
        {
            return Err(DigestError::Placeholder(value.to_string()));
        }

        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::NotHex(value.to_string()));
        }

        if value.len() != algorithm.hex_len() {
            return Err(DigestError::WrongLength {
                algorithm: algorithm.as_str(),
                expected: algorithm.hex_len(),
                found: value.len(),
            });
        }

        // A zeroed digest is a template value no real content hashes to.
        if lower.chars().all(|c| c == '0') {
            return Err(DigestError::Placeholder(value.to_string()));
        }

        Ok(Self {
            algorithm,
            hex: lower,
        })
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Lowercase hex encoding.
    pub fn as_hex(&self) -> &str {
        &self.hex
    }

    /// Exact, case-insensitive comparison against a computed hex digest.
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(actual_hex)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex)
    }
}
