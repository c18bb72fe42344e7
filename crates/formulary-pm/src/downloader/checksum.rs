//! Checksum verification for downloaded artifacts.

use std::path::Path;

use sha2::{Digest as _, Sha256, Sha512};
use tokio::io::AsyncReadExt;

use crate::error::VerifyError;
use crate::formula::{Digest, DigestAlgorithm};

/// Hex digest of an in-memory buffer.
pub fn compute_digest(algorithm: DigestAlgorithm, bytes: &[u8]) -> String {
    match algorithm {
        DigestAlgorithm::Sha256 => format!("{:x}", Sha256::digest(bytes)),
        DigestAlgorithm::Sha512 => format!("{:x}", Sha512::digest(bytes)),
    }
}

/// Hex digest of a file, read in chunks.
pub async fn compute_file_digest(algorithm: DigestAlgorithm, path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut buffer = vec![0u8; 64 * 1024];

    match algorithm {
        DigestAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let read = file.read(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
        DigestAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            loop {
                let read = file.read(&mut buffer).await?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[..read]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}

/// Compares fetched content against a formula's expected digest.
///
/// A mismatch is always an error; there is no warn-and-continue mode.
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    pub fn verify(bytes: &[u8], expected: &Digest) -> Result<(), VerifyError> {
        let actual = compute_digest(expected.algorithm(), bytes);
        Self::compare(expected, actual)
    }

    /// Returns the computed hex digest on success.
    pub async fn verify_file(path: &Path, expected: &Digest) -> Result<String, VerifyError> {
        let actual = compute_file_digest(expected.algorithm(), path).await?;
        Self::compare(expected, actual.clone())?;
        Ok(actual)
    }

    fn compare(expected: &Digest, actual: String) -> Result<(), VerifyError> {
        if expected.matches(&actual) {
            log::debug!("{} digest verified: {}", expected.algorithm(), actual);
            Ok(())
        } else {
            Err(VerifyError::DigestMismatch {
                algorithm: expected.algorithm().as_str(),
                expected: expected.as_hex().to_string(),
                actual,
            })
        }
    }
}
