//! Artifact retrieval, integrity verification and unpacking.
//!
//! Fetched artifacts live in a private temp directory until they have been
//! verified; only the store installer moves content into the store.

mod archive;
mod checksum;
mod fetcher;

pub use archive::{ArchiveExtractor, ArchiveType};
pub use checksum::{compute_digest, compute_file_digest, IntegrityVerifier};
pub use fetcher::{ArtifactFetcher, FetchedArtifact, DEFAULT_MAX_ARTIFACT_SIZE};
