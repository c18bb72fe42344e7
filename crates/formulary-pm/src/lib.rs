pub mod checker;
pub mod config;
pub mod downloader;
pub mod error;
pub mod formula;
pub mod http;
pub mod runner;
pub mod store;

pub use checker::{CheckOutput, PostInstallChecker};
pub use config::Config;
pub use downloader::{ArtifactFetcher, FetchedArtifact, IntegrityVerifier};
pub use error::{
    CheckError, ConfigError, FetchError, InstallError, Result, RunError, Stage, VerifyError,
};
pub use formula::{Catalog, Digest, DigestAlgorithm, Formula, InstallStep, TestCommand};
pub use runner::{FormulaRunner, InstallOutcome, InstallState, RunnerConfig, StateObserver};
pub use store::{InstallRecord, StoreInstaller};

pub use tokio_util::sync::CancellationToken;
