//! The install pipeline for a single formula.
//!
//! ```text
//! Loaded -> Fetching -> Verifying -> Installing -> Checking -> Completed
//!    \__________\___________\____________\____________\-----> Failed(stage, reason)
//! ```
//!
//! Each run holds the `name@version` lock for its whole duration, both within
//! this process and against other processes sharing the store. A failure
//! after the version directory was created removes it again, and the install
//! receipt is written last, so a receipt always describes a checked install.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::checker::{PostInstallChecker, DEFAULT_CHECK_TIMEOUT};
use crate::downloader::{ArtifactFetcher, IntegrityVerifier, DEFAULT_MAX_ARTIFACT_SIZE};
use crate::error::{CheckError, ConfigError, FetchError, InstallError, Result, RunError, Stage};
use crate::formula::Formula;
use crate::http::{HttpClient, HttpClientConfig, ProgressCallback};
use crate::store::{InstallRecord, StoreInstaller, StoreLocks};

/// Where a run currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallState {
    Loaded,
    Fetching,
    Verifying,
    Installing,
    Checking,
    Completed,
    Failed { stage: Stage, reason: String },
}

impl InstallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstallState::Completed | InstallState::Failed { .. })
    }
}

/// Called on every state transition.
pub type StateObserver = Arc<dyn Fn(&Formula, &InstallState) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Fetched, verified, installed and checked by this run.
    Installed(InstallRecord),
    /// The same name, version and digest was already in the store.
    AlreadyInstalled(InstallRecord),
}

impl InstallOutcome {
    pub fn record(&self) -> &InstallRecord {
        match self {
            InstallOutcome::Installed(record) | InstallOutcome::AlreadyInstalled(record) => record,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, InstallOutcome::Installed(_))
    }
}

/// Everything a runner needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub store_root: PathBuf,
    /// Downloads land here until verified.
    pub temp_root: PathBuf,
    pub max_artifact_size: u64,
    pub fetch_timeout: Duration,
    pub check_timeout: Duration,
    pub http: HttpClientConfig,
}

impl RunnerConfig {
    pub fn new(store_root: impl Into<PathBuf>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            store_root: store_root.into(),
            temp_root: temp_root.into(),
            max_artifact_size: DEFAULT_MAX_ARTIFACT_SIZE,
            fetch_timeout: Duration::from_secs(600),
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            http: HttpClientConfig::default(),
        }
    }
}

pub struct FormulaRunner {
    fetcher: ArtifactFetcher,
    store: StoreInstaller,
    checker: PostInstallChecker,
    observer: Option<StateObserver>,
    progress: Option<ProgressCallback>,
}

impl FormulaRunner {
    pub fn new(config: RunnerConfig) -> std::result::Result<Self, ConfigError> {
        let http_client = HttpClient::with_config(config.http)
            .map_err(|e| ConfigError::Config(format!("Failed to create HTTP client: {}", e)))?;

        let fetcher = ArtifactFetcher::new(Arc::new(http_client), config.temp_root)
            .with_max_artifact_size(config.max_artifact_size)
            .with_timeout(config.fetch_timeout);

        Ok(Self {
            fetcher,
            store: StoreInstaller::new(config.store_root),
            checker: PostInstallChecker::new().with_timeout(config.check_timeout),
            observer: None,
            progress: None,
        })
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Receives `(downloaded, total)` while fetching.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Serialize against runners that share these locks.
    pub fn with_locks(mut self, locks: StoreLocks) -> Self {
        self.store = self.store.with_locks(locks);
        self
    }

    pub fn store(&self) -> &StoreInstaller {
        &self.store
    }

    /// Install `formula`, or return the existing record if it is already installed.
    pub async fn run(&self, formula: &Formula, cancel: &CancellationToken) -> Result<InstallOutcome> {
        self.notify(formula, &InstallState::Loaded);

        let result = self.run_locked(formula, cancel).await;
        match &result {
            Ok(_) => self.notify(formula, &InstallState::Completed),
            Err(e) => {
                log::error!("Install of {} failed: {}", formula.key(), e);
                self.notify(
                    formula,
                    &InstallState::Failed {
                        stage: e.stage(),
                        reason: e.to_string(),
                    },
                );
            }
        }
        result
    }

    async fn run_locked(&self, formula: &Formula, cancel: &CancellationToken) -> Result<InstallOutcome> {
        let _lock = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RunError::Cancelled { stage: Stage::Loading }),
            lock = self.store.lock(formula.name(), formula.version()) => lock?,
        };

        if let Some(record) = self.existing_install(formula).await? {
            log::info!("{} is already installed at {}", formula.key(), record.path.display());
            return Ok(InstallOutcome::AlreadyInstalled(record));
        }

        self.enter(formula, InstallState::Fetching, Stage::Fetching, cancel)?;
        let artifact = self
            .fetcher
            .fetch_with_progress(formula.url(), self.progress.clone(), cancel)
            .await
            .map_err(|e| match e {
                FetchError::Cancelled => RunError::Cancelled { stage: Stage::Fetching },
                e => e.into(),
            })?;

        self.enter(formula, InstallState::Verifying, Stage::Verifying, cancel)?;
        let actual = IntegrityVerifier::verify_file(artifact.path(), formula.digest()).await?;
        log::debug!("{} matches {}", formula.url(), actual);

        self.enter(formula, InstallState::Installing, Stage::Installing, cancel)?;
        let install_path = self.store.install(formula, &artifact).await?;
        drop(artifact);

        match self.check_and_record(formula, &install_path, cancel).await {
            Ok(record) => Ok(InstallOutcome::Installed(record)),
            Err(e) => {
                self.rollback(formula).await;
                Err(e)
            }
        }
    }

    async fn check_and_record(
        &self,
        formula: &Formula,
        install_path: &Path,
        cancel: &CancellationToken,
    ) -> Result<InstallRecord> {
        self.enter(formula, InstallState::Checking, Stage::Checking, cancel)?;
        let output = self
            .checker
            .check(install_path, formula.test_command(), cancel)
            .await
            .map_err(|e| match e {
                CheckError::Cancelled => RunError::Cancelled { stage: Stage::Checking },
                e => e.into(),
            })?;
        log::debug!("Test output for {}: {}", formula.key(), output.output.trim_end());

        let record = InstallRecord::new(formula, install_path, Utc::now());
        self.store.write_record(&record).await?;
        Ok(record)
    }

    /// A matching receipt means there is nothing to do. A version directory
    /// without a receipt is left over from an interrupted run and is removed.
    async fn existing_install(&self, formula: &Formula) -> Result<Option<InstallRecord>> {
        match self.store.record(formula.name(), formula.version()).await? {
            Some(record) if record.matches(formula) => Ok(Some(record)),
            Some(record) => Err(InstallError::Conflict {
                name: formula.name().to_string(),
                version: formula.version().to_string(),
                installed: record.digest,
                expected: formula.digest().as_hex().to_string(),
            }
            .into()),
            None => {
                let path = self.store.version_path(formula.name(), formula.version())?;
                if path.exists() {
                    log::warn!("Removing incomplete install at {}", path.display());
                    self.store.remove(formula.name(), formula.version()).await?;
                }
                Ok(None)
            }
        }
    }

    async fn rollback(&self, formula: &Formula) {
        match self.store.remove(formula.name(), formula.version()).await {
            Ok(_) => log::info!("Rolled back {}", formula.key()),
            Err(e) => log::error!("Failed to roll back {}: {}", formula.key(), e),
        }
    }

    fn enter(&self, formula: &Formula, state: InstallState, stage: Stage, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled { stage });
        }
        self.notify(formula, &state);
        Ok(())
    }

    fn notify(&self, formula: &Formula, state: &InstallState) {
        log::debug!("{}: {:?}", formula.key(), state);
        if let Some(observer) = &self.observer {
            observer(formula, state);
        }
    }
}
