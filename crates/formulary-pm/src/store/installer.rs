//! Transactional placement of verified artifacts into the store.
//!
//! Layout:
//!
//! ```text
//! <root>/<name>/<version>/...                 installed prefix
//! <root>/<name>/<version>/INSTALL_RECEIPT.json
//! <root>/.staging/<name>-<version>-XXXXXX/    in-flight installs
//! <root>/.locks/<name>@<version>.lock         cross-process install locks
//! ```
//!
//! An install is assembled in a staging directory and renamed into place in
//! one step, so the versioned path is either absent or complete.

use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use super::locks::{FileLock, StoreLock, StoreLocks};
use super::record::{InstallRecord, RECEIPT_FILE};
use crate::downloader::{ArchiveExtractor, FetchedArtifact};
use crate::error::InstallError;
use crate::formula::{validate_key, Formula, InstallStep};

const STAGING_DIR: &str = ".staging";
const LOCKS_DIR: &str = ".locks";

pub struct StoreInstaller {
    root: PathBuf,
    locks: StoreLocks,
}

impl StoreInstaller {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: StoreLocks::new(),
        }
    }

    /// Share install locks with other installers on the same store.
    pub fn with_locks(mut self, locks: StoreLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn locks(&self) -> &StoreLocks {
        &self.locks
    }

    /// Final install path of `name` at `version`.
    pub fn version_path(&self, name: &str, version: &str) -> Result<PathBuf, InstallError> {
        validate_key(name, version)?;
        Ok(self.root.join(name).join(version))
    }

    /// Take the install lock for `name@version`: first against other tasks
    /// sharing these locks, then against other processes using this store.
    pub async fn lock(&self, name: &str, version: &str) -> Result<StoreLock, InstallError> {
        validate_key(name, version)?;
        let lock = self.locks.acquire(name, version).await;
        let path = self.root.join(LOCKS_DIR).join(format!("{}.lock", lock.key()));
        let file = FileLock::acquire(&path).await?;
        Ok(lock.with_file_lock(file))
    }

    fn staging_root(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    /// Unpack `artifact`, run the formula's steps and move the result to its
    /// versioned path. Returns that path.
    ///
    /// On failure nothing is left under the versioned path. Never overwrites an
    /// existing version.
    pub async fn install(&self, formula: &Formula, artifact: &FetchedArtifact) -> Result<PathBuf, InstallError> {
        let final_path = self.version_path(formula.name(), formula.version())?;
        let staging_root = self.staging_root();
        let prefix = format!("{}-{}-", formula.name(), formula.version());
        let steps = formula.install_steps().to_vec();
        let artifact_path = artifact.path().to_path_buf();
        let file_name = artifact.file_name().to_string();

        let target = final_path.clone();
        tokio::task::spawn_blocking(move || -> Result<(), InstallError> {
            fs::create_dir_all(&staging_root)?;
            let staging = tempfile::Builder::new().prefix(&prefix).tempdir_in(&staging_root)?;
            log::debug!("Staging install in {}", staging.path().display());

            let content_root = ArchiveExtractor::unpack(&artifact_path, &file_name, &staging.path().join("src"))?;
            let prefix_dir = staging.path().join("prefix");
            fs::create_dir_all(&prefix_dir)?;

            for (index, step) in steps.iter().enumerate() {
                log::debug!("Step {}: {:?}", index + 1, step);
                apply_step(step, &content_root, &prefix_dir).map_err(|reason| InstallError::Step {
                    index: index + 1,
                    action: step.action(),
                    reason,
                })?;
            }

            commit(&prefix_dir, &target)
            // `staging` drops here and removes everything left in it
        })
        .await
        .map_err(|e| InstallError::Io(std::io::Error::other(e)))??;

        log::info!("Installed {} into {}", formula.key(), final_path.display());
        Ok(final_path)
    }

    /// Remove an installed version. Returns whether anything was removed.
    ///
    /// The directory is first renamed into staging so it vanishes from its
    /// versioned path in one step.
    pub async fn remove(&self, name: &str, version: &str) -> Result<bool, InstallError> {
        let path = self.version_path(name, version)?;
        let staging_root = self.staging_root();
        let prefix = format!("{}-{}-removed-", name, version);

        let removed = tokio::task::spawn_blocking(move || -> Result<bool, InstallError> {
            if fs::symlink_metadata(&path).is_err() {
                return Ok(false);
            }

            fs::create_dir_all(&staging_root)?;
            let trash = tempfile::Builder::new().prefix(&prefix).tempdir_in(&staging_root)?;
            fs::rename(&path, trash.path().join("prefix"))?;
            trash.close()?;

            // Drop the per-formula directory once its last version is gone.
            if let Some(parent) = path.parent() {
                let _ = fs::remove_dir(parent);
            }
            Ok(true)
        })
        .await
        .map_err(|e| InstallError::Io(std::io::Error::other(e)))??;

        if removed {
            log::info!("Removed {}@{}", name, version);
        }
        Ok(removed)
    }

    /// The receipt for an installed version, if any.
    pub async fn record(&self, name: &str, version: &str) -> Result<Option<InstallRecord>, InstallError> {
        let path = self.version_path(name, version)?;
        tokio::task::spawn_blocking(move || InstallRecord::read(&path))
            .await
            .map_err(|e| InstallError::Io(std::io::Error::other(e)))?
    }

    pub async fn write_record(&self, record: &InstallRecord) -> Result<(), InstallError> {
        let record = record.clone();
        tokio::task::spawn_blocking(move || record.write())
            .await
            .map_err(|e| InstallError::Io(std::io::Error::other(e)))?
    }

    /// Every installed version with a readable receipt, sorted by name then version.
    pub fn list(&self) -> Result<Vec<InstallRecord>, InstallError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }

        let mut records = Vec::new();
        let walker = WalkDir::new(&self.root)
            .max_depth(3)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() != 1 || (entry.file_name() != STAGING_DIR && entry.file_name() != LOCKS_DIR)
            });

        for entry in walker {
            let entry = entry.map_err(|e| InstallError::Io(e.into()))?;
            if entry.depth() != 3 || entry.file_name() != RECEIPT_FILE {
                continue;
            }
            let Some(install_dir) = entry.path().parent() else { continue };
            match InstallRecord::read(install_dir) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => log::warn!("Skipping {}: {}", install_dir.display(), e),
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| compare_versions(&a.version, &b.version)));
        Ok(records)
    }

    /// Installed versions of one formula.
    pub fn versions(&self, name: &str) -> Result<Vec<InstallRecord>, InstallError> {
        Ok(self.list()?.into_iter().filter(|r| r.name == name).collect())
    }
}

/// Semantic version order: numeric components compare as numbers and a
/// pre-release sorts before its release.
fn compare_versions(a: &str, b: &str) -> Ordering {
    fn split(version: &str) -> (Vec<u64>, Option<&str>) {
        let version = version.split('+').next().unwrap_or(version);
        let (core, pre) = match version.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (version, None),
        };
        let numbers = core.split('.').map(|part| part.parse().unwrap_or(0)).collect();
        (numbers, pre)
    }

    let (a_core, a_pre) = split(a);
    let (b_core, b_pre) = split(b);
    a_core
        .cmp(&b_core)
        .then_with(|| match (a_pre, b_pre) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => a.cmp(b),
        })
        .then_with(|| a.cmp(b))
}

/// Rename the assembled prefix into place. Losing a race to another process
/// surfaces as `AlreadyExists`.
fn commit(prefix_dir: &Path, target: &Path) -> Result<(), InstallError> {
    if target.exists() {
        return Err(InstallError::AlreadyExists {
            path: target.to_path_buf(),
        });
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    match fs::rename(prefix_dir, target) {
        Ok(()) => Ok(()),
        Err(_) if target.exists() => Err(InstallError::AlreadyExists {
            path: target.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}

fn apply_step(step: &InstallStep, content_root: &Path, prefix: &Path) -> Result<(), String> {
    match step {
        InstallStep::Bin { source, name } => {
            let from = resolve_source(content_root, source)?;
            if !from.is_file() {
                return Err(format!("{} is not a file in the artifact", source.display()));
            }
            let file_name = match name {
                Some(name) => name.clone(),
                None => from
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .ok_or_else(|| format!("{} has no file name", source.display()))?,
            };
            let to = prefix.join("bin").join(file_name);
            copy_file(&from, &to)?;
            make_executable(&to)
        }
        InstallStep::Place { source, destination, executable } => {
            let from = resolve_source(content_root, source)?;
            let to = prefix.join(destination);
            if from.is_dir() {
                copy_dir(&from, &to)?;
            } else if from.is_file() {
                copy_file(&from, &to)?;
                if *executable {
                    make_executable(&to)?;
                }
            } else {
                return Err(format!("{} is not a file or directory", source.display()));
            }
            Ok(())
        }
        InstallStep::Mkdir { path } => fs::create_dir_all(prefix.join(path)).map_err(|e| e.to_string()),
        InstallStep::Symlink { target, link } => {
            let link_path = prefix.join(link);
            if let Some(parent) = link_path.parent() {
                fs::create_dir_all(parent).map_err(|e| e.to_string())?;
            }
            create_symlink(target, &link_path)
        }
    }
}

/// Resolve `source` against the unpacked artifact, following symlinks. The
/// result must still lie inside the artifact.
fn resolve_source(content_root: &Path, source: &Path) -> Result<PathBuf, String> {
    let root = content_root.canonicalize().map_err(|e| e.to_string())?;
    let from = content_root
        .join(source)
        .canonicalize()
        .map_err(|_| format!("{} does not exist in the artifact", source.display()))?;
    if !from.starts_with(&root) {
        return Err(format!("{} points outside the artifact", source.display()));
    }
    Ok(from)
}

fn copy_file(from: &Path, to: &Path) -> Result<(), String> {
    if to.exists() {
        return Err(format!("{} is placed twice", to.display()));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| format!("copy {} failed: {}", from.display(), e))
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), String> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(|e| e.to_string())?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| e.to_string())?;
        let dest = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest).map_err(|e| e.to_string())?;
        } else if entry.file_type().is_symlink() {
            let target = fs::read_link(entry.path()).map_err(|e| e.to_string())?;
            let escapes = target.is_absolute()
                || entry
                    .path()
                    .canonicalize()
                    .map_or(true, |resolved| !resolved.starts_with(from));
            if escapes {
                return Err(format!(
                    "symlink {} -> {} points outside the artifact",
                    relative.display(),
                    target.display()
                ));
            }
            create_symlink(&target, &dest)?;
        } else {
            copy_file(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), String> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(path).map_err(|e| e.to_string())?;
    let mut perms = metadata.permissions();
    perms.set_mode(perms.mode() | 0o755);
    fs::set_permissions(path, perms).map_err(|e| e.to_string())
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), String> {
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> Result<(), String> {
    std::os::unix::fs::symlink(target, link).map_err(|e| format!("symlink {} failed: {}", link.display(), e))
}

#[cfg(not(unix))]
fn create_symlink(_target: &Path, link: &Path) -> Result<(), String> {
    Err(format!("symlinks are not supported on this platform: {}", link.display()))
}
