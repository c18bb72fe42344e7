use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use fs2::FileExt;
use tokio::sync::{Mutex, OwnedMutexGuard};

const FILE_LOCK_POLL: Duration = Duration::from_millis(50);

type Registry = Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>;

/// Per-(name, version) install locks.
///
/// Installs of the same key are serialized; different keys never contend.
/// Entries are dropped again once nobody holds or waits for them.
#[derive(Debug, Default, Clone)]
pub struct StoreLocks {
    locks: Registry,
}

/// Held for the duration of one install transaction.
#[derive(Debug)]
pub struct StoreLock {
    key: String,
    registry: Registry,
    file: Option<FileLock>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl StoreLock {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Also hold `file` until this lock is released.
    pub(crate) fn with_file_lock(mut self, file: FileLock) -> Self {
        self.file = Some(file);
        self
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        self.file.take();
        self.guard.take();

        let mut locks = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        // only the registry itself still refers to the mutex
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

impl StoreLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn held(&self, key: String, guard: OwnedMutexGuard<()>) -> StoreLock {
        StoreLock {
            key,
            registry: self.locks.clone(),
            file: None,
            guard: Some(guard),
        }
    }

    /// Wait until no other install of `name@version` in this process is running.
    pub async fn acquire(&self, name: &str, version: &str) -> StoreLock {
        let key = format!("{}@{}", name, version);
        let lock = self.entry(&key);

        let guard = match lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                log::info!("Waiting for another install of {} to finish", key);
                lock.lock_owned().await
            }
        };

        self.held(key, guard)
    }

    /// Take the lock only if it is free.
    pub fn try_acquire(&self, name: &str, version: &str) -> Option<StoreLock> {
        let key = format!("{}@{}", name, version);
        let lock = self.entry(&key);
        let guard = lock.try_lock_owned().ok()?;
        Some(self.held(key, guard))
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap().len()
    }
}

/// Exclusive advisory lock on a file, shared with other processes.
///
/// The lock file itself is never deleted; removing it while another process
/// waits on it would let two holders in.
#[derive(Debug)]
pub(crate) struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    pub(crate) fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).truncate(false).write(true).open(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Poll until the lock is free. Dropping the future stops waiting.
    pub(crate) async fn acquire(path: &Path) -> io::Result<Self> {
        let mut logged = false;
        loop {
            let attempt = {
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || Self::try_acquire(&path))
                    .await
                    .map_err(io::Error::other)??
            };
            if let Some(lock) = attempt {
                return Ok(lock);
            }
            if !logged {
                log::info!("Waiting for another process holding {}", path.display());
                logged = true;
            }
            tokio::time::sleep(FILE_LOCK_POLL).await;
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            log::warn!("Failed to unlock {}: {}", self.path.display(), e);
        }
    }
}
