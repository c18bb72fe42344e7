//! Artifact fetcher for `http(s)://` and `file://` sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::FetchError;
use crate::http::{HttpClient, ProgressCallback};

/// Default cap on artifact size: 256 MiB.
pub const DEFAULT_MAX_ARTIFACT_SIZE: u64 = 256 * 1024 * 1024;
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(600);

/// A downloaded, not-yet-verified artifact. The backing file is deleted on drop.
#[derive(Debug)]
pub struct FetchedArtifact {
    file: NamedTempFile,
    size: u64,
    file_name: String,
}

impl FetchedArtifact {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Last path segment of the source URL, used to detect the archive type.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Read the whole artifact into memory.
    pub async fn bytes(&self) -> std::io::Result<Vec<u8>> {
        tokio::fs::read(self.file.path()).await
    }
}

/// Downloads artifacts into a private temp directory, never into the store.
pub struct ArtifactFetcher {
    http_client: Arc<HttpClient>,
    temp_root: PathBuf,
    max_artifact_size: u64,
    timeout: Duration,
}

impl ArtifactFetcher {
    pub fn new(http_client: Arc<HttpClient>, temp_root: impl Into<PathBuf>) -> Self {
        Self {
            http_client,
            temp_root: temp_root.into(),
            max_artifact_size: DEFAULT_MAX_ARTIFACT_SIZE,
            timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    pub fn with_max_artifact_size(mut self, max_artifact_size: u64) -> Self {
        self.max_artifact_size = max_artifact_size;
        self
    }

    /// Upper bound for the whole fetch, retries included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_artifact_size(&self) -> u64 {
        self.max_artifact_size
    }

    pub async fn fetch(&self, url: &str, cancel: &CancellationToken) -> Result<FetchedArtifact, FetchError> {
        self.fetch_with_progress(url, None, cancel).await
    }

    pub async fn fetch_with_progress(
        &self,
        url: &str,
        progress: Option<ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<FetchedArtifact, FetchError> {
        let parsed = Url::parse(url).map_err(|_| FetchError::UnsupportedUrl {
            url: url.to_string(),
        })?;
        let file_name = artifact_file_name(&parsed).ok_or_else(|| FetchError::UnsupportedUrl {
            url: url.to_string(),
        })?;

        tokio::fs::create_dir_all(&self.temp_root).await?;
        let temp = tempfile::Builder::new()
            .prefix("fetch-")
            .tempfile_in(&self.temp_root)?;

        log::debug!("Fetching {} into {}", url, temp.path().display());

        let transfer = async {
            match parsed.scheme() {
                "http" | "https" => {
                    let mut file = tokio::fs::File::from_std(temp.reopen()?);
                    self.http_client
                        .download(url, &mut file, self.max_artifact_size, progress.as_ref(), cancel)
                        .await
                }
                "file" => {
                    let source = parsed.to_file_path().map_err(|_| FetchError::UnsupportedUrl {
                        url: url.to_string(),
                    })?;
                    self.copy_local(url, &source, temp.path(), progress.as_ref(), cancel)
                        .await
                }
                _ => Err(FetchError::UnsupportedUrl {
                    url: url.to_string(),
                }),
            }
        };

        let size = match tokio::time::timeout(self.timeout, transfer).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: url.to_string(),
                })
            }
        };

        log::info!("Fetched {} ({} bytes)", url, size);

        Ok(FetchedArtifact {
            file: temp,
            size,
            file_name,
        })
    }

    async fn copy_local(
        &self,
        url: &str,
        source: &Path,
        dest: &Path,
        progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let metadata = match tokio::fs::metadata(source).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => {
                return Err(FetchError::NotFound {
                    url: url.to_string(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound {
                    url: url.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };

        let total = metadata.len();
        if total > self.max_artifact_size {
            return Err(FetchError::SizeLimitExceeded {
                url: url.to_string(),
                limit: self.max_artifact_size,
            });
        }

        let mut reader = tokio::fs::File::open(source).await?;
        let mut writer = tokio::fs::File::create(dest).await?;
        let mut buffer = vec![0u8; 64 * 1024];
        let mut copied: u64 = 0;

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                read = reader.read(&mut buffer) => read?,
            };
            if read == 0 {
                break;
            }

            // The file may grow while we read it.
            if copied + read as u64 > self.max_artifact_size {
                return Err(FetchError::SizeLimitExceeded {
                    url: url.to_string(),
                    limit: self.max_artifact_size,
                });
            }

            writer.write_all(&buffer[..read]).await?;
            copied += read as u64;

            if let Some(callback) = progress {
                callback(copied, total);
            }
        }

        writer.flush().await?;
        Ok(copied)
    }
}

/// Decoded last path segment, or `artifact` when the path has none. `None`
/// when the decoded name is not a plain file name.
fn artifact_file_name(url: &Url) -> Option<String> {
    let Some(segment) = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
    else {
        return Some("artifact".to_string());
    };

    let name = urlencoding::decode(segment).ok()?;
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return None;
    }
    Some(name.into_owned())
}
