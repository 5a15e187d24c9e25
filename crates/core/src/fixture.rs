//! Fixture archives from the content store
//!
//! Filesystem fixtures are zip archives addressed by category
//! (`<base>/filesystem/<category>.zip`); database fixtures are dumps
//! addressed by database name (`<base>/postgres/<name>.backup`). Downloads go
//! through the [`HttpClient`] trait so tests can serve archives from memory.

use crate::config::FixtureSettings;
use crate::errors::{FixtureError, Result};
use crate::retry::{retry_async, RetryConfig, RetryDecision};
use bytes::Bytes;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Filesystem fixture categories published on the content store
pub const FILESYSTEM_CATEGORIES: &[&str] = &[
    "desktop",
    "file_context",
    "file_property",
    "folder_structure",
    "papers",
    "student_database",
    "threestudio",
    "votenet",
    "legal_document",
    "desktop_template",
];

/// Prefix of the per-download extraction directory
const STAGING_PREFIX: &str = ".benchenv-extract-";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP client trait for fixture downloads
#[async_trait::async_trait]
pub trait HttpClient: Send + Sync {
    /// Perform a GET request and return the response body
    async fn get(&self, url: &str) -> std::result::Result<Bytes, BoxError>;
}

/// Non-success HTTP status returned by the content store
#[derive(Debug)]
pub struct HttpStatusError {
    pub url: String,
    pub status: u16,
}

impl std::fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HTTP {} for {}", self.status, self.url)
    }
}

impl std::error::Error for HttpStatusError {}

/// Default HTTP client implementation using reqwest
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> std::result::Result<Self, BoxError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { client })
    }
}

impl Default for ReqwestClient {
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            warn!("Failed to build configured HTTP client: {}. Using basic client.", e);
            Self {
                client: reqwest::Client::new(),
            }
        })
    }
}

#[async_trait::async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str) -> std::result::Result<Bytes, BoxError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                format!("Request timeout for URL: {}", url)
            } else if e.is_connect() {
                format!("Connection failed for URL: {}", url)
            } else {
                format!("Network error for URL: {}: {}", url, e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Box::new(HttpStatusError {
                url: url.to_string(),
                status: status.as_u16(),
            }));
        }
        Ok(response.bytes().await?)
    }
}

/// Retry on transport failures and server errors only
fn classify_download_error(error: &BoxError) -> RetryDecision {
    match error.downcast_ref::<HttpStatusError>() {
        Some(status) if status.status < 500 => RetryDecision::Stop,
        _ => RetryDecision::Retry,
    }
}

/// Downloads and unpacks fixtures
#[derive(Debug, Clone)]
pub struct FixtureFetcher<C> {
    client: C,
    settings: FixtureSettings,
    retry: RetryConfig,
}

impl<C: HttpClient> FixtureFetcher<C> {
    pub fn new(client: C, settings: FixtureSettings) -> Self {
        let retry = RetryConfig {
            max_attempts: settings.download_retries,
            ..RetryConfig::default()
        };
        Self {
            client,
            settings,
            retry,
        }
    }

    /// Replace the retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn settings(&self) -> &FixtureSettings {
        &self.settings
    }

    /// Archive URL for a filesystem category
    ///
    /// The category must be a published one; an explicit URL override then
    /// replaces the computed address.
    pub fn archive_url(&self, category: &str) -> Result<String> {
        if !FILESYSTEM_CATEGORIES.contains(&category) {
            return Err(FixtureError::UnknownCategory {
                category: category.to_string(),
            }
            .into());
        }
        if let Some(url) = &self.settings.url_override {
            return Ok(url.clone());
        }
        Ok(format!(
            "{}/filesystem/{}.zip",
            self.settings.base_url.trim_end_matches('/'),
            category
        ))
    }

    /// Dump URL for a reference database
    pub fn dump_url(&self, database: &str) -> String {
        format!(
            "{}/postgres/{}.backup",
            self.settings.base_url.trim_end_matches('/'),
            database
        )
    }

    /// Local cache path for a reference database dump
    pub fn dump_path(&self, database: &str) -> PathBuf {
        self.settings
            .data_root
            .join("postgres")
            .join(format!("{}.backup", database))
    }

    async fn download(&self, url: &str) -> Result<Bytes> {
        retry_async(&self.retry, || self.client.get(url), classify_download_error)
            .await
            .map_err(|e| {
                FixtureError::Download {
                    message: e.to_string(),
                }
                .into()
            })
    }

    /// Download the archive for `category` and unpack it so that `target`
    /// exists afterwards.
    ///
    /// The archive is expected to hold a top-level directory named after the
    /// category; it is extracted into `target`'s parent.
    #[instrument(skip(self), fields(target = %target.display()))]
    pub async fn fetch_category(&self, category: &str, target: &Path) -> Result<()> {
        let url = self.archive_url(category)?;
        info!("Downloading fixture '{}' from {}", category, url);
        let archive = self.download(&url).await?;
        debug!("Downloaded {} bytes", archive.len());

        let parent = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        tokio::fs::create_dir_all(&parent)
            .await
            .map_err(FixtureError::Io)?;

        // Unpack into a staging dir next to the target; only a complete tree
        // is moved into place
        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(&parent)
            .map_err(FixtureError::Io)?;
        let dest = staging.path().to_path_buf();
        tokio::task::spawn_blocking(move || extract_zip(archive, &dest))
            .await
            .map_err(|e| FixtureError::Extraction {
                message: format!("extraction task failed: {}", e),
            })??;

        let extracted = target
            .file_name()
            .map(|name| staging.path().join(name))
            .filter(|dir| dir.is_dir())
            .ok_or_else(|| FixtureError::Missing {
                path: target.display().to_string(),
            })?;
        tokio::fs::rename(&extracted, target)
            .await
            .map_err(FixtureError::Io)?;

        // Whatever else the archive held (e.g. __MACOSX) goes with the staging dir
        let staging_path = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            warn!("Failed to remove {}: {}", staging_path.display(), e);
        }

        info!("Fixture '{}' ready at {}", category, target.display());
        Ok(())
    }

    /// Download `url` to `dest`, writing through a temporary file so a failed
    /// download never leaves a truncated file behind.
    #[instrument(skip(self), fields(dest = %dest.display()))]
    pub async fn download_to_file(&self, url: &str, dest: &Path) -> Result<()> {
        let body = self.download(url).await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(FixtureError::Io)?;
        }
        let partial = dest.with_extension("partial");
        tokio::fs::write(&partial, &body)
            .await
            .map_err(FixtureError::Io)?;
        tokio::fs::rename(&partial, dest)
            .await
            .map_err(FixtureError::Io)?;
        info!("Downloaded {} ({} bytes)", url, body.len());
        Ok(())
    }
}

fn extract_zip(archive: Bytes, dest: &Path) -> Result<()> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive)).map_err(|e| {
        FixtureError::Extraction {
            message: format!("invalid archive: {}", e),
        }
    })?;
    zip.extract(dest).map_err(|e| FixtureError::Extraction {
        message: format!("failed to extract into {}: {}", dest.display(), e),
    })?;
    Ok(())
}
