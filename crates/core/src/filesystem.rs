//! Filesystem snapshot backend
//!
//! Each category has a baseline tree under the fixture root. A task never
//! sees the baseline: `set_up` copies it into a working directory and exposes
//! that copy, and `clean_up` deletes the copy. Baselines missing locally are
//! fetched from the content store first.
//!
//! Restoring a baseline from a working copy is a separate, explicit
//! operation ([`FilesystemBackend::restore_baseline`]); the set-up/clean-up
//! path never writes to a baseline.

use crate::config::FilesystemSettings;
use crate::errors::{BenchEnvError, FilesystemError, Result};
use crate::fixture::{FixtureFetcher, HttpClient};
use crate::lifecycle::{AgentConfig, InitialStateInfo, StateBackend};
use crate::task::Task;
use crate::tracker::{ResourceKind, ResourceTracker, TrackedResource};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

const WRITE_PROBE_FILE: &str = ".benchenv_write_test";

/// Snapshot-and-discard backend for filesystem tasks
#[derive(Debug)]
pub struct FilesystemBackend<C> {
    settings: FilesystemSettings,
    fetcher: FixtureFetcher<C>,
    /// Working copy of the active task
    working_dir: Option<PathBuf>,
}

impl<C: HttpClient> FilesystemBackend<C> {
    pub fn new(settings: FilesystemSettings, fetcher: FixtureFetcher<C>) -> Self {
        info!(
            "Initialized filesystem backend with fixture root: {}",
            settings.test_root.display()
        );
        Self {
            settings,
            fetcher,
            working_dir: None,
        }
    }

    /// Verify the fixture root is writable when it already exists
    ///
    /// A missing root is fine; categories are fetched on demand.
    #[instrument(skip(self))]
    pub fn initialize(&self) -> Result<()> {
        let root = &self.settings.test_root;
        if !root.exists() {
            debug!("Fixture root {} does not exist yet", root.display());
            return Ok(());
        }
        let probe = root.join(WRITE_PROBE_FILE);
        fs::write(&probe, b"test").map_err(FilesystemError::Io)?;
        fs::remove_file(&probe).map_err(FilesystemError::Io)?;
        info!("Using fixture root: {}", root.display());
        Ok(())
    }

    /// Working copy of the active task, if any
    pub fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    /// Category name and baseline directory for `category_id`
    ///
    /// An empty category uses the fixture root itself and the default
    /// category for fetching.
    pub fn resolve_baseline(&self, category_id: &str) -> (String, PathBuf) {
        if category_id.is_empty() {
            (
                self.settings.default_category.clone(),
                self.settings.test_root.clone(),
            )
        } else {
            (
                category_id.to_string(),
                self.settings.test_root.join(category_id),
            )
        }
    }

    /// Working-copy location for a category
    pub fn working_dir_for(&self, category: &str) -> Result<PathBuf> {
        let base = self
            .settings
            .work_root
            .as_ref()
            .unwrap_or(&self.settings.backup_root);
        let base = std::path::absolute(base).map_err(FilesystemError::Io)?;
        Ok(base.join(category))
    }

    /// Refuse a working copy that is, contains, or sits inside the baseline
    fn ensure_disjoint(working_dir: &Path, baseline: &Path) -> Result<()> {
        let baseline = std::path::absolute(baseline).map_err(FilesystemError::Io)?;
        if working_dir.starts_with(&baseline) || baseline.starts_with(working_dir) {
            return Err(FilesystemError::Overlap {
                working: working_dir.display().to_string(),
                baseline: baseline.display().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Make sure the baseline exists locally, fetching it if necessary
    async fn ensure_baseline(&self, category: &str, baseline: &Path) -> Result<()> {
        if baseline.is_dir() {
            return Ok(());
        }
        warn!("Baseline directory does not exist: {}", baseline.display());
        self.fetcher.fetch_category(category, baseline).await
    }

    /// Copy a working copy back over its baseline, then discard the copy
    ///
    /// This overwrites the baseline and is never called by set-up or
    /// clean-up.
    #[instrument(skip(self))]
    pub async fn restore_baseline(&mut self, category_id: &str) -> Result<()> {
        let (category, baseline) = self.resolve_baseline(category_id);
        let backup = self.working_dir_for(&category)?;
        if !backup.is_dir() {
            return Err(FilesystemError::NoBackup.into());
        }
        Self::ensure_disjoint(&backup, &baseline)?;

        remove_dir_if_present(&baseline).await?;
        copy_tree_async(&backup, &baseline).await?;
        remove_dir_if_present(&backup).await?;
        if self.working_dir.as_deref() == Some(backup.as_path()) {
            self.working_dir = None;
        }
        info!("Restored baseline {} from {}", baseline.display(), backup.display());
        Ok(())
    }
}

impl<C: HttpClient> StateBackend for FilesystemBackend<C> {
    fn service_name(&self) -> &str {
        "filesystem"
    }

    async fn create_initial_state(
        &mut self,
        task: &Task,
        tracker: &mut ResourceTracker,
    ) -> Result<InitialStateInfo> {
        let (category, baseline) = self.resolve_baseline(&task.category_id);
        info!("Using baseline {} for {}", baseline.display(), task.name());
        let working_dir = self.working_dir_for(&category)?;
        Self::ensure_disjoint(&working_dir, &baseline)?;
        self.ensure_baseline(&category, &baseline).await?;

        if working_dir.exists() {
            remove_dir_if_present(&working_dir).await?;
            debug!("Removed existing working copy {}", working_dir.display());
        }
        if let Some(parent) = working_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(FilesystemError::Io)?;
        }

        if let Err(e) = copy_tree_async(&baseline, &working_dir).await {
            if let Err(cleanup) = remove_dir_if_present(&working_dir).await {
                warn!("Failed to remove partial copy {}: {}", working_dir.display(), cleanup);
            }
            return Err(e);
        }
        info!("Created working copy for {}: {}", task.name(), working_dir.display());

        let mut metadata = serde_json::Map::new();
        metadata.insert("category".to_string(), json!(category));
        metadata.insert("baseline".to_string(), json!(baseline.display().to_string()));
        tracker.track(
            ResourceKind::Directory,
            working_dir.display().to_string(),
            metadata.clone(),
        );

        let path = working_dir.display().to_string();
        Ok(InitialStateInfo {
            state_id: path.clone(),
            state_url: Some(path),
            metadata,
        })
    }

    fn store_state_info(&mut self, task: &mut Task, info: InitialStateInfo) {
        let dir = PathBuf::from(info.state_id);
        task.environment.test_directory = Some(dir.clone());
        self.working_dir = Some(dir);
    }

    async fn cleanup_initial_state(&mut self, task: &Task) -> Result<()> {
        let Some(dir) = task.environment.test_directory.as_deref() else {
            debug!("No working copy recorded for {}", task.name());
            return Ok(());
        };
        remove_dir_if_present(dir).await?;
        if self.working_dir.as_deref() == Some(dir) {
            self.working_dir = None;
        }
        info!("Cleaned up working copy for {}", task.name());
        Ok(())
    }

    async fn cleanup_resource(&mut self, resource: &TrackedResource) -> Result<()> {
        if resource.kind != ResourceKind::Directory {
            return Err(BenchEnvError::UnsupportedResource {
                service: self.service_name().to_string(),
                kind: resource.kind.to_string(),
            });
        }
        let dir = Path::new(&resource.id);
        remove_dir_if_present(dir).await?;
        if self.working_dir.as_deref() == Some(dir) {
            self.working_dir = None;
        }
        Ok(())
    }

    fn agent_config(&self) -> AgentConfig {
        let mut config = AgentConfig::new();
        if let Some(dir) = &self.working_dir {
            config.insert("test_directory".to_string(), json!(dir.display().to_string()));
        }
        config
    }
}

/// Remove a directory tree; an absent directory is success
async fn remove_dir_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(FilesystemError::Remove {
            path: path.display().to_string(),
            message: e.to_string(),
        }
        .into()),
    }
}

async fn copy_tree_async(src: &Path, dst: &Path) -> Result<()> {
    if !src.is_dir() {
        return Err(FilesystemError::BaselineMissing {
            path: src.display().to_string(),
        }
        .into());
    }
    let (from, to) = (src.to_path_buf(), dst.to_path_buf());
    tokio::task::spawn_blocking(move || copy_tree(&from, &to))
        .await
        .map_err(|e| FilesystemError::Copy {
            from: src.display().to_string(),
            to: dst.display().to_string(),
            message: format!("copy task failed: {}", e),
        })?
        .map_err(|message| {
            FilesystemError::Copy {
                from: src.display().to_string(),
                to: dst.display().to_string(),
                message,
            }
            .into()
        })
}

/// Recursive copy of `src` into a new directory `dst`; symlinks are resolved
fn copy_tree(src: &Path, dst: &Path) -> std::result::Result<(), String> {
    for entry in walkdir::WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| e.to_string())?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| e.to_string())?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| format!("{}: {}", target.display(), e))?;
        } else {
            fs::copy(entry.path(), &target)
                .map_err(|e| format!("{}: {}", entry.path().display(), e))?;
        }
    }
    Ok(())
}
