//! Restore-baseline command
//!
//! Copies the last working copy of a filesystem category back over its
//! fixture baseline. Only ever run on explicit operator request.

use anyhow::Result;
use benchenv_core::config::Settings;
use benchenv_core::filesystem::FilesystemBackend;
use benchenv_core::fixture::{FixtureFetcher, ReqwestClient};
use tracing::{info, instrument};

#[derive(Debug, Clone)]
pub struct RestoreArgs {
    pub category: String,
}

#[instrument(skip(settings))]
pub async fn execute_restore_baseline(args: RestoreArgs, settings: Settings) -> Result<()> {
    let client = ReqwestClient::new().map_err(|e| anyhow::anyhow!(e))?;
    let fetcher = FixtureFetcher::new(client, settings.fixtures);
    let mut backend = FilesystemBackend::new(settings.filesystem, fetcher);

    backend.restore_baseline(&args.category).await?;
    info!("Restored baseline for category '{}'", args.category);
    Ok(())
}
