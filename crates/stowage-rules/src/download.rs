use std::path::PathBuf;

use tokio::fs;
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::errors::{Result, RulesError};

/// Returns the evaluator jar path, downloading the jar first when it is
/// missing and auto-download is enabled.
pub async fn ensure_evaluator_binary(config: &RuntimeConfig) -> Result<PathBuf> {
    if fs::try_exists(&config.jar_path).await? {
        return Ok(config.jar_path.clone());
    }

    if !config.auto_download {
        warn!(
            path = %config.jar_path.display(),
            "rules evaluator is missing and auto-download is disabled; setup required"
        );
        return Err(RulesError::BinaryMissing(config.jar_path.clone()));
    }

    if std::env::var_os("CI").is_some() {
        let cache_dir = config
            .cache_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default();
        warn!(
            cache_dir = %cache_dir,
            "running in a CI environment; cache this directory to avoid downloading the rules evaluator repeatedly"
        );
    }

    download(config).await?;
    Ok(config.jar_path.clone())
}

async fn download(config: &RuntimeConfig) -> Result<()> {
    info!(url = %config.download_url, "downloading rules evaluator");

    let response = reqwest::get(&config.download_url)
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|err| RulesError::Download(err.to_string()))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|err| RulesError::Download(err.to_string()))?;

    if let Some(dir) = config.cache_dir() {
        fs::create_dir_all(&dir).await?;
    }
    let partial = config.jar_path.with_extension("jar.download");
    fs::write(&partial, &bytes).await?;
    fs::rename(&partial, &config.jar_path).await?;

    info!(path = %config.jar_path.display(), size = bytes.len(), "rules evaluator downloaded");
    Ok(())
}
