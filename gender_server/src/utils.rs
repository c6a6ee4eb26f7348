//! Utility functions
//!
use std::{
    fs::File,
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use reqwest::Client;

/// Directory for downloaded models, `~/.cache/gendercam` on Linux.
pub fn model_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("gendercam")
}

/// Download a file from a URL to a given filepath.
pub async fn download_file(client: &Client, url: &str, filepath: impl AsRef<Path>) -> Result<()> {
    let resp = client.get(url).send().await?;
    if !resp.status().is_success() {
        bail!("downloading {} failed with {}", url, resp.status());
    }

    let mut file = File::create(filepath)?;
    let mut content = Cursor::new(resp.bytes().await?);
    std::io::copy(&mut content, &mut file)?;

    Ok(())
}

/// Make sure a model file exists at `path`, downloading it from `url` if not.
pub async fn ensure_model(client: &Client, url: Option<&str>, path: &Path) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    let Some(url) = url else {
        bail!("model {} not found and no download URL given", path.display());
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    log::info!("Downloading {} to {}", url, path.display());

    // The target path only ever holds a complete model
    let partial = path.with_extension("part");
    download_file(client, url, &partial).await?;
    std::fs::rename(&partial, path)?;

    Ok(())
}
