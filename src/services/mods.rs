use camino::{Utf8Path, Utf8PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::{LauncherError, Result};
use crate::models::ModSourceData;

/// Download `url` to `destination`, returning the number of bytes written.
///
/// The body streams into `<destination>.part`, which is renamed on success.
pub async fn download_file(
    client: &reqwest::Client,
    url: &str,
    destination: &Utf8Path,
) -> Result<u64> {
    tracing::info!("Downloading {} to {}", url, destination);
    let mut response = client.get(url).send().await?.error_for_status()?;

    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let partial = Utf8PathBuf::from(format!("{}.part", destination));
    let mut file = tokio::fs::File::create(&partial).await?;

    let mut written = 0u64;
    let streamed = async {
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok::<(), LauncherError>(())
    }
    .await;

    if let Err(e) = streamed {
        drop(file);
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(e);
    }
    drop(file);
    tokio::fs::rename(&partial, destination).await?;

    tracing::info!("Downloaded {} bytes from {}", written, url);
    Ok(written)
}

/// Fetch and parse a mod source index
pub async fn fetch_mod_source(client: &reqwest::Client, url: &str) -> Result<ModSourceData> {
    tracing::debug!("Fetching mod source {}", url);
    let data = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<ModSourceData>()
        .await?;
    tracing::info!(
        "Mod source {} lists {} mods",
        data.source_name,
        data.mods.len()
    );
    Ok(data)
}

/// Unpack a zip archive into `destination`, replacing what was there.
///
/// Entries escaping the destination are rejected by the archive reader.
pub async fn extract_archive(archive: &Utf8Path, destination: &Utf8Path) -> Result<usize> {
    let archive = archive.to_path_buf();
    let destination = destination.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<usize> {
        let file = std::fs::File::open(&archive)?;
        let mut zip = zip::ZipArchive::new(file)?;
        if destination.exists() {
            std::fs::remove_dir_all(&destination)?;
        }
        std::fs::create_dir_all(&destination)?;
        zip.extract(&destination)?;
        tracing::info!("Extracted {} entries into {}", zip.len(), destination);
        Ok(zip.len())
    })
    .await
    .map_err(|e| LauncherError::Other(anyhow::anyhow!("Archive task failed: {}", e)))?
}
