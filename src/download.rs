//! Model downloading and caching
//!
//! Fetches model repositories into an XDG-compliant cache with per-resource
//! progress reporting, SHA-256 integrity checking and atomic installs
//! (temp directory, then rename). A warm cache is resolved without touching
//! the network.

use crate::error::{Error, Result};
use crate::models::{ModelAssets, ModelSpec, SIDECAR_FILES, WEIGHTS_FILE};
use crate::progress::DownloadEvent;
use futures_util::stream::TryStreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Environment variable overriding the cache location
pub const CACHE_DIR_ENV: &str = "CUTOUT_CACHE_DIR";

/// Downloads and caches model assets
#[derive(Debug)]
pub struct ModelDownloader {
    client: Client,
    cache_dir: PathBuf,
}

impl ModelDownloader {
    /// Create a downloader using the default cache directory
    ///
    /// Cache layout follows the XDG Base Directory spec:
    /// `~/.cache/cutout/models/<model-id>/` on Linux/macOS,
    /// `%LOCALAPPDATA%/cutout/models/<model-id>/` on Windows.
    ///
    /// # Errors
    /// Returns [`Error::ModelLoad`] when no cache directory can be
    /// determined or created.
    pub fn new() -> Result<Self> {
        let cache_dir = Self::default_cache_dir()?;
        Self::with_cache_dir(cache_dir)
    }

    /// Create a downloader with an explicit cache directory
    ///
    /// # Errors
    /// Returns [`Error::ModelLoad`] when the directory cannot be created or
    /// the HTTP client fails to build.
    pub fn with_cache_dir(cache_dir: PathBuf) -> Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir).map_err(|e| {
                Error::model_load(format!(
                    "Failed to create cache directory '{}': {e}",
                    cache_dir.display()
                ))
            })?;
        }

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .build()
            .map_err(|e| Error::network("Failed to create HTTP client", e))?;

        Ok(Self { client, cache_dir })
    }

    fn default_cache_dir() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            return Ok(PathBuf::from(dir).join("models"));
        }
        Ok(dirs::cache_dir()
            .ok_or_else(|| {
                Error::model_load(format!(
                    "Failed to determine cache directory. Set {CACHE_DIR_ENV}."
                ))
            })?
            .join("cutout")
            .join("models"))
    }

    /// Directory a model resolves to, whether or not it is cached yet
    #[must_use]
    pub fn model_dir(&self, spec: &ModelSpec) -> PathBuf {
        self.cache_dir.join(spec.model_id())
    }

    /// Whether all required files for a model are already cached
    #[must_use]
    pub fn is_cached(&self, spec: &ModelSpec) -> bool {
        ModelAssets::in_dir(&self.model_dir(spec)).is_complete()
    }

    /// Resolve a model to on-disk assets, downloading on a cache miss
    ///
    /// Emits one `Initiate`/`Progress*`/`Done` event sequence per fetched
    /// resource. A cache hit emits nothing.
    ///
    /// # Errors
    /// Returns [`Error::ModelLoad`] on network failures, integrity
    /// mismatches, or when `allow_download` is false on a cache miss.
    pub async fn ensure_model(
        &self,
        spec: &ModelSpec,
        allow_download: bool,
        on_event: &mut dyn FnMut(DownloadEvent),
    ) -> Result<ModelAssets> {
        let final_dir = self.model_dir(spec);
        let assets = ModelAssets::in_dir(&final_dir);
        if assets.is_complete() {
            log::debug!("Model already cached: {}", spec.model_id());
            return Ok(assets);
        }

        if !allow_download {
            return Err(Error::model_load(format!(
                "Model {} is not cached and downloads are disabled",
                spec.model_id()
            )));
        }

        log::info!("Downloading model {} from {}", spec.model_id(), spec.url);
        let temp_dir = self.create_temp_dir(spec)?;

        let outcome = self.download_repository(spec, &temp_dir, on_event).await;
        match outcome {
            Ok(()) => {
                if final_dir.exists() {
                    fs::remove_dir_all(&final_dir).map_err(|e| {
                        Error::model_load(format!("Failed to replace stale model cache: {e}"))
                    })?;
                }
                fs::rename(&temp_dir, &final_dir).map_err(|e| {
                    Error::model_load(format!("Failed to install downloaded model: {e}"))
                })?;
                log::info!("Model cached at {}", final_dir.display());
                Ok(ModelAssets::in_dir(&final_dir))
            },
            Err(e) => {
                if temp_dir.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&temp_dir) {
                        log::warn!("Failed to clean up temp download dir: {cleanup}");
                    }
                }
                Err(e)
            },
        }
    }

    fn create_temp_dir(&self, spec: &ModelSpec) -> Result<PathBuf> {
        let temp_dir = self.cache_dir.join(format!(".{}.download", spec.model_id()));
        if temp_dir.exists() {
            fs::remove_dir_all(&temp_dir).map_err(|e| {
                Error::model_load(format!("Failed to clear stale download dir: {e}"))
            })?;
        }
        fs::create_dir_all(&temp_dir)
            .map_err(|e| Error::model_load(format!("Failed to create download dir: {e}")))?;
        Ok(temp_dir)
    }

    async fn download_repository(
        &self,
        spec: &ModelSpec,
        into: &Path,
        on_event: &mut dyn FnMut(DownloadEvent),
    ) -> Result<()> {
        for file in SIDECAR_FILES {
            self.download_file(spec, file, into, on_event).await?;
        }

        self.download_file(spec, WEIGHTS_FILE, into, on_event).await?;

        if let Some(expected) = &spec.weights_sha256 {
            let weights_path = into.join(WEIGHTS_FILE);
            let actual = file_sha256(&weights_path)?;
            if &actual != expected {
                return Err(Error::model_load(format!(
                    "Weights integrity check failed: expected {expected}, got {actual}"
                )));
            }
            log::debug!("Weights digest verified: {actual}");
        }

        Ok(())
    }

    /// Download one repository file, streaming progress events
    async fn download_file(
        &self,
        spec: &ModelSpec,
        file: &str,
        into: &Path,
        on_event: &mut dyn FnMut(DownloadEvent),
    ) -> Result<()> {
        let url = spec.raw_file_url(file);
        let local_path = into.join(file);
        log::debug!("Downloading {url} -> {}", local_path.display());

        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::model_load(format!("Failed to create directory: {e}")))?;
        }

        on_event(DownloadEvent::initiate(file));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::network(&format!("Failed to fetch {file}"), e))?;

        if !response.status().is_success() {
            return Err(Error::model_load(format!(
                "HTTP {} while fetching {url}",
                response.status()
            )));
        }

        let total = response.content_length();
        let mut file_out = tokio::fs::File::create(&local_path)
            .await
            .map_err(|e| Error::model_load(format!("Failed to create {file}: {e}")))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::other(e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0u8; 64 * 1024];
        loop {
            let read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| Error::network(&format!("Stream error while fetching {file}"), e))?;
            if read == 0 {
                break;
            }
            file_out
                .write_all(buffer.get(..read).unwrap_or(&[]))
                .await
                .map_err(|e| Error::model_load(format!("Failed to write {file}: {e}")))?;
            downloaded += read as u64;
            on_event(DownloadEvent::progress(file, downloaded, total));
        }

        file_out
            .flush()
            .await
            .map_err(|e| Error::model_load(format!("Failed to flush {file}: {e}")))?;

        on_event(DownloadEvent::done(file, downloaded));
        log::debug!("Downloaded {downloaded} bytes for {file}");
        Ok(())
    }
}

/// Hex-encoded SHA-256 digest of a file
///
/// # Errors
/// Returns [`Error::ModelLoad`] when the file cannot be read.
pub fn file_sha256(path: &Path) -> Result<String> {
    let contents = fs::read(path).map_err(|e| {
        Error::model_load(format!(
            "Failed to read '{}' for verification: {e}",
            path.display()
        ))
    })?;
    let mut hasher = Sha256::new();
    hasher.update(&contents);
    Ok(format!("{:x}", hasher.finalize()))
}
