//! URL downloader with a process-wide cache
//!
//! Each URL is fetched at most once per run; concurrent callers for the same
//! URL wait on the first downloader's completion handle instead of polling.
//! Delivery into the caller's directory is by hardlink, falling back to a
//! copy across filesystems.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use pdibuild_core::{Error, Result};

use crate::cancel::CancelToken;

/// Retry ladder: per-attempt timeout in seconds; the last failure is final.
const RETRY_TIMEOUTS: [u64; 5] = [1, 2, 3, 5, 7];

/// Caching downloader shared across the whole invocation.
pub struct Downloader {
    client: reqwest::Client,
    cache_dir: TempDir,
    entries: Mutex<HashMap<String, Arc<OnceCell<PathBuf>>>>,
    token: CancelToken,
}

impl Downloader {
    /// Create a downloader; the cache directory lives until drop
    pub fn new(token: CancelToken) -> Result<Self> {
        let cache_dir = tempfile::Builder::new().prefix("pdibuild-dl.").tempdir()?;
        Ok(Self {
            client: reqwest::Client::new(),
            cache_dir,
            entries: Mutex::new(HashMap::new()),
            token,
        })
    }

    /// Fetch `url` into `dest`.
    ///
    /// The first caller for a URL downloads it into the cache; later callers
    /// wait for that download to complete and link from the cache.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        self.token.check()?;

        let cell = {
            let mut entries = self.entries.lock().await;
            Arc::clone(entries.entry(url.to_string()).or_default())
        };

        let cached = cell
            .get_or_try_init(|| self.download_to_cache(url))
            .await?
            .clone();

        self.token.check()?;
        deliver(&cached, dest)
    }

    async fn download_to_cache(&self, url: &str) -> Result<PathBuf> {
        let name = format!("{:x}", Sha256::digest(url.as_bytes()));
        let path = self.cache_dir.path().join(name);

        info!(url, "downloading");
        let mut last_error = String::new();
        for (attempt, timeout) in RETRY_TIMEOUTS.iter().enumerate() {
            self.token.check()?;
            match self.try_fetch(url, Duration::from_secs(*timeout)).await {
                Ok(body) => {
                    tokio::fs::write(&path, &body).await?;
                    debug!(url, bytes = body.len(), "download complete");
                    return Ok(path);
                }
                Err(reason) => {
                    debug!(url, attempt, %reason, "download attempt failed");
                    last_error = reason;
                }
            }
        }
        Err(Error::download(url, last_error))
    }

    async fn try_fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let response = response.error_for_status().map_err(|e| e.to_string())?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| e.to_string())
    }
}

/// Hardlink from the cache; copy when crossing filesystems.
fn deliver(cached: &Path, dest: &Path) -> Result<()> {
    if std::fs::hard_link(cached, dest).is_err() {
        std::fs::copy(cached, dest)?;
    }
    Ok(())
}
