//! HTTP downloader for binary resources.
//!
//! Bounded timeouts throughout: a short connect timeout so an unreachable
//! media host fails fast, and a caller-supplied transfer timeout covering
//! the whole request, so one stalled resource cannot stall a run.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use tracing::debug;

use sitegraft_core::{Downloader, Error, Result};

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// reqwest-backed downloader writing to the system temp directory.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| Error::Request(e.to_string()))?;
        Ok(Self { client })
    }

    fn temp_path(url: &str) -> PathBuf {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();

        // Preserve the extension for downstream type detection.
        let ext = url
            .rsplit('/')
            .next()
            .and_then(|name| name.split('?').next())
            .and_then(|name| name.rsplit_once('.').map(|(_, e)| e))
            .filter(|e| !e.is_empty() && e.len() <= 8 && e.chars().all(|c| c.is_ascii_alphanumeric()));

        let file_name = match ext {
            Some(ext) => format!("sitegraft-{suffix}.{ext}"),
            None => format!("sitegraft-{suffix}"),
        };
        std::env::temp_dir().join(file_name)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download_to_temp(&self, url: &str, timeout: Duration) -> Result<PathBuf> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| Error::Request(e.to_string()))?;

        let bytes = response.bytes().await?;
        let path = Self::temp_path(url);
        tokio::fs::write(&path, &bytes).await?;

        debug!(
            subsystem = "engine",
            component = "transport",
            op = "download",
            url = %url,
            bytes = bytes.len(),
            "Downloaded attachment"
        );
        Ok(path)
    }
}
