//! Precompiled binary downloads
//!
//! Streams the binary into a uniquely named `.<daemon>.*.download` file next to
//! the destination and links it into place once complete. An interrupted
//! download never leaves a partial binary at the destination, and a binary
//! already installed there is never replaced. Registry URLs may carry a
//! go-getter style `?checksum=sha256:<hex>` suffix, which is stripped from the
//! request and verified against the downloaded file.

use futures::StreamExt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::logs::LogSink;
use crate::node::NodeError;

const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);
const MIB: f64 = 1024.0 * 1024.0;

/// Downloads binaries over HTTP(S), following redirects
#[derive(Debug, Clone)]
pub struct BinaryDownloader {
    client: reqwest::Client,
}

impl BinaryDownloader {
    pub fn new() -> Result<Self, NodeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("chain-steward/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| NodeError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// Download `url` to `dest`, returning the number of bytes written
    pub async fn download(&self, url: &str, dest: &Path, log: &Arc<LogSink>) -> Result<u64, NodeError> {
        let (url, checksum) = split_checksum(url);
        let url = url.as_str();
        info!(url = %url, dest = %dest.display(), "Downloading binary");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| NodeError::Acquisition(format!("failed to download binary: {}", e)))?;

        if !response.status().is_success() {
            return Err(NodeError::Acquisition(format!(
                "failed to download binary: HTTP {}",
                response.status()
            )));
        }

        let total = response.content_length().unwrap_or(0);
        if total > 0 {
            log.line(format!("Total size: {:.2} MB", total as f64 / MIB));
        }

        // Removed on drop unless persisted
        let (file, partial) = super::staging_file(dest, ".download")?.into_parts();
        let downloaded = self
            .stream_to(response, tokio::fs::File::from_std(file), total, log)
            .await?;

        if total > 0 {
            log.line(progress_line(downloaded, total));
        }
        log.line(format!("Downloaded: {:.2} MB", downloaded as f64 / MIB));

        if let Some(expected) = checksum {
            let actual = sha256_file(partial.to_path_buf()).await?;
            if actual != expected.to_lowercase() {
                return Err(NodeError::Acquisition(format!(
                    "checksum mismatch: expected {}, got {}",
                    expected, actual
                )));
            }
            log.line("Checksum verified");
        }

        super::make_executable(&partial)?;
        match partial.persist_noclobber(dest) {
            Ok(()) => {
                debug!(dest = %dest.display(), bytes = downloaded, "Download complete");
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                log.line("Binary already installed by another download, keeping it");
            }
            Err(e) => return Err(e.error.into()),
        }
        Ok(downloaded)
    }

    async fn stream_to(
        &self,
        response: reqwest::Response,
        mut file: tokio::fs::File,
        total: u64,
        log: &Arc<LogSink>,
    ) -> Result<u64, NodeError> {
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_report = Instant::now();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                NodeError::Acquisition(format!("failed to write binary to disk: {}", e))
            })?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;

            if last_report.elapsed() >= PROGRESS_INTERVAL {
                last_report = Instant::now();
                log.line(progress_line(downloaded, total));
            }
        }

        file.flush().await?;
        Ok(downloaded)
    }
}

/// Strip a `checksum=sha256:<hex>` query parameter off a URL
pub fn split_checksum(url: &str) -> (String, Option<String>) {
    let Some((base, query)) = url.split_once('?') else {
        return (url.to_string(), None);
    };

    let mut checksum = None;
    let rest: Vec<&str> = query
        .split('&')
        .filter(|pair| match pair.strip_prefix("checksum=sha256:") {
            Some(hex) => {
                checksum = Some(hex.to_string());
                false
            }
            None => true,
        })
        .collect();

    if rest.is_empty() {
        (base.to_string(), checksum)
    } else {
        (format!("{}?{}", base, rest.join("&")), checksum)
    }
}

/// Progress as logged while downloading
pub fn progress_line(downloaded: u64, total: u64) -> String {
    let downloaded_mb = downloaded as f64 / MIB;
    if total == 0 {
        return format!("Downloaded: {:.2} MB", downloaded_mb);
    }
    let percent = (downloaded.min(total) * 100) / total;
    format!(
        "Download progress: {}% ({:.2} MB / {:.2} MB)",
        percent,
        downloaded_mb,
        total as f64 / MIB
    )
}

async fn sha256_file(path: PathBuf) -> Result<String, NodeError> {
    use sha2::{Digest, Sha256};

    super::blocking(move || {
        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut file, &mut hasher)?;
        Ok(format!("{:x}", hasher.finalize()))
    })
    .await
}
