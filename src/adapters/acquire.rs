//! Media acquisition.
//!
//! Local items are checked on disk; remote items are downloaded with
//! `yt-dlp` into `downloads/<scope>/<leaf><suffix>`. A previously
//! downloaded file is reused instead of fetching it again.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::config::AcquirerConfig;
use crate::core::resolver::{ArtifactKind, ArtifactResolver};
use crate::domain::{ItemId, Source, WorkItem};

use super::{AcquisitionError, Acquirer};

/// Acquirer dispatching on the item's source variant
pub struct SourceAcquirer {
    config: AcquirerConfig,
    resolver: ArtifactResolver,
}

impl SourceAcquirer {
    pub fn new(config: AcquirerConfig, resolver: ArtifactResolver) -> Self {
        Self { config, resolver }
    }

    async fn download(&self, id: &ItemId, url: &str) -> Result<PathBuf, AcquisitionError> {
        if let Some(existing) = self.resolver.resolve(ArtifactKind::Media, id) {
            info!(%id, path = %existing.display(), "Media already downloaded");
            return Ok(existing);
        }

        let target = self.resolver.canonical_path(ArtifactKind::Media, id);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(%id, url, target = %target.display(), "Downloading media");

        let mut cmd = Command::new(&self.config.binary);
        cmd.arg("-f")
            .arg(&self.config.format)
            .arg("--merge-output-format")
            .arg(self.config.media_suffix.trim_start_matches('.'))
            .arg("--no-playlist")
            .arg("--no-progress")
            .arg("-o")
            .arg(&target)
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.output();

        let output = match self.config.timeout_secs {
            Some(secs) => timeout(Duration::from_secs(secs), child)
                .await
                .map_err(|_| AcquisitionError::Timeout(url.to_string()))??,
            None => child.await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AcquisitionError::DownloadFailed {
                url: url.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        if target.is_file() {
            Ok(target)
        } else {
            Err(AcquisitionError::NoOutput(id.to_string()))
        }
    }
}

#[async_trait]
impl Acquirer for SourceAcquirer {
    fn name(&self) -> &str {
        "source"
    }

    async fn acquire(&self, item: &WorkItem) -> Result<PathBuf, AcquisitionError> {
        match &item.source {
            Source::Local { path } => {
                if path.is_file() {
                    Ok(path.clone())
                } else {
                    Err(AcquisitionError::MissingLocalFile(path.clone()))
                }
            }
            Source::Remote { url } => {
                let id = item
                    .item_id()
                    .map_err(|e| AcquisitionError::InvalidId(e.to_string()))?;
                self.download(&id, url).await
            }
        }
    }
}

/// One entry of a `yt-dlp --flat-playlist --dump-json` listing
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlaylistEntry {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
}

impl PlaylistEntry {
    pub fn display_title(&self) -> String {
        self.title
            .clone()
            .unwrap_or_else(|| format!("Video {}", self.id))
    }
}

/// Parse flat-playlist JSON lines.
///
/// Entries titled like shorts or shorter than `min_duration_secs` are
/// skipped; `limit` caps the result after filtering.
pub fn parse_flat_playlist(
    stdout: &str,
    min_duration_secs: u64,
    limit: Option<usize>,
) -> Vec<PlaylistEntry> {
    let mut entries = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let entry: PlaylistEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping unparseable playlist line");
                continue;
            }
        };

        let looks_like_short = entry
            .title
            .as_deref()
            .map(|t| t.to_lowercase().starts_with("short"))
            .unwrap_or(false);
        let too_short = entry
            .duration
            .map(|d| d < min_duration_secs as f64)
            .unwrap_or(false);
        if looks_like_short || too_short {
            info!(id = %entry.id, "Skipping short video");
            continue;
        }

        entries.push(entry);
        if limit.is_some_and(|n| entries.len() >= n) {
            break;
        }
    }

    entries
}

/// List the videos of a channel or playlist without downloading them
pub async fn list_channel(
    config: &AcquirerConfig,
    channel_url: &str,
    limit: Option<usize>,
) -> Result<Vec<PlaylistEntry>> {
    let mut cmd = Command::new(&config.binary);
    cmd.args(["--flat-playlist", "--skip-download", "--dump-json"]);
    if let Some(n) = limit {
        cmd.arg("--playlist-end").arg(n.to_string());
    }
    cmd.arg(channel_url);

    info!(channel_url, "Listing channel videos");
    let output = cmd
        .output()
        .await
        .with_context(|| format!("Failed to run {}", config.binary))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "{} failed with exit code {}: {}",
            config.binary,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        );
    }

    let stdout = String::from_utf8(output.stdout).context("yt-dlp output is not valid UTF-8")?;
    Ok(parse_flat_playlist(&stdout, config.min_duration_secs, limit))
}

/// Extract a video id from a watch, short, or youtu.be URL.
/// Anything that is not a URL is taken to be an id already.
pub fn video_id_from_url(input: &str) -> Option<String> {
    let input = input.trim();
    if !input.contains("://") {
        return (!input.is_empty()).then(|| input.to_string());
    }

    let without_scheme = input.split_once("://")?.1;
    let (host, rest) = without_scheme.split_once('/')?;
    let host = host.trim_start_matches("www.").trim_start_matches("m.");
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, q),
        None => (rest, ""),
    };

    let id = match host {
        "youtu.be" => path.split('/').next(),
        "youtube.com" | "music.youtube.com" => match path {
            "watch" => query
                .split('&')
                .find_map(|pair| pair.strip_prefix("v=")),
            _ => path
                .strip_prefix("shorts/")
                .or_else(|| path.strip_prefix("embed/"))
                .or_else(|| path.strip_prefix("live/")),
        },
        _ => None,
    }?;

    let id = id.split(['/', '#']).next()?.trim();
    (!id.is_empty()).then(|| id.to_string())
}
