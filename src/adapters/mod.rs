//! Adapter interfaces for external collaborators.
//!
//! The orchestrator only sees these three traits. Concrete adapters:
//! - `SourceAcquirer`: local files and `yt-dlp` downloads
//! - `OffmuteTranscriber`: `offmute` subprocess transcription
//! - `DeepgramTranscriber`: Deepgram prerecorded-audio API
//! - `FallbackTranscriber`: a primary transcriber backed by a second one
//! - `GraphitiIngestor`: Graphiti HTTP server

pub mod acquire;
pub mod deepgram;
pub mod fallback;
pub mod graphiti;
pub mod offmute;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{TranscriptOutput, WorkItem};

pub use acquire::{parse_flat_playlist, video_id_from_url, PlaylistEntry, SourceAcquirer};
pub use deepgram::DeepgramTranscriber;
pub use fallback::FallbackTranscriber;
pub use graphiti::GraphitiIngestor;
pub use offmute::OffmuteTranscriber;

/// Errors raised while acquiring media
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Local media file not found: {0}")]
    MissingLocalFile(PathBuf),

    #[error("Download of {url} failed with exit code {code}: {stderr}")]
    DownloadFailed {
        url: String,
        code: i32,
        stderr: String,
    },

    #[error("Download finished but no media file was found for {0}")]
    NoOutput(String),

    #[error("Download of {0} timed out")]
    Timeout(String),

    #[error("Invalid item id: {0}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while transcribing or parsing a transcript document
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("Transcriber exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    #[error("Transcriber returned empty output")]
    EmptyOutput,

    #[error("Transcription timed out")]
    Timeout,

    #[error("Audio extraction exited with code {code}: {stderr}")]
    AudioExtraction { code: i32, stderr: String },

    #[error("DEEPGRAM_API_KEY is not set")]
    MissingApiKey,

    #[error("Transcription request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected transcription response: {0}")]
    UnexpectedResponse(String),

    #[error("Failed to parse transcriber output: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while ingesting into the knowledge graph
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Transcript document is empty: {0}")]
    EmptyDocument(PathBuf),

    #[error("Graph request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Produces a local media file for an item
#[async_trait]
pub trait Acquirer: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    async fn acquire(&self, item: &WorkItem) -> Result<PathBuf, AcquisitionError>;
}

/// Produces transcript segments and analysis
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    /// Run a fresh transcription of a media file
    async fn transcribe(&self, media_path: &Path) -> Result<TranscriptOutput, TranscriptionError>;

    /// Document this backend leaves beside `media_path`, if it writes one
    fn adjacent_artifact(&self, _media_path: &Path) -> Option<PathBuf> {
        None
    }

    /// Read an already-produced transcript document
    async fn parse_existing_artifact(
        &self,
        artifact_path: &Path,
    ) -> Result<TranscriptOutput, TranscriptionError> {
        let content = tokio::fs::read_to_string(artifact_path).await?;
        Ok(TranscriptOutput::parse(&content))
    }
}

/// Pushes a transcript document into the knowledge graph
#[async_trait]
pub trait GraphIngestor: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(false)` means the document was not ingested; there is no
    /// partial-success signal
    async fn ingest(&self, artifact_path: &Path) -> Result<bool, IngestError>;
}
