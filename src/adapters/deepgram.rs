//! Deepgram transcription backend.
//!
//! Endpoint: POST {endpoint}?punctuate=true
//!
//! The media's audio track is extracted to a mono 16 kHz WAV with ffmpeg
//! and uploaded as the request body. Deepgram returns a single punctuated
//! transcript and no analysis, so the output is one segment.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::DeepgramConfig;
use crate::domain::{Analysis, Segment, TranscriptOutput};

use super::{Transcriber, TranscriptionError};

/// Deepgram HTTP client
pub struct DeepgramTranscriber {
    config: DeepgramConfig,
    api_key: String,
    artifact_suffix: String,
    client: reqwest::Client,
}

impl DeepgramTranscriber {
    /// Fails with `MissingApiKey` when no key is configured
    pub fn new(
        config: DeepgramConfig,
        artifact_suffix: impl Into<String>,
    ) -> Result<Self, TranscriptionError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or(TranscriptionError::MissingApiKey)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            api_key,
            artifact_suffix: artifact_suffix.into(),
            client,
        })
    }

    /// Temporary WAV written beside the media
    pub fn audio_path_for(media_path: &Path) -> PathBuf {
        media_path.with_extension("16k.wav")
    }

    async fn extract_audio(&self, media_path: &Path, audio_path: &Path) -> Result<(), TranscriptionError> {
        let output = Command::new(&self.config.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(media_path)
            .args(["-ar", "16000", "-ac", "1"])
            .arg(audio_path)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriptionError::AudioExtraction {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    async fn request(&self, audio_path: &Path) -> Result<TranscriptOutput, TranscriptionError> {
        let audio = tokio::fs::read(audio_path).await?;
        debug!(bytes = audio.len(), "Uploading audio to Deepgram");

        let body = self
            .client
            .post(&self.config.endpoint)
            .query(&[("punctuate", "true")])
            .header(AUTHORIZATION, format!("Token {}", self.api_key))
            .header(CONTENT_TYPE, "audio/wav")
            .body(audio)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        parse_deepgram_response(&body)
    }
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    fn name(&self) -> &str {
        "deepgram"
    }

    async fn transcribe(&self, media_path: &Path) -> Result<TranscriptOutput, TranscriptionError> {
        let audio_path = Self::audio_path_for(media_path);
        info!(media = %media_path.display(), "Transcribing with Deepgram");

        let result = match self.extract_audio(media_path, &audio_path).await {
            Ok(()) => self.request(&audio_path).await,
            Err(e) => Err(e),
        };

        if let Err(e) = tokio::fs::remove_file(&audio_path).await {
            debug!(error = %e, audio = %audio_path.display(), "No extracted audio to remove");
        }
        result
    }

    fn adjacent_artifact(&self, media_path: &Path) -> Option<PathBuf> {
        let stem = media_path.file_stem()?.to_string_lossy();
        Some(media_path.with_file_name(format!("{}{}", stem, self.artifact_suffix)))
    }
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<Channel>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    words: Vec<Word>,
}

#[derive(Debug, Deserialize)]
struct Word {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
}

/// Parse a prerecorded-audio response into a one-segment transcript.
///
/// The segment spans the first to the last recognized word, or `0..0`
/// when the response carries no word timings.
pub fn parse_deepgram_response(body: &str) -> Result<TranscriptOutput, TranscriptionError> {
    let response: ListenResponse = serde_json::from_str(body)?;
    let alternative = response
        .results
        .channels
        .into_iter()
        .next()
        .and_then(|channel| channel.alternatives.into_iter().next())
        .ok_or_else(|| TranscriptionError::UnexpectedResponse("no transcript alternatives".to_string()))?;

    let text = alternative.transcript.trim();
    if text.is_empty() {
        return Err(TranscriptionError::EmptyOutput);
    }

    let (start, end) = match (alternative.words.first(), alternative.words.last()) {
        (Some(first), Some(last)) => (first.start, last.end),
        _ => (0.0, 0.0),
    };

    Ok(TranscriptOutput {
        segments: vec![Segment::new(start, end, text)],
        analysis: Analysis::default(),
    })
}
