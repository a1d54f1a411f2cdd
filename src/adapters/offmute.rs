//! offmute transcription backend.
//!
//! Shells out to `bunx offmute-advanced`, which prints a JSON analysis to
//! stdout and writes a `<stem>_transcription.md` document next to the media.
//! When the JSON is missing or unusable but the document exists, the
//! document is parsed instead.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::TranscriberConfig;
use crate::domain::{Analysis, Segment, TranscriptOutput};

use super::{Transcriber, TranscriptionError};

/// Transcriber backed by the offmute CLI
pub struct OffmuteTranscriber {
    config: TranscriberConfig,
}

impl OffmuteTranscriber {
    pub fn new(config: TranscriberConfig) -> Self {
        Self { config }
    }

    /// Document offmute writes for `media_path`
    pub fn artifact_for(&self, media_path: &Path) -> PathBuf {
        let stem = media_path.file_stem().unwrap_or_default().to_string_lossy();
        media_path.with_file_name(format!("{}{}", stem, self.config.artifact_suffix))
    }

    async fn run_offmute(&self, media_path: &Path) -> Result<TranscriptOutput, TranscriptionError> {
        let mut cmd = Command::new(&self.config.runner);
        cmd.arg(&self.config.package)
            .arg(media_path)
            .args(["-t", self.config.tier.as_str(), "-sc", "0"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = cmd.output();

        let output = match self.config.timeout_secs {
            Some(secs) => timeout(Duration::from_secs(secs), child)
                .await
                .map_err(|_| TranscriptionError::Timeout)??,
            None => child.await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TranscriptionError::Failed {
                code: output.status.code().unwrap_or(-1),
                stderr: stderr.trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Err(TranscriptionError::EmptyOutput);
        }

        Ok(parse_offmute_output(&stdout)?)
    }
}

#[async_trait]
impl Transcriber for OffmuteTranscriber {
    fn name(&self) -> &str {
        "offmute"
    }

    fn adjacent_artifact(&self, media_path: &Path) -> Option<PathBuf> {
        Some(self.artifact_for(media_path))
    }

    async fn transcribe(&self, media_path: &Path) -> Result<TranscriptOutput, TranscriptionError> {
        let artifact = self.artifact_for(media_path);
        info!(media = %media_path.display(), "Running offmute");

        match self.run_offmute(media_path).await {
            Ok(output) => Ok(output),
            Err(e) if artifact.is_file() => {
                warn!(error = %e, artifact = %artifact.display(), "offmute failed, using its transcript document");
                self.parse_existing_artifact(&artifact).await
            }
            Err(e) => {
                error!(error = %e, media = %media_path.display(), "offmute failed");
                Err(e)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct OffmuteOutput {
    #[serde(default)]
    segments: Option<Vec<OffmuteSegment>>,
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    topics: Vec<serde_json::Value>,
    #[serde(default)]
    key_terms: Vec<serde_json::Value>,
    #[serde(default)]
    recommended_chapters: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct OffmuteSegment {
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    #[serde(default)]
    text: String,
}

/// Parse offmute's JSON output
pub fn parse_offmute_output(stdout: &str) -> Result<TranscriptOutput, serde_json::Error> {
    let raw: OffmuteOutput = serde_json::from_str(stdout)?;

    let segments = match raw.segments {
        Some(segments) => segments
            .into_iter()
            .map(|s| Segment::new(s.start, s.end, s.text.trim()))
            .collect(),
        None => vec![Segment::new(0.0, 0.0, raw.transcript.trim())],
    };

    Ok(TranscriptOutput {
        segments,
        analysis: Analysis {
            summary: raw.summary,
            topics: labels(raw.topics),
            key_terms: labels(raw.key_terms),
            chapters: labels(raw.recommended_chapters),
        },
    })
}

/// Flatten list entries that may be strings or objects with a title
fn labels(values: Vec<serde_json::Value>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|value| match value {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            serde_json::Value::Object(ref map) => ["title", "name", "term", "topic"]
                .iter()
                .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
                .map(str::to_string)
                .or_else(|| Some(value.to_string())),
            other => Some(other.to_string()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_output_with_segments() {
        let stdout = r#"{
            "segments": [
                {"start": 0.0, "end": 2.5, "text": " Hello "},
                {"start": 2.5, "end": 6.0, "text": "world"}
            ],
            "summary": "A greeting",
            "topics": ["greetings"],
            "key_terms": [{"term": "hello", "definition": "a greeting"}],
            "recommended_chapters": [{"title": "Opening", "start": 0}]
        }"#;

        let output = parse_offmute_output(stdout).unwrap();
        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.segments[0].text, "Hello");
        assert_eq!(output.analysis.summary, "A greeting");
        assert_eq!(output.analysis.topics, vec!["greetings"]);
        assert_eq!(output.analysis.key_terms, vec!["hello"]);
        assert_eq!(output.analysis.chapters, vec!["Opening"]);
    }

    #[test]
    fn test_parse_output_without_segments() {
        let output = parse_offmute_output(r#"{"transcript": "whole thing"}"#).unwrap();
        assert_eq!(output.segments, vec![Segment::new(0.0, 0.0, "whole thing")]);
        assert_eq!(output.analysis, Analysis::default());
    }

    #[test]
    fn test_artifact_path_sits_next_to_media() {
        let transcriber = OffmuteTranscriber::new(TranscriberConfig::default());
        assert_eq!(
            transcriber.artifact_for(Path::new("/dl/chan1/vid1.mp4")),
            PathBuf::from("/dl/chan1/vid1_transcription.md")
        );
        assert_eq!(
            transcriber.adjacent_artifact(Path::new("/videos/talk.mov")),
            Some(PathBuf::from("/videos/talk_transcription.md"))
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_document_when_runner_fails() {
        let temp = TempDir::new().unwrap();
        let media = temp.path().join("vid1.mp4");
        std::fs::write(&media, b"video").unwrap();
        std::fs::write(
            temp.path().join("vid1_transcription.md"),
            "# Audio Analysis\n\nRecovered summary\n\n# Full Transcription\n\nsome text\n",
        )
        .unwrap();

        let transcriber = OffmuteTranscriber::new(TranscriberConfig {
            runner: "/nonexistent/bunx".to_string(),
            ..Default::default()
        });
        let output = transcriber.transcribe(&media).await.unwrap();
        assert_eq!(output.analysis.summary, "Recovered summary");
    }
}
