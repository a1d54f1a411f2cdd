//! Transcriber chaining.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::TranscriptOutput;

use super::{Transcriber, TranscriptionError};

/// Runs `primary`, and `fallback` only when the primary fails.
///
/// Existing documents are found and parsed the primary's way.
pub struct FallbackTranscriber {
    primary: Arc<dyn Transcriber>,
    fallback: Arc<dyn Transcriber>,
}

impl FallbackTranscriber {
    pub fn new(primary: Arc<dyn Transcriber>, fallback: Arc<dyn Transcriber>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl Transcriber for FallbackTranscriber {
    fn name(&self) -> &str {
        self.primary.name()
    }

    async fn transcribe(&self, media_path: &Path) -> Result<TranscriptOutput, TranscriptionError> {
        match self.primary.transcribe(media_path).await {
            Ok(output) => Ok(output),
            Err(e) => {
                warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %e,
                    "Transcriber failed, trying fallback"
                );
                self.fallback.transcribe(media_path).await
            }
        }
    }

    fn adjacent_artifact(&self, media_path: &Path) -> Option<PathBuf> {
        self.primary.adjacent_artifact(media_path)
    }

    async fn parse_existing_artifact(
        &self,
        artifact_path: &Path,
    ) -> Result<TranscriptOutput, TranscriptionError> {
        self.primary.parse_existing_artifact(artifact_path).await
    }
}
