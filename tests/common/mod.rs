//! Shared fixtures for integration tests: a temporary workspace and
//! in-memory collaborators that record how they were called.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use graphmem::adapters::{
    AcquisitionError, Acquirer, GraphIngestor, IngestError, Transcriber, TranscriptionError,
};
use graphmem::core::{ArtifactKind, ArtifactLocation, ArtifactResolver, Collaborators, Orchestrator, RetryPolicy};
use graphmem::domain::{Analysis, Segment, TranscriptOutput, WorkItem};
use graphmem::WorkItemStore;

pub const MEDIA_SUFFIX: &str = ".mp4";
pub const TRANSCRIPT_SUFFIX: &str = "_transcription.md";

pub fn sample_output() -> TranscriptOutput {
    TranscriptOutput {
        segments: vec![
            Segment::new(0.0, 2.5, "hello there"),
            Segment::new(2.5, 5.0, "general kenobi"),
        ],
        analysis: Analysis {
            summary: "A greeting".to_string(),
            topics: vec!["greetings".to_string()],
            key_terms: vec!["kenobi".to_string()],
            chapters: vec!["Opening".to_string()],
        },
    }
}

/// Acquirer that writes a placeholder media file at the canonical path
pub struct FakeAcquirer {
    resolver: ArtifactResolver,
    pub fail: bool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Acquirer for FakeAcquirer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn acquire(&self, item: &WorkItem) -> Result<PathBuf, AcquisitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AcquisitionError::DownloadFailed {
                url: item.source.reference(),
                code: 1,
                stderr: "network unreachable".to_string(),
            });
        }

        let id = item
            .item_id()
            .map_err(|e| AcquisitionError::InvalidId(e.to_string()))?;
        let path = self.resolver.canonical_path(ArtifactKind::Media, &id);
        std::fs::create_dir_all(path.parent().unwrap())?;
        std::fs::write(&path, b"media")?;
        Ok(path)
    }
}

/// Transcriber returning a fixed output without writing any document.
/// Like offmute, it looks for `<stem>_transcription.md` beside the media.
pub struct FakeTranscriber {
    pub output: TranscriptOutput,
    pub fail: bool,
    pub fresh_calls: AtomicUsize,
    pub artifact_calls: AtomicUsize,
    pub media_seen: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl Transcriber for FakeTranscriber {
    fn name(&self) -> &str {
        "fake"
    }

    async fn transcribe(&self, media_path: &Path) -> Result<TranscriptOutput, TranscriptionError> {
        self.fresh_calls.fetch_add(1, Ordering::SeqCst);
        self.media_seen.lock().unwrap().push(media_path.to_path_buf());
        if self.fail {
            return Err(TranscriptionError::Failed {
                code: 2,
                stderr: "model unavailable".to_string(),
            });
        }
        Ok(self.output.clone())
    }

    fn adjacent_artifact(&self, media_path: &Path) -> Option<PathBuf> {
        let stem = media_path.file_stem()?.to_string_lossy();
        Some(media_path.with_file_name(format!("{}{}", stem, TRANSCRIPT_SUFFIX)))
    }

    async fn parse_existing_artifact(
        &self,
        artifact_path: &Path,
    ) -> Result<TranscriptOutput, TranscriptionError> {
        self.artifact_calls.fetch_add(1, Ordering::SeqCst);
        let content = tokio::fs::read_to_string(artifact_path).await?;
        Ok(TranscriptOutput::parse(&content))
    }
}

/// Ingestor that accepts or rejects every document
pub struct FakeIngestor {
    pub accept: bool,
    pub ingested: Mutex<Vec<PathBuf>>,
}

#[async_trait]
impl GraphIngestor for FakeIngestor {
    fn name(&self) -> &str {
        "fake"
    }

    async fn ingest(&self, artifact_path: &Path) -> Result<bool, IngestError> {
        self.ingested.lock().unwrap().push(artifact_path.to_path_buf());
        Ok(self.accept)
    }
}

/// Temporary database and downloads directory with fake collaborators
pub struct Harness {
    pub temp: TempDir,
    pub downloads: PathBuf,
    pub store: Arc<WorkItemStore>,
    pub resolver: ArtifactResolver,
    pub acquirer: Arc<FakeAcquirer>,
    pub transcriber: Arc<FakeTranscriber>,
    pub ingestor: Arc<FakeIngestor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_failures(false, false, true)
    }

    /// `acquire_fails` / `transcribe_fails` make those stages always error;
    /// `ingest_accepts = false` makes the ingestor reject every document
    pub fn with_failures(acquire_fails: bool, transcribe_fails: bool, ingest_accepts: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let downloads = temp.path().join("downloads");
        std::fs::create_dir_all(&downloads).unwrap();

        let store = Arc::new(open_store(&temp.path().join("graph_memory.db")));
        let resolver = ArtifactResolver::new(
            ArtifactLocation::new(&downloads, MEDIA_SUFFIX),
            ArtifactLocation::new(&downloads, TRANSCRIPT_SUFFIX),
        );

        Self {
            acquirer: Arc::new(FakeAcquirer {
                resolver: resolver.clone(),
                fail: acquire_fails,
                calls: AtomicUsize::new(0),
            }),
            transcriber: Arc::new(FakeTranscriber {
                output: sample_output(),
                fail: transcribe_fails,
                fresh_calls: AtomicUsize::new(0),
                artifact_calls: AtomicUsize::new(0),
                media_seen: Mutex::new(Vec::new()),
            }),
            ingestor: Arc::new(FakeIngestor {
                accept: ingest_accepts,
                ingested: Mutex::new(Vec::new()),
            }),
            temp,
            downloads,
            store,
            resolver,
        }
    }

    pub fn orchestrator(&self, max_retries: u32) -> Orchestrator {
        let collaborators = Collaborators {
            acquirer: self.acquirer.clone(),
            transcriber: self.transcriber.clone(),
            ingestor: self.ingestor.clone(),
        };
        Orchestrator::new(self.store.clone(), self.resolver.clone(), collaborators)
            .with_retry_policy(RetryPolicy::new(max_retries))
            .with_worker_id("test-worker")
    }

    /// Write a file under the downloads directory
    pub fn write_download(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.downloads.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn fresh_transcriptions(&self) -> usize {
        self.transcriber.fresh_calls.load(Ordering::SeqCst)
    }

    pub fn artifact_parses(&self) -> usize {
        self.transcriber.artifact_calls.load(Ordering::SeqCst)
    }

    pub fn acquisitions(&self) -> usize {
        self.acquirer.calls.load(Ordering::SeqCst)
    }
}

pub fn open_store(path: &Path) -> WorkItemStore {
    WorkItemStore::open(path, Duration::from_secs(10)).unwrap()
}
