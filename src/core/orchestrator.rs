//! Stage orchestrator.
//!
//! Claims items from the store, runs the matching collaborator, commits the
//! result, and routes failures through the retry policy. One `Orchestrator`
//! is one worker; run several against the same database to scale out.
//!
//! Store calls block on SQLite (a claim may wait out `busy_timeout`), so
//! they run on the blocking pool rather than on the async worker threads.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::adapters::{Acquirer, GraphIngestor, Transcriber};
use crate::domain::{ItemId, Source, Stage, Status, TranscriptOutput, WorkItem};
use crate::store::{StoreResult, WorkItemStore};

use super::error::StageError;
use super::resolver::{ArtifactKind, ArtifactResolver};
use super::retry::{RetryDecision, RetryPolicy};

/// The three external collaborators a worker drives
#[derive(Clone)]
pub struct Collaborators {
    pub acquirer: Arc<dyn Acquirer>,
    pub transcriber: Arc<dyn Transcriber>,
    pub ingestor: Arc<dyn GraphIngestor>,
}

/// What one worker loop did before the queue ran dry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    pub claimed: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub failed: usize,
}

impl RunReport {
    pub fn merge(&mut self, other: &RunReport) {
        self.claimed += other.claimed;
        self.succeeded += other.succeeded;
        self.requeued += other.requeued;
        self.failed += other.failed;
    }
}

/// A single pipeline worker
pub struct Orchestrator {
    store: Arc<WorkItemStore>,
    resolver: ArtifactResolver,
    collaborators: Collaborators,
    retry: RetryPolicy,
    worker_id: String,
}

impl Orchestrator {
    pub fn new(store: Arc<WorkItemStore>, resolver: ArtifactResolver, collaborators: Collaborators) -> Self {
        Self {
            store,
            resolver,
            collaborators,
            retry: RetryPolicy::default(),
            worker_id: Uuid::new_v4().simple().to_string()[..8].to_string(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Process items until none is eligible.
    ///
    /// With a stage, each claimed item runs only that stage. Without one,
    /// each item runs the whole pipeline. Per-item failures are absorbed by
    /// the retry policy; only store failures end the loop early.
    #[instrument(skip(self), fields(worker = %self.worker_id))]
    pub async fn run(&self, stage: Option<Stage>) -> StoreResult<RunReport> {
        let mut report = RunReport::default();
        info!("Worker started");

        loop {
            let worker_id = self.worker_id.clone();
            let claimed = self
                .with_store(move |store| store.claim_next(stage, &worker_id))
                .await?;
            let Some(item) = claimed else { break };

            report.claimed += 1;
            let id = item.id.clone();
            let span = info_span!("item", %id);

            let outcome = match stage {
                Some(stage) => self.run_stage(stage, item).instrument(span.clone()).await,
                None => self.run_full(item).instrument(span.clone()).await,
            };

            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    span.in_scope(|| error!(error = %e, "Item failed"));
                    let retry = self.retry;
                    let (retry_id, message) = (id.clone(), e.to_string());
                    let decision = self
                        .with_store(move |store| retry.apply(store, &retry_id, &message))
                        .await?;
                    match decision {
                        RetryDecision::Requeue => report.requeued += 1,
                        RetryDecision::Fail => report.failed += 1,
                    }
                }
            }
        }

        info!(
            claimed = report.claimed,
            succeeded = report.succeeded,
            requeued = report.requeued,
            failed = report.failed,
            "Queue empty, worker stopping"
        );
        Ok(report)
    }

    /// Run one stage on an item already claimed for it
    async fn run_stage(&self, stage: Stage, item: WorkItem) -> Result<(), StageError> {
        match stage {
            Stage::Acquire => {
                self.acquire(&item).await?;
            }
            Stage::Transcribe => {
                self.transcribe(&item).await?;
            }
            Stage::Ingest => self.ingest(&item).await?,
        }
        self.set_status(&item.id, stage.success()).await?;
        info!(status = %stage.success(), "Stage complete");
        Ok(())
    }

    /// Run every stage on an item claimed for acquisition.
    ///
    /// Between stages the item goes straight to the next in-progress status,
    /// never to a stage's success status, so no other worker can claim it.
    async fn run_full(&self, mut item: WorkItem) -> Result<(), StageError> {
        let media = self.acquire(&item).await?;
        item.media_path = Some(media);

        self.set_status(&item.id, Status::Transcribing).await?;
        item.transcript_path = Some(self.transcribe(&item).await?);

        self.set_status(&item.id, Status::Ingesting).await?;
        self.ingest(&item).await?;

        self.set_status(&item.id, Status::Done).await?;
        info!("Pipeline complete");
        Ok(())
    }

    async fn acquire(&self, item: &WorkItem) -> Result<PathBuf, StageError> {
        debug!(acquirer = self.collaborators.acquirer.name(), "Acquiring media");
        let media = self.collaborators.acquirer.acquire(item).await?;
        let (id, path) = (item.id.clone(), media.clone());
        self.with_store(move |store| store.set_media_path(&id, &path)).await?;
        info!(media = %media.display(), "Media acquired");
        Ok(media)
    }

    /// Transcribe an item and return the path of its transcript document
    async fn transcribe(&self, item: &WorkItem) -> Result<PathBuf, StageError> {
        let id = item.item_id()?;
        let transcriber = &self.collaborators.transcriber;

        // An existing document always wins over a fresh transcription,
        // whether it sits under downloads or next to the media
        if let Some(artifact) = self.resolver.resolve(ArtifactKind::Transcript, &id) {
            return self.resume_from(item, artifact).await;
        }

        let media = self.resolve_media(item, &id)?;
        let adjacent = transcriber.adjacent_artifact(&media).filter(|p| p.is_file());
        if let Some(artifact) = adjacent {
            return self.resume_from(item, artifact).await;
        }

        debug!(transcriber = transcriber.name(), media = %media.display(), "Transcribing");
        let output = transcriber.transcribe(&media).await?;

        let artifact = match self.resolver.resolve(ArtifactKind::Transcript, &id) {
            Some(existing) => existing,
            None => match transcriber.adjacent_artifact(&media).filter(|p| p.is_file()) {
                Some(adjacent) => adjacent,
                None => self.write_document(&id, &output).await?,
            },
        };
        self.persist_transcript(item, &artifact, output).await?;
        Ok(artifact)
    }

    async fn resume_from(&self, item: &WorkItem, artifact: PathBuf) -> Result<PathBuf, StageError> {
        info!(artifact = %artifact.display(), "Resuming from existing transcript");
        let output = self
            .collaborators
            .transcriber
            .parse_existing_artifact(&artifact)
            .await?;
        self.persist_transcript(item, &artifact, output).await?;
        Ok(artifact)
    }

    async fn ingest(&self, item: &WorkItem) -> Result<(), StageError> {
        let artifact = match item.transcript_path.as_deref().filter(|p| p.is_file()) {
            Some(path) => path.to_path_buf(),
            None => self
                .resolver
                .resolve(ArtifactKind::Transcript, &item.item_id()?)
                .ok_or_else(|| StageError::MissingArtifact {
                    kind: ArtifactKind::Transcript,
                    id: item.id.clone(),
                })?,
        };

        let ingestor = &self.collaborators.ingestor;
        debug!(ingestor = ingestor.name(), artifact = %artifact.display(), "Ingesting");
        if !ingestor.ingest(&artifact).await? {
            return Err(StageError::IngestRejected(item.id.clone()));
        }
        Ok(())
    }

    /// Recorded media path, then resolver lookup, then a local source path
    fn resolve_media(&self, item: &WorkItem, id: &ItemId) -> Result<PathBuf, StageError> {
        if let Some(path) = item.media_path.as_deref().filter(|p| p.is_file()) {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = self.resolver.resolve(ArtifactKind::Media, id) {
            return Ok(path);
        }
        if let Source::Local { path } = &item.source {
            if path.is_file() {
                return Ok(path.clone());
            }
        }
        warn!("No media file for item");
        Err(StageError::MissingArtifact {
            kind: ArtifactKind::Media,
            id: item.id.clone(),
        })
    }

    /// Write a transcript document at the canonical location
    async fn write_document(&self, id: &ItemId, output: &TranscriptOutput) -> Result<PathBuf, StageError> {
        let path = self.resolver.canonical_path(ArtifactKind::Transcript, id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, output.render()).await?;
        debug!(path = %path.display(), "Wrote transcript document");
        Ok(path)
    }

    async fn persist_transcript(
        &self,
        item: &WorkItem,
        artifact: &Path,
        output: TranscriptOutput,
    ) -> StoreResult<()> {
        let segments = output.segments.len();
        let (id, artifact) = (item.id.clone(), artifact.to_path_buf());
        self.with_store(move |store| {
            store.set_transcript_path(&id, &artifact)?;
            store.save_segments(&id, &output.segments)?;
            store.save_analysis(&id, &output.analysis)
        })
        .await?;
        info!(segments, "Transcript saved");
        Ok(())
    }

    async fn set_status(&self, id: &str, status: Status) -> StoreResult<()> {
        let id = id.to_string();
        self.with_store(move |store| store.update_status(&id, status, None))
            .await
    }

    /// Run a store call on the blocking pool
    async fn with_store<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&WorkItemStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(&store)).await?
    }
}
