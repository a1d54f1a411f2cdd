//! Stage failure taxonomy.

use thiserror::Error;

use crate::adapters::{AcquisitionError, IngestError, TranscriptionError};
use crate::store::StoreError;

use super::resolver::ArtifactKind;

/// Why a stage did not complete for an item.
///
/// Every variant is handed to the retry policy; none of them stops a worker.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("Acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Transcription failed: {0}")]
    Transcription(#[from] TranscriptionError),

    #[error("Ingestion failed: {0}")]
    Ingestion(#[from] IngestError),

    #[error("Graph ingestor rejected {0}")]
    IngestRejected(String),

    #[error("No {kind} artifact found for {id}")]
    MissingArtifact { kind: ArtifactKind, id: String },

    #[error("Invalid item id: {0}")]
    InvalidId(#[from] crate::domain::ItemIdError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
