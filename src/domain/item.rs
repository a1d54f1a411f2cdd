//! Work items tracked by the pipeline store.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{ItemId, ItemIdError};
use super::stage::Status;

/// Base URL used to fetch remote items by their leaf id
pub const REMOTE_URL_BASE: &str = "https://youtu.be/";

/// Where the media for an item comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Source {
    /// Fetched from a remote URL
    Remote { url: String },

    /// Already present on the local filesystem
    Local { path: PathBuf },
}

impl Source {
    /// Remote source for a video id
    pub fn remote_for(id: &ItemId) -> Self {
        Self::Remote {
            url: format!("{}{}", REMOTE_URL_BASE, id.leaf()),
        }
    }

    /// Column value for the `source` kind
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Remote { .. } => "remote",
            Source::Local { .. } => "local",
        }
    }

    /// Column value for the `source_ref` (url or path)
    pub fn reference(&self) -> String {
        match self {
            Source::Remote { url } => url.clone(),
            Source::Local { path } => path.to_string_lossy().to_string(),
        }
    }

    /// Rebuild from the two stored columns
    pub fn from_columns(kind: &str, reference: String) -> Option<Self> {
        match kind {
            "remote" => Some(Source::Remote { url: reference }),
            "local" => Some(Source::Local {
                path: PathBuf::from(reference),
            }),
            _ => None,
        }
    }
}

/// One unit of pipeline work (a video)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique id, `leaf` or `scope/leaf`
    pub id: String,

    pub title: String,

    pub source: Source,

    pub status: Status,

    /// Failed attempts since the last (re-)submission
    pub retries: u32,

    /// Duration in seconds, when known at prepare time
    pub duration_sec: Option<i64>,

    /// Local media file produced by acquisition
    pub media_path: Option<PathBuf>,

    /// Transcript document produced by transcription
    pub transcript_path: Option<PathBuf>,

    /// Worker that last claimed this item
    pub claimed_by: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Last error message, if any
    pub error: Option<String>,
}

impl WorkItem {
    /// Structured form of the id
    pub fn item_id(&self) -> Result<ItemId, ItemIdError> {
        self.id.parse()
    }
}

/// Metadata needed to enqueue an item
#[derive(Debug, Clone)]
pub struct NewWorkItem {
    pub id: ItemId,
    pub title: String,
    pub source: Source,
    pub duration_sec: Option<i64>,
}

impl NewWorkItem {
    pub fn remote(id: ItemId, title: impl Into<String>) -> Self {
        let source = Source::remote_for(&id);
        Self {
            id,
            title: title.into(),
            source,
            duration_sec: None,
        }
    }

    pub fn local(id: ItemId, title: impl Into<String>, path: PathBuf) -> Self {
        Self {
            id,
            title: title.into(),
            source: Source::Local { path },
            duration_sec: None,
        }
    }

    pub fn with_duration(mut self, duration_sec: Option<i64>) -> Self {
        self.duration_sec = duration_sec;
        self
    }
}
