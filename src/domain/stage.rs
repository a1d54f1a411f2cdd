//! Pipeline stages and work-item statuses.
//!
//! The stage table is the single source of truth for which status a stage
//! claims from, which status marks it in progress, and which status it
//! leaves behind on success.

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Status of a work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Todo,
    Acquiring,
    Acquired,
    Transcribing,
    Transcribed,
    Ingesting,
    Done,
    Failed,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::Todo,
        Status::Acquiring,
        Status::Acquired,
        Status::Transcribing,
        Status::Transcribed,
        Status::Ingesting,
        Status::Done,
        Status::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::Acquiring => "acquiring",
            Status::Acquired => "acquired",
            Status::Transcribing => "transcribing",
            Status::Transcribed => "transcribed",
            Status::Ingesting => "ingesting",
            Status::Done => "done",
            Status::Failed => "failed",
        }
    }

    /// No automatic transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Done | Status::Failed)
    }

    /// The stage this status marks as running, if any
    pub fn in_progress_stage(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.in_progress() == *self)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

impl ToSql for Status {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Status {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// A named step of the pipeline, in fixed order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Download or locate the media file
    Acquire,
    /// Produce transcript segments and analysis
    Transcribe,
    /// Push the transcript document into the knowledge graph
    Ingest,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Acquire, Stage::Transcribe, Stage::Ingest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Acquire => "acquire",
            Stage::Transcribe => "transcribe",
            Stage::Ingest => "ingest",
        }
    }

    /// Status an item must have to be claimed for this stage
    pub fn precondition(&self) -> Status {
        match self {
            Stage::Acquire => Status::Todo,
            Stage::Transcribe => Status::Acquired,
            Stage::Ingest => Status::Transcribed,
        }
    }

    /// Status written by the claim
    pub fn in_progress(&self) -> Status {
        match self {
            Stage::Acquire => Status::Acquiring,
            Stage::Transcribe => Status::Transcribing,
            Stage::Ingest => Status::Ingesting,
        }
    }

    /// Status written when the stage completes
    pub fn success(&self) -> Status {
        match self {
            Stage::Acquire => Status::Acquired,
            Stage::Transcribe => Status::Transcribed,
            Stage::Ingest => Status::Done,
        }
    }

    /// Claim transition for a run: no stage means the full pipeline,
    /// which enters through acquisition.
    pub fn claim_transition(stage: Option<Stage>) -> (Status, Status) {
        let stage = stage.unwrap_or(Stage::Acquire);
        (stage.precondition(), stage.in_progress())
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_table() {
        assert_eq!(Stage::Acquire.precondition(), Status::Todo);
        assert_eq!(Stage::Acquire.success(), Status::Acquired);
        assert_eq!(Stage::Transcribe.precondition(), Stage::Acquire.success());
        assert_eq!(Stage::Ingest.precondition(), Stage::Transcribe.success());
        assert_eq!(Stage::Ingest.success(), Status::Done);
    }

    #[test]
    fn test_full_pipeline_claims_like_acquire() {
        assert_eq!(
            Stage::claim_transition(None),
            Stage::claim_transition(Some(Stage::Acquire))
        );
        assert_eq!(
            Stage::claim_transition(Some(Stage::Ingest)),
            (Status::Transcribed, Status::Ingesting)
        );
    }

    #[test]
    fn test_status_roundtrip_and_classification() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("downloading".parse::<Status>().is_err());
        assert!(Status::Done.is_terminal());
        assert!(Status::Failed.is_terminal());
        assert!(!Status::Transcribed.is_terminal());
        assert_eq!(Status::Transcribing.in_progress_stage(), Some(Stage::Transcribe));
        assert_eq!(Status::Acquired.in_progress_stage(), None);
    }
}
